//! Deterministic, pure logic shared by the chat front-ends.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod markdown;
pub mod recall;
pub mod registry;
pub mod transcript;
pub mod types;
