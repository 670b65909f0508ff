//! Conversation transcript passed to each tool invocation.
//!
//! Only finalized turns are stored, so the serialized form never contains
//! partial output from a turn still in flight.

/// One finalized exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub user: String,
    pub bot: String,
}

/// Append-only conversation history, reset atomically by [`Transcript::clear`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transcript {
    turns: Vec<Turn>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Flat text form: `USER: …\nBOT: …\n\n` per turn.
    pub fn serialized(&self) -> String {
        let mut buf = String::new();
        for turn in &self.turns {
            push_user_line(&mut buf, &turn.user);
            buf.push_str("BOT: ");
            buf.push_str(&turn.bot);
            buf.push_str("\n\n");
        }
        buf
    }

    /// History plus the pending user line; this is what the next process receives.
    pub fn prompt_for(&self, user: &str) -> String {
        let mut buf = self.serialized();
        push_user_line(&mut buf, user);
        buf
    }

    /// Record a finalized turn.
    pub fn record(&mut self, user: impl Into<String>, bot: impl Into<String>) {
        self.turns.push(Turn {
            user: user.into(),
            bot: bot.into(),
        });
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }

    /// Serialized size in bytes.
    pub fn size_bytes(&self) -> usize {
        self.turns
            .iter()
            .map(|turn| "USER: \nBOT: \n\n".len() + turn.user.len() + turn.bot.len())
            .sum()
    }
}

fn push_user_line(buf: &mut String, user: &str) {
    buf.push_str("USER: ");
    buf.push_str(user);
    buf.push('\n');
}

/// Human-readable byte size using 1024-based units (`512 B`, `1.5 KB`, `2.0 MB`).
pub fn format_size(bytes: usize) -> String {
    const KIB: usize = 1024;
    const MIB: usize = 1024 * 1024;
    if bytes < KIB {
        format!("{bytes} B")
    } else if bytes < MIB {
        format!("{:.1} KB", bytes as f64 / KIB as f64)
    } else {
        format!("{:.1} MB", bytes as f64 / MIB as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_transcript_serializes_to_empty_string() {
        let transcript = Transcript::new();
        assert_eq!(transcript.serialized(), "");
        assert_eq!(transcript.prompt_for("hi"), "USER: hi\n");
    }

    #[test]
    fn recorded_turns_serialize_in_order() {
        let mut transcript = Transcript::new();
        transcript.record("hi", "ok");
        transcript.record("again", "");
        assert_eq!(
            transcript.serialized(),
            "USER: hi\nBOT: ok\n\nUSER: again\nBOT: \n\n"
        );
        assert_eq!(
            transcript.prompt_for("third"),
            "USER: hi\nBOT: ok\n\nUSER: again\nBOT: \n\nUSER: third\n"
        );
    }

    #[test]
    fn clear_resets_to_empty() {
        let mut transcript = Transcript::new();
        transcript.record("a", "b");
        transcript.clear();
        assert!(transcript.is_empty());
        assert_eq!(transcript.serialized(), "");
    }

    #[test]
    fn size_matches_serialized_length() {
        let mut transcript = Transcript::new();
        transcript.record("héllo", "wörld\nmore");
        assert_eq!(transcript.size_bytes(), transcript.serialized().len());
    }

    #[test]
    fn format_size_uses_binary_units() {
        assert_eq!(format_size(0), "0 B");
        assert_eq!(format_size(1023), "1023 B");
        assert_eq!(format_size(1536), "1.5 KB");
        assert_eq!(format_size(2 * 1024 * 1024), "2.0 MB");
    }
}
