//! Tool registry parsing.
//!
//! One tool per non-blank, non-`#` line:
//!
//! ```text
//! name|label|command|arg1|arg2|...|ENV:KEY=val,KEY2=val2
//! ```
//!
//! Argument fields are equivalent to one whitespace-delimited string, so
//! `a|b c` and `a b|c` yield the same argument vector.

use std::collections::BTreeMap;
use std::collections::HashSet;
use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

const ENV_PREFIX: &str = "ENV:";

/// A named external command the user can converse with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolDefinition {
    pub name: String,
    pub label: String,
    pub command: String,
    pub args: Vec<String>,
    /// Variables added to (or overriding) the inherited environment for this tool only.
    pub env: BTreeMap<String, String>,
}

/// Failures to obtain a usable tool registry. The display strings are the
/// banner texts shown to the user.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config file is empty. Add tools to ~/.cockpit-chat-tools.conf")]
    Empty,
    #[error("No valid tools in config. Check ~/.cockpit-chat-tools.conf format")]
    NoValidLines,
    #[error("No valid tools parsed. Check ~/.cockpit-chat-tools.conf format")]
    NoValidTools,
    #[error("No config found. Create {}", path.display())]
    NotFound { path: PathBuf },
    #[error("Could not read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A non-empty, validated set of tools. The first tool is the default selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registry {
    tools: Vec<ToolDefinition>,
}

impl Registry {
    pub fn tools(&self) -> &[ToolDefinition] {
        &self.tools
    }

    pub fn default_tool(&self) -> &ToolDefinition {
        &self.tools[0]
    }

    pub fn get(&self, name: &str) -> Option<&ToolDefinition> {
        self.tools.iter().find(|tool| tool.name == name)
    }

    pub fn into_tools(self) -> Vec<ToolDefinition> {
        self.tools
    }
}

/// Parse raw registry text into tool definitions.
///
/// Lines with fewer than three `|` fields are dropped silently. A registry
/// yielding zero tools is an error, never an empty success.
pub fn parse_registry(text: &str) -> Result<Registry, ConfigError> {
    if text.trim().is_empty() {
        return Err(ConfigError::Empty);
    }

    let lines: Vec<&str> = text
        .lines()
        .filter(|line| {
            let trimmed = line.trim();
            !trimmed.is_empty() && !trimmed.starts_with('#')
        })
        .collect();
    if lines.is_empty() {
        return Err(ConfigError::NoValidLines);
    }

    let mut seen = HashSet::new();
    let mut tools = Vec::new();
    for (index, line) in lines.iter().enumerate() {
        let Some(tool) = parse_line(line) else {
            debug!(line = index + 1, "dropping registry line with fewer than 3 fields");
            continue;
        };
        if !seen.insert(tool.name.clone()) {
            warn!(name = %tool.name, "duplicate tool name, keeping the first definition");
            continue;
        }
        tools.push(tool);
    }

    if tools.is_empty() {
        return Err(ConfigError::NoValidTools);
    }
    debug!(count = tools.len(), "parsed tool registry");
    Ok(Registry { tools })
}

fn parse_line(line: &str) -> Option<ToolDefinition> {
    let fields: Vec<&str> = line.split('|').collect();
    if fields.len() < 3 {
        return None;
    }
    let (name, label, command) = (fields[0].trim(), fields[1].trim(), fields[2].trim());

    let rest = &fields[3..];
    let env_index = rest
        .iter()
        .position(|field| field.trim().starts_with(ENV_PREFIX));
    let (arg_fields, env) = match env_index {
        Some(index) => {
            if index + 1 < rest.len() {
                warn!(
                    tool = name,
                    ignored = rest.len() - index - 1,
                    "fields after the ENV: segment are ignored"
                );
            }
            let segment = &rest[index].trim()[ENV_PREFIX.len()..];
            (&rest[..index], parse_env(segment))
        }
        None => (rest, BTreeMap::new()),
    };

    let args = arg_fields
        .join(" ")
        .split_whitespace()
        .map(str::to_string)
        .collect();

    Some(ToolDefinition {
        name: name.to_string(),
        label: label.to_string(),
        command: command.to_string(),
        args,
        env,
    })
}

/// Parse `k=v,k2=v2`. Each pair splits on its first `=`; pairs lacking a key or
/// a value are dropped.
fn parse_env(segment: &str) -> BTreeMap<String, String> {
    segment
        .split(',')
        .filter_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            let (key, value) = (key.trim(), value.trim());
            if key.is_empty() || value.is_empty() {
                return None;
            }
            Some((key.to_string(), value.to_string()))
        })
        .collect()
}
