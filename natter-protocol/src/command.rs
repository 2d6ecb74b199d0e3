//! Command parsing for inbound chat lines
//!
//! Every line a client sends is exactly one command. Dispatch checks the
//! roster query first, then the rename prefix, then the direct-message
//! prefix, and treats everything else (including empty lines) as a
//! broadcast. Matching is case-sensitive with no whitespace trimming.

/// Roster query keyword
const WHO_KEYWORD: &str = "who";
/// Rename command prefix
const RENAME_PREFIX: &str = "rename|";
/// Direct message command prefix
const DIRECT_PREFIX: &str = "to|";

/// Parse error for structured commands
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    /// A `to|` line without both a target and a body field
    #[error("direct message missing target or body")]
    MissingDirectFields,

    /// A `to|` line whose target field is empty
    #[error("direct message target is empty")]
    EmptyDirectTarget,
}

/// A single inbound chat command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `who`: list everyone online
    Who,
    /// `rename|<name>`: change the sender's display name
    Rename { name: String },
    /// `to|<target>|<body>`: message one recipient
    Direct { target: String, body: String },
    /// Anything else: message everyone
    Broadcast { body: String },
}

impl Command {
    /// Parse one line into a command.
    ///
    /// Only the `to|` form can fail; a malformed rename (bare `rename|`)
    /// falls through to a broadcast of the literal line.
    pub fn parse(line: &str) -> Result<Self, CommandError> {
        if line == WHO_KEYWORD {
            return Ok(Command::Who);
        }

        if let Some(name) = line.strip_prefix(RENAME_PREFIX) {
            if !name.is_empty() {
                return Ok(Command::Rename {
                    name: name.to_string(),
                });
            }
            // No name given: fall through, the line broadcasts as-is
        }

        if let Some(rest) = line.strip_prefix(DIRECT_PREFIX) {
            // Split only at the first delimiter so the body keeps its pipes
            let (target, body) = rest
                .split_once('|')
                .ok_or(CommandError::MissingDirectFields)?;
            if target.is_empty() {
                return Err(CommandError::EmptyDirectTarget);
            }
            return Ok(Command::Direct {
                target: target.to_string(),
                body: body.to_string(),
            });
        }

        Ok(Command::Broadcast {
            body: line.to_string(),
        })
    }
}
