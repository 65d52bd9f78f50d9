//! Log Entries
//!
//! One line of the append-only log is one write command:
//!
//! ```text
//! SET <key> <value ...>
//! DEL <key>
//! EXPIRE <key> <seconds>
//! PERSIST <key>
//! ```
//!
//! The command name, a single space, then the space-joined arguments. A `SET`
//! value may contain spaces: every token after the key belongs to the value.

use std::fmt;

/// A write command recorded in the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogEntry {
    /// `SET key value`
    Set { key: String, value: String },
    /// `DEL key`
    Del { key: String },
    /// `EXPIRE key seconds`
    Expire { key: String, seconds: i64 },
    /// `PERSIST key`
    Persist { key: String },
}

/// Why a log line could not be turned into a [`LogEntry`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EntryError {
    /// The line holds nothing but whitespace
    #[error("blank line")]
    Blank,

    /// The command is not a write command
    #[error("unknown command '{0}'")]
    UnknownCommand(String),

    /// Too few arguments for the command
    #[error("missing arguments for '{0}'")]
    MissingArguments(&'static str),

    /// `EXPIRE` seconds is not an integer
    #[error("invalid seconds '{0}'")]
    InvalidSeconds(String),
}

impl LogEntry {
    /// Parses one log line (without its trailing newline).
    ///
    /// The command name is case-insensitive. Tokens are separated by any run of
    /// whitespace; a `SET` value is rebuilt by joining its tokens with single
    /// spaces.
    pub fn parse(line: &str) -> Result<Self, EntryError> {
        let mut parts = line.split_whitespace();
        let command = parts.next().ok_or(EntryError::Blank)?.to_ascii_uppercase();
        let args: Vec<&str> = parts.collect();

        match command.as_str() {
            "SET" => match args.split_first() {
                Some((key, value)) if !value.is_empty() => Ok(LogEntry::Set {
                    key: key.to_string(),
                    value: value.join(" "),
                }),
                _ => Err(EntryError::MissingArguments("SET")),
            },
            "DEL" => match args.first() {
                Some(key) => Ok(LogEntry::Del {
                    key: key.to_string(),
                }),
                None => Err(EntryError::MissingArguments("DEL")),
            },
            "EXPIRE" => match args.as_slice() {
                [key, seconds, ..] => {
                    let seconds = seconds
                        .parse::<i64>()
                        .map_err(|_| EntryError::InvalidSeconds(seconds.to_string()))?;
                    Ok(LogEntry::Expire {
                        key: key.to_string(),
                        seconds,
                    })
                }
                _ => Err(EntryError::MissingArguments("EXPIRE")),
            },
            "PERSIST" => match args.first() {
                Some(key) => Ok(LogEntry::Persist {
                    key: key.to_string(),
                }),
                None => Err(EntryError::MissingArguments("PERSIST")),
            },
            _ => Err(EntryError::UnknownCommand(command)),
        }
    }

    /// The command name as written to the log.
    pub fn command(&self) -> &'static str {
        match self {
            LogEntry::Set { .. } => "SET",
            LogEntry::Del { .. } => "DEL",
            LogEntry::Expire { .. } => "EXPIRE",
            LogEntry::Persist { .. } => "PERSIST",
        }
    }

    /// The key the entry applies to.
    pub fn key(&self) -> &str {
        match self {
            LogEntry::Set { key, .. }
            | LogEntry::Del { key }
            | LogEntry::Expire { key, .. }
            | LogEntry::Persist { key } => key,
        }
    }

    /// The arguments following the command name.
    pub fn args(&self) -> Vec<String> {
        match self {
            LogEntry::Set { key, value } => vec![key.clone(), value.clone()],
            LogEntry::Del { key } | LogEntry::Persist { key } => vec![key.clone()],
            LogEntry::Expire { key, seconds } => vec![key.clone(), seconds.to_string()],
        }
    }
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.command(), self.args().join(" "))
    }
}
