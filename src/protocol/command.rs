//! Command Parsing
//!
//! A request is one line of whitespace-separated tokens. The first token is the
//! command name (case-insensitive), the rest are its arguments. There is no
//! quoting syntax.
//!
//! ## Examples
//!
//! ```text
//! SET greeting hello world    -> SET ["greeting", "hello", "world"]
//! get greeting                -> GET ["greeting"]
//! KEYS user:*                 -> KEYS ["user:*"]
//! ```

use std::fmt;
use std::str::FromStr;

/// Every command the server understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandType {
    Set,
    Get,
    Del,
    Expire,
    Ttl,
    Persist,
    Keys,
    Exists,
    DbSize,
    Ping,
    Info,
    Quit,
}

impl CommandType {
    /// All recognized commands.
    pub const ALL: [CommandType; 12] = [
        CommandType::Set,
        CommandType::Get,
        CommandType::Del,
        CommandType::Expire,
        CommandType::Ttl,
        CommandType::Persist,
        CommandType::Keys,
        CommandType::Exists,
        CommandType::DbSize,
        CommandType::Ping,
        CommandType::Info,
        CommandType::Quit,
    ];

    /// The upper-case command name.
    pub fn as_str(self) -> &'static str {
        match self {
            CommandType::Set => "SET",
            CommandType::Get => "GET",
            CommandType::Del => "DEL",
            CommandType::Expire => "EXPIRE",
            CommandType::Ttl => "TTL",
            CommandType::Persist => "PERSIST",
            CommandType::Keys => "KEYS",
            CommandType::Exists => "EXISTS",
            CommandType::DbSize => "DBSIZE",
            CommandType::Ping => "PING",
            CommandType::Info => "INFO",
            CommandType::Quit => "QUIT",
        }
    }

    /// Write commands are the ones recorded in the append-only log.
    pub fn is_write(self) -> bool {
        matches!(
            self,
            CommandType::Set | CommandType::Del | CommandType::Expire | CommandType::Persist
        )
    }
}

impl fmt::Display for CommandType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommandType {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.to_ascii_uppercase();
        CommandType::ALL
            .into_iter()
            .find(|cmd| cmd.as_str() == upper)
            .ok_or(ParseError::UnknownCommand(s.to_string()))
    }
}

/// Errors that can occur while parsing a request line.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// The line holds nothing but whitespace
    #[error("empty command")]
    Empty,

    /// The first token is not a known command
    #[error("unknown command: {0}")]
    UnknownCommand(String),
}

/// A parsed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Which command to run
    pub kind: CommandType,
    /// The tokens after the command name
    pub args: Vec<String>,
}

impl Command {
    /// Creates a command from its parts.
    pub fn new(kind: CommandType, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            kind,
            args: args.into_iter().map(Into::into).collect(),
        }
    }
}

/// Parses one request line.
pub fn parse_line(line: &str) -> Result<Command, ParseError> {
    let mut parts = line.split_whitespace();
    let name = parts.next().ok_or(ParseError::Empty)?;
    let kind = name.parse::<CommandType>()?;

    Ok(Command {
        kind,
        args: parts.map(str::to_string).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple() {
        let cmd = parse_line("GET name").unwrap();
        assert_eq!(cmd.kind, CommandType::Get);
        assert_eq!(cmd.args, vec!["name"]);
    }

    #[test]
    fn test_parse_lowercase_and_extra_whitespace() {
        let cmd = parse_line("  set   greeting  hello   world \r").unwrap();
        assert_eq!(
            cmd,
            Command::new(CommandType::Set, ["greeting", "hello", "world"])
        );
    }

    #[test]
    fn test_parse_no_args() {
        let cmd = parse_line("PING").unwrap();
        assert_eq!(cmd.kind, CommandType::Ping);
        assert!(cmd.args.is_empty());

        assert_eq!(parse_line("dbsize").unwrap().kind, CommandType::DbSize);
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(parse_line(""), Err(ParseError::Empty));
        assert_eq!(parse_line(" \t "), Err(ParseError::Empty));
        assert_eq!(
            parse_line("FLY away"),
            Err(ParseError::UnknownCommand("FLY".to_string()))
        );
    }

    #[test]
    fn test_write_classification() {
        let writes: Vec<_> = CommandType::ALL
            .into_iter()
            .filter(|c| c.is_write())
            .collect();
        assert_eq!(
            writes,
            vec![
                CommandType::Set,
                CommandType::Del,
                CommandType::Expire,
                CommandType::Persist
            ]
        );
    }

    #[test]
    fn test_round_trip_names() {
        for cmd in CommandType::ALL {
            assert_eq!(cmd.as_str().parse::<CommandType>(), Ok(cmd));
            assert_eq!(cmd.to_string(), cmd.as_str());
        }
    }
}
