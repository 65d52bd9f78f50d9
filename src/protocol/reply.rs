//! Replies
//!
//! Every command produces a [`Reply`]. Replies are written back as a single
//! text line:
//!
//! | Reply              | Wire form                      |
//! |--------------------|--------------------------------|
//! | `Text("hi")`       | `hi`                           |
//! | `Integer(3)`       | `3`                            |
//! | `Ok`               | `OK`                           |
//! | `Nil`              | `nil`                          |
//! | `Error("boom")`    | `ERR: boom`                    |
//! | `List([a, b])`     | `a b`                          |
//! | `List([])`         | `(empty list)`                 |
//!
//! Keys never contain whitespace (requests are whitespace-tokenized), so a
//! space-joined list is unambiguous.

use std::fmt;

/// Result of executing a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// A plain text value
    Text(String),
    /// An integer
    Integer(i64),
    /// Success with nothing to return
    Ok,
    /// Absent value
    Nil,
    /// A failure message
    Error(String),
    /// A list of values (e.g. from `KEYS`)
    List(Vec<String>),
}

impl Reply {
    /// Creates a text reply.
    pub fn text(s: impl Into<String>) -> Self {
        Reply::Text(s.into())
    }

    /// Creates an error reply.
    pub fn error(msg: impl Into<String>) -> Self {
        Reply::Error(msg.into())
    }

    /// Returns true if this is an error reply.
    pub fn is_error(&self) -> bool {
        matches!(self, Reply::Error(_))
    }

    /// Serializes the reply as one newline-terminated line.
    pub fn to_line(&self) -> String {
        format!("{}\n", self)
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Text(s) => f.write_str(s),
            Reply::Integer(n) => write!(f, "{}", n),
            Reply::Ok => f.write_str("OK"),
            Reply::Nil => f.write_str("nil"),
            Reply::Error(msg) => write!(f, "ERR: {}", msg),
            Reply::List(items) if items.is_empty() => f.write_str("(empty list)"),
            Reply::List(items) => f.write_str(&items.join(" ")),
        }
    }
}

impl From<bool> for Reply {
    /// `true` → `1`, `false` → `0`
    fn from(b: bool) -> Self {
        Reply::Integer(i64::from(b))
    }
}
