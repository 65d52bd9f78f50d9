//! Line Protocol
//!
//! Requests are newline-terminated lines of whitespace-separated tokens;
//! replies are single lines as well.
//!
//! ## Modules
//!
//! - `command`: Parses a request line into a [`Command`]
//! - `reply`: Defines the [`Reply`] enum and its wire form
//!
//! ## Example
//!
//! ```
//! use tidekv::protocol::{parse_line, CommandType, Reply};
//!
//! let cmd = parse_line("set name tide").unwrap();
//! assert_eq!(cmd.kind, CommandType::Set);
//! assert!(cmd.kind.is_write());
//!
//! assert_eq!(Reply::error("key not found").to_line(), "ERR: key not found\n");
//! ```

pub mod command;
pub mod reply;

// Re-export commonly used types for convenience
pub use command::{parse_line, Command, CommandType, ParseError};
pub use reply::Reply;
