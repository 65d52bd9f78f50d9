//! Command Handler Module
//!
//! Routes parsed requests to the storage engine and turns the results into
//! [`Reply`](crate::protocol::Reply) values.
//!
//! ## Architecture
//!
//! ```text
//! Client Request
//!       │
//!       ▼
//! ┌─────────────────┐
//! │  Line Parser    │  (protocol module)
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │ CommandHandler  │  (this module)
//! │                 │
//! │  - Validate     │
//! │  - Execute      │
//! │  - Log writes   │
//! └────┬───────┬────┘
//!      │       │
//!      ▼       ▼
//! ┌─────────┐ ┌───────────┐
//! │ Storage │ │ AppendLog │
//! └─────────┘ └───────────┘
//! ```

pub mod handler;

pub use handler::CommandHandler;
