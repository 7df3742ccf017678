//! Shared types for the session workspace
//!
//! `Secret` keeps bearer tokens out of logs; `Error` covers configuration
//! loading for the binary.

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
