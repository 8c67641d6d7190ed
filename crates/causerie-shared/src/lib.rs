//! # causerie-shared
//!
//! Types shared by every Causerie crate: typed identifiers, message content,
//! attachment references and the public error kinds handed to consumers.

pub mod constants;
pub mod error;
pub mod types;

pub use error::{ChatError, Feedback};
pub use types::*;
