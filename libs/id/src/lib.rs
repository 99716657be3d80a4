//! # qs-id
//!
//! Typed identifiers for the quota scheduler.
//!
//! Identifiers here are assigned by the outside world (the task executor
//! names tasks and bots, operators name accounts and pools), so unlike
//! generated IDs they carry no prefix or embedded timestamp. Each type is a
//! validated newtype over `String`:
//!
//! - never empty
//! - at most [`MAX_ID_LEN`] bytes
//! - free of control characters
//!
//! Typing the IDs keeps a worker ID from being passed where a request ID is
//! expected, and makes an empty ID unrepresentable past the parsing boundary.

mod error;
#[doc(hidden)]
pub mod macros;
mod types;

pub use error::IdError;
pub use types::*;

/// Maximum length, in bytes, of any identifier.
pub const MAX_ID_LEN: usize = 512;
