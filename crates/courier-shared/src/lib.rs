//! # courier-shared
//!
//! Entities, relation containers and the error taxonomy used by every
//! courier crate.  Nothing in here performs I/O.

pub mod error;
pub mod models;
pub mod relations;
pub mod types;

pub use error::{Error, ErrorCategory, ErrorCode, NetError, Result, StorageError, SystemError};
pub use models::*;
pub use relations::*;
pub use types::*;
