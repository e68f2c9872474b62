//! The `utils` module provides shared definitions used across the relay:
//! the error taxonomy and logging initialisation.

pub mod error;
pub mod logging;

pub use error::{ErrorKind, RelayError};
