//! Pieces shared by the madtom checker crates: the binary-level error type
//! and tracing setup.

pub mod error;
pub mod logging;

pub use error::{Error, Result};
pub use logging::LogFormat;
