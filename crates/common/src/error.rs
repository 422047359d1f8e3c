//! Error type shared by the madtom checker binaries.

use std::fmt;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Hosts document error: {0}")]
    Hosts(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP server error: {0}")]
    Http(String),
}

impl Error {
    pub fn hosts(msg: impl fmt::Display) -> Self {
        Error::Hosts(msg.to_string())
    }

    pub fn http(msg: impl fmt::Display) -> Self {
        Error::Http(msg.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            Error::hosts("no hosts array").to_string(),
            "Hosts document error: no hosts array"
        );
        assert_eq!(
            Error::http("address in use").to_string(),
            "HTTP server error: address in use"
        );
    }

    #[test]
    fn test_serde_conversion() {
        let parse = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: Error = parse.into();
        assert!(matches!(err, Error::Serialization(_)));
    }
}
