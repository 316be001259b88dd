use std::{io, num::ParseIntError, str::Utf8Error};

/// Errors that may occur when reading a message from a stream or a buffer.
#[derive(Debug, thiserror::Error)]
pub enum ReadError {
    #[error("{0}")]
    IoError(#[from] io::Error),
    #[error("Received invalid command {0}")]
    InvalidCommand(String),
    #[error("Received invalid command with prefix {0}")]
    InvalidCommandPrefix(String),
    #[error("Unsupported version {0}")]
    UnsupportedVersion(String),
    #[error("{0}")]
    InvalidFormat(String),
    #[error("Message too large! Maximum is {max}, but got {got}")]
    TooManyBytes { max: usize, got: usize },
}

impl From<Utf8Error> for ReadError {
    fn from(value: Utf8Error) -> Self {
        ReadError::InvalidFormat(format!("Invalid UTF8: {}", value))
    }
}

impl From<ParseIntError> for ReadError {
    fn from(value: ParseIntError) -> Self {
        ReadError::InvalidFormat(format!("Invalid integer: {}", value))
    }
}
