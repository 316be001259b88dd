use std::io::{self, ErrorKind};

use xvc_protocol::error::ReadError;

/// Errors raised by drivers, sessions and the listener.
///
/// Every variant is fatal to the connection it occurs on. Errors raised while a driver
/// is being constructed are fatal to the process.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A socket, file or mapping operation failed.
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
    /// The peer or the target violated the protocol.
    #[error("Protocol error: {0}")]
    Protocol(String),
    /// A bounded wait for the peer or the target expired.
    #[error("Timed out {0}")]
    Timeout(String),
    /// The driver or the server was configured inconsistently.
    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn io(context: impl Into<String>, source: io::Error) -> Error {
        Error::Io {
            context: context.into(),
            source,
        }
    }

    /// Whether the error only means that the peer went away.
    pub fn is_disconnect(&self) -> bool {
        match self {
            Error::Io { source, .. } => matches!(
                source.kind(),
                ErrorKind::UnexpectedEof
                    | ErrorKind::ConnectionReset
                    | ErrorKind::ConnectionAborted
                    | ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout(_))
    }
}

impl From<io::Error> for Error {
    fn from(value: io::Error) -> Self {
        Error::io("I/O error", value)
    }
}

impl From<ReadError> for Error {
    fn from(value: ReadError) -> Self {
        match value {
            ReadError::IoError(err) => Error::io("Reading request", err),
            other => Error::Protocol(other.to_string()),
        }
    }
}

/// Attaches the failing operation to an [`io::Error`].
pub trait IoContext<T> {
    fn context(self, context: impl Into<String>) -> Result<T>;
}

impl<T> IoContext<T> for io::Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|err| Error::io(context, err))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn disconnects_are_recognized() {
        let eof = Error::io("reading", io::Error::from(ErrorKind::UnexpectedEof));
        assert!(eof.is_disconnect());
        let refused = Error::io("sending", io::Error::from(ErrorKind::ConnectionRefused));
        assert!(!refused.is_disconnect());
        assert!(!Error::Protocol("bad".into()).is_disconnect());
    }

    #[test]
    fn read_errors_map_to_categories() {
        let too_large: Error = ReadError::TooManyBytes { max: 4, got: 5 }.into();
        assert!(matches!(too_large, Error::Protocol(_)));
        let io: Error = ReadError::IoError(io::Error::from(ErrorKind::BrokenPipe)).into();
        assert!(io.is_disconnect());
    }

    #[test]
    fn context_names_operation() {
        let result: io::Result<()> = Err(io::Error::other("boom"));
        let err = result.context("mapping registers").unwrap_err();
        assert_eq!(err.to_string(), "mapping registers: boom");
    }
}
