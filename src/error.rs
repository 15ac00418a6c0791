//! Error types for the NNTP connection pool.

use thiserror::Error;

/// Result type used throughout the library.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur while talking to an NNTP server.
///
/// Errors are cloneable so that a [`Response`](crate::Response) can carry the
/// error observed for its request without holding on to a transport.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Transport could not be opened or the greeting was not a success status
    #[error("Connection error: {0}")]
    Connection(String),

    /// Credentials rejected, out of sequence, or authentication unavailable
    #[error("Authentication failed {code}: {message}")]
    Auth {
        /// Response code from server
        code: u16,
        /// Response message from server
        message: String,
    },

    /// Operation attempted without a live transport
    #[error("No connection to server")]
    NotConnected,

    /// Server reported that no newsgroup is selected (412)
    #[error("No newsgroup selected")]
    NoGroupSelected,

    /// Server reported an invalid article reference (420)
    #[error("Invalid article reference: {0}")]
    InvalidReference(String),

    /// Server has no article with the given message id (423/430)
    #[error("No such article: {0}")]
    NoSuchArticle(String),

    /// Server has no newsgroup with the given name (411)
    #[error("No such newsgroup: {0}")]
    NoSuchGroup(String),

    /// Any status code the caller does not handle explicitly
    #[error("Unexpected status {code}: {message}")]
    UnexpectedStatus {
        /// Response code from server
        code: u16,
        /// Response message from server
        message: String,
    },

    /// I/O error on an established transport
    #[error("I/O error: {0}")]
    Io(String),

    /// Invalid command or parameters
    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    /// Malformed data received from the server
    #[error("Parse error: {0}")]
    Parse(String),

    /// TLS requested but not supported by this build. A failed handshake is
    /// reported as [`Error::Connection`].
    #[error("TLS error: {0}")]
    Tls(String),

    /// A request was submitted without any group to look in
    #[error("No candidate groups given")]
    NoCandidateGroups,
}

impl Error {
    /// Whether the error means the transport is gone and the connection is
    /// no longer usable.
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Io(_) | Error::Connection(_) | Error::Tls(_))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_are_transport_errors() {
        let err: Error = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe").into();
        assert!(err.is_transport());
        assert!(!Error::NoGroupSelected.is_transport());
    }

    #[test]
    fn display_carries_status_code() {
        let err = Error::UnexpectedStatus {
            code: 480,
            message: "Authentication required".to_string(),
        };
        assert_eq!(err.to_string(), "Unexpected status 480: Authentication required");
    }
}
