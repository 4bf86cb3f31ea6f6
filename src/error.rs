use thiserror::Error;

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while configuring or running the auto-confirm worker
#[derive(Error, Debug)]
pub enum Error {
    /// Missing or invalid environment configuration, fatal at startup
    #[error("configuration error: {0}")]
    Config(String),

    /// IMAP server unreachable, TLS/login failure or timeout
    #[error("IMAP connection error: {0}")]
    Connection(String),

    /// IMAP command rejected (select, search, fetch)
    #[error("IMAP protocol error: {0}")]
    Protocol(String),

    /// Confirmation request could not be built or sent
    #[error("confirmation error: {0}")]
    Confirmation(String),

    /// The poller task is gone and can no longer take requests
    #[error("poller unavailable: {0}")]
    PollerUnavailable(String),
}

impl Error {
    /// Errors after which the IMAP session must be rebuilt
    pub fn invalidates_session(&self) -> bool {
        matches!(self, Error::Connection(_) | Error::Protocol(_))
    }

    /// Convert an IMAP failure, prefixing the step that failed
    pub(crate) fn imap(step: &str, err: async_imap::error::Error) -> Self {
        match Error::from(err) {
            Error::Connection(msg) => Error::Connection(format!("{}: {}", step, msg)),
            Error::Protocol(msg) => Error::Protocol(format!("{}: {}", step, msg)),
            other => other,
        }
    }
}

impl From<async_imap::error::Error> for Error {
    fn from(err: async_imap::error::Error) -> Self {
        use async_imap::error::Error as ImapError;

        match err {
            ImapError::Io(e) => Error::Connection(e.to_string()),
            ImapError::ConnectionLost => Error::Connection("connection lost".to_string()),
            other => Error::Protocol(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_invalidation() {
        assert!(Error::Connection("timeout".into()).invalidates_session());
        assert!(Error::Protocol("NO [CANNOT]".into()).invalidates_session());
        assert!(!Error::Confirmation("bad url".into()).invalidates_session());
        assert!(!Error::Config("IMAP_HOST".into()).invalidates_session());
    }

    #[test]
    fn test_imap_io_error_is_connection() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err: Error = async_imap::error::Error::Io(io).into();
        assert!(matches!(err, Error::Connection(_)));
    }

    #[test]
    fn test_imap_error_keeps_step() {
        let err = Error::imap("SELECT INBOX", async_imap::error::Error::No("no such mailbox".into()));
        assert!(matches!(err, Error::Protocol(_)));
        assert!(err.to_string().contains("SELECT INBOX"));
    }
}
