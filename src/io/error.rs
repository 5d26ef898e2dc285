// src/io/error.rs
//
// Error taxonomy shared by the transport, the protocol encoder and the
// session manager. Every failure that reaches a caller is one of these.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IoError {
    /// Requested port/device is absent
    #[error("Port not found: {0}")]
    NotFound(String),
    /// Device is exclusively held by another process
    #[error("Port already in use: {0}")]
    AlreadyInUse(String),
    /// Operation not allowed in the current session state
    #[error("{0}")]
    InvalidState(String),
    /// Unrecognised sentence type, unsupported baud, malformed argument
    #[error("Validation error: {0}")]
    Validation(String),
    /// Read/write/open failure on the transport
    #[error("I/O error: {0}")]
    Io(String),
    /// Aborted by disconnect or shutdown. Never shown to an operator.
    #[error("Operation cancelled")]
    Cancelled,
}

impl IoError {
    /// Stable identifier for API consumers.
    pub fn kind(&self) -> &'static str {
        match self {
            IoError::NotFound(_) => "not_found",
            IoError::AlreadyInUse(_) => "already_in_use",
            IoError::InvalidState(_) => "invalid_state",
            IoError::Validation(_) => "validation_error",
            IoError::Io(_) => "io_error",
            IoError::Cancelled => "cancelled",
        }
    }

    pub fn not_connected() -> Self {
        IoError::InvalidState("Not connected".to_string())
    }
}

impl From<std::io::Error> for IoError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::NotFound => IoError::NotFound(e.to_string()),
            std::io::ErrorKind::InvalidInput => IoError::Validation(e.to_string()),
            _ => IoError::Io(e.to_string()),
        }
    }
}

impl From<serialport::Error> for IoError {
    fn from(e: serialport::Error) -> Self {
        let description = e.description.clone();
        let lowered = description.to_lowercase();
        // EBUSY surfaces as NoDevice or Io depending on platform; the text is the reliable signal
        if lowered.contains("busy") || lowered.contains("in use") || lowered.contains("access is denied") {
            return IoError::AlreadyInUse(description);
        }
        match e.kind() {
            serialport::ErrorKind::NoDevice => IoError::NotFound(description),
            serialport::ErrorKind::InvalidInput => IoError::Validation(description),
            serialport::ErrorKind::Io(std::io::ErrorKind::NotFound) => IoError::NotFound(description),
            _ => IoError::Io(description),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds_are_stable() {
        assert_eq!(IoError::NotFound("x".into()).kind(), "not_found");
        assert_eq!(IoError::AlreadyInUse("x".into()).kind(), "already_in_use");
        assert_eq!(IoError::not_connected().kind(), "invalid_state");
        assert_eq!(IoError::Validation("x".into()).kind(), "validation_error");
        assert_eq!(IoError::Io("x".into()).kind(), "io_error");
        assert_eq!(IoError::Cancelled.kind(), "cancelled");
    }

    #[test]
    fn test_serialport_errors_are_classified() {
        let missing = serialport::Error::new(serialport::ErrorKind::NoDevice, "No such file or directory");
        assert!(matches!(IoError::from(missing), IoError::NotFound(_)));

        let busy = serialport::Error::new(serialport::ErrorKind::NoDevice, "Device or resource busy");
        assert!(matches!(IoError::from(busy), IoError::AlreadyInUse(_)));

        let bad_baud = serialport::Error::new(serialport::ErrorKind::InvalidInput, "Invalid baud rate");
        assert!(matches!(IoError::from(bad_baud), IoError::Validation(_)));
    }

    #[test]
    fn test_std_io_errors_are_classified() {
        let e = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone");
        assert!(matches!(IoError::from(e), IoError::Io(_)));
        let e = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert!(matches!(IoError::from(e), IoError::NotFound(_)));
    }
}
