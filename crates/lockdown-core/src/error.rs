//! The lockdown client error taxonomy.
//!
//! Every fallible operation in this workspace returns exactly one of the
//! variants below; there is no generic catch-all error besides `Unknown`,
//! which callers should treat as fatal.

use thiserror::Error;

/// Result type alias used throughout the lockdown client crates.
pub type Result<T> = std::result::Result<T, LockdownError>;

/// The error taxonomy for the lockdown client state machine.
#[derive(Error, Debug, Clone)]
pub enum LockdownError {
    /// A nil handle, nil required field, or a conflicting precondition was supplied.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The underlying multiplexer refused the connection or errored at the byte level.
    #[error("multiplexer error: {0}")]
    MuxError(String),

    /// Framing or decoding of a response plist failed, or the response was empty.
    #[error("plist error: {0}")]
    PlistError(String),

    /// The device rejected pair/validate/unpair without a recognized sub-reason.
    #[error("pairing failed: {0}")]
    PairingFailed(String),

    /// Pair was rejected because the device is locked with a passcode.
    #[error("device is password protected")]
    PasswordProtected,

    /// `StartSession` was rejected because the host is not trusted.
    #[error("host id not recognized by device")]
    InvalidHostId,

    /// The operation requires an open session but none is open.
    #[error("no running session")]
    NoRunningSession,

    /// `StartService` returned failure.
    #[error("start service failed: {0}")]
    StartServiceFailed(String),

    /// `Activate` returned failure.
    #[error("activation failed: {0}")]
    ActivationFailed(String),

    /// The host preference store is missing required material.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// TLS handshake or transport failure.
    #[error("TLS error: {0}")]
    SslError(String),

    /// An expected response field was missing.
    #[error("not enough data: missing field {0:?}")]
    NotEnoughData(&'static str),

    /// Local filesystem I/O failed while reading or writing persisted state.
    #[error("I/O error: {0}")]
    Io(String),

    /// Catch-all for failures that don't fit the taxonomy above; treat as fatal.
    #[error("unknown error: {0}")]
    Unknown(String),
}

impl From<std::io::Error> for LockdownError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl LockdownError {
    /// Map a pairing failure's `Error` string onto a typed variant.
    ///
    /// Only `PasswordProtected` is a recognized sub-reason on the wire for
    /// `Pair`/`ValidatePair`/`Unpair`; every other string collapses into
    /// [`LockdownError::PairingFailed`] while retaining the raw text for
    /// diagnostics.
    #[must_use]
    pub fn from_pairing_error_string(raw: &str) -> Self {
        match raw {
            "PasswordProtected" => Self::PasswordProtected,
            other => Self::PairingFailed(other.to_string()),
        }
    }

    /// Map a `StartSession` failure's `Error` string onto a typed variant.
    #[must_use]
    pub fn from_session_error_string(raw: &str) -> Self {
        match raw {
            "InvalidHostID" => Self::InvalidHostId,
            other => Self::Unknown(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_protected_is_recognized() {
        assert!(matches!(
            LockdownError::from_pairing_error_string("PasswordProtected"),
            LockdownError::PasswordProtected
        ));
    }

    #[test]
    fn unrecognized_pairing_error_collapses_to_generic_with_raw_text() {
        match LockdownError::from_pairing_error_string("SomethingElse") {
            LockdownError::PairingFailed(raw) => assert_eq!(raw, "SomethingElse"),
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn invalid_host_id_is_recognized_on_start_session() {
        assert!(matches!(
            LockdownError::from_session_error_string("InvalidHostID"),
            LockdownError::InvalidHostId
        ));
    }
}
