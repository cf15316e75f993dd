//! External collaborators and errors for the Transport Adapter (component B).
//!
//! Two traits describe the boundaries this crate sits between:
//!
//! - [`DeviceConnection`] is the packet-oriented byte stream to the device,
//!   supplied by the USB multiplexer. This crate never opens that connection
//!   itself; it only reads and writes through the trait.
//! - [`PlistChannel`] is the property-list-service collaborator used while a
//!   session is plaintext: it handles length prefixing and XML plist framing
//!   directly on top of a [`DeviceConnection`].

use async_trait::async_trait;
use thiserror::Error;

/// Errors raised while moving bytes or plists across a device connection.
#[derive(Error, Debug, Clone)]
pub enum TransportError {
    /// The underlying multiplexer connection was closed or refused.
    #[error("device connection error: {0}")]
    Connection(String),

    /// The connection closed before the requested number of bytes arrived.
    #[error("connection closed after {read} of {expected} expected bytes")]
    ShortRead {
        /// Bytes actually read before the connection closed.
        read: usize,
        /// Bytes the caller required.
        expected: usize,
    },

    /// A length-prefixed frame declared a size this crate refuses to allocate for.
    #[error("oversized frame: {0} bytes")]
    FrameTooLarge(usize),

    /// The plist payload failed to parse or serialize.
    #[error("plist framing error: {0}")]
    Plist(String),

    /// TLS record layer failure, reported by the TLS Driver.
    #[error("TLS error: {0}")]
    Tls(String),
}

impl From<TransportError> for lockdown_core::LockdownError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Tls(reason) => Self::SslError(reason),
            other => Self::MuxError(other.to_string()),
        }
    }
}

/// A packet-oriented byte connection to a single device, as handed out by
/// the USB multiplexer. Implementations need not preserve message
/// boundaries; callers that need them build framing on top (see
/// [`PlistChannel`] and the `adapter` module's TLS push/pull).
#[async_trait]
pub trait DeviceConnection: Send {
    /// Read at least one and at most `buf.len()` bytes. Returns `0` only on
    /// a clean connection close.
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;

    /// Write the entire buffer, looping internally if the underlying
    /// connection accepts writes in smaller chunks.
    async fn write_all(&mut self, buf: &[u8]) -> Result<(), TransportError>;
}

/// The property-list-service collaborator: plaintext framing and plist
/// (de)serialization on top of a [`DeviceConnection`].
#[async_trait]
pub trait PlistChannel: Send {
    /// Serialize `value` and send it as one framed message.
    async fn send_plist(&mut self, value: &plist::Value) -> Result<(), TransportError>;

    /// Receive and parse the next framed message.
    async fn receive_plist(&mut self) -> Result<plist::Value, TransportError>;
}
