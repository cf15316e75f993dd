//! # Lockdown Transport
//!
//! The Transport Adapter (component B) and TLS Driver (component C): moves
//! plists and raw TLS record bytes across a device connection supplied by
//! the USB multiplexer.
//!
//! ## Module organization
//!
//! ```text
//! lockdown-transport/
//! ├── core/     # DeviceConnection, PlistChannel collaborator traits, TransportError
//! ├── framed/   # length-prefixed plist framing over a DeviceConnection (plaintext)
//! ├── adapter/  # push/pull shim handed to the TLS Driver
//! ├── tls/      # TLS Driver: legacy-parameter handshake and record I/O
//! └── mock/     # in-memory DeviceConnection test double
//! ```
//!
//! A session starts in plaintext, framed by [`FramedPlistChannel`]. If
//! `StartSession` enables TLS, the raw connection is handed to
//! [`TlsSession::handshake`] via a [`TransportAdapter`], and all further
//! plists are length-prefixed the same way but carried over the encrypted
//! stream instead.

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub,
    clippy::all
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]

pub mod adapter;
pub mod core;
pub mod framed;
pub mod mock;
pub mod tls;

pub use adapter::TransportAdapter;
pub use core::{DeviceConnection, PlistChannel, TransportError};
pub use framed::FramedPlistChannel;
pub use mock::MockDeviceConnection;
pub use tls::{TlsCredentials, TlsFloor, TlsSession};
