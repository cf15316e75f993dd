//! The Transport Adapter's TLS-mode half: `push`/`pull` over a raw
//! [`DeviceConnection`], used by the TLS Driver as its record-layer sink
//! and source.

use crate::core::{DeviceConnection, TransportError};

/// Bridges a [`DeviceConnection`] to the push/pull shape the TLS Driver
/// expects. `pull` loops internally so it always returns exactly the
/// number of bytes requested, since the TLS record layer cannot act on a
/// short read.
pub struct TransportAdapter<C> {
    connection: C,
}

impl<C: DeviceConnection> TransportAdapter<C> {
    /// Wrap a device connection for TLS-mode use.
    pub fn new(connection: C) -> Self {
        Self { connection }
    }

    /// Recover the underlying connection once TLS has shut down.
    pub fn into_inner(self) -> C {
        self.connection
    }

    /// Read exactly `n` bytes, retrying partial reads until satisfied or
    /// the connection closes early.
    pub async fn pull(&mut self, n: usize) -> Result<Vec<u8>, TransportError> {
        let mut out = vec![0u8; n];
        let mut filled = 0;
        while filled < n {
            let read = self.connection.read(&mut out[filled..]).await?;
            if read == 0 {
                return Err(TransportError::ShortRead {
                    read: filled,
                    expected: n,
                });
            }
            filled += read;
        }
        Ok(out)
    }

    /// Write the full byte slice.
    pub async fn push(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        self.connection.write_all(bytes).await
    }
}
