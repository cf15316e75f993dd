//! The property-list-service collaborator's concrete, plaintext implementation:
//! a 4-byte big-endian length prefix followed by an XML property list, laid
//! directly on top of a [`DeviceConnection`].
//!
//! Once a session upgrades to TLS the same framing continues, just read and
//! written through the TLS Driver's encrypted channel instead (see `tls.rs`).

use byteorder::{BigEndian, ByteOrder};
use plist::Value;

use crate::core::{DeviceConnection, PlistChannel, TransportError};

/// Frames larger than this are rejected outright; legitimate lockdown
/// responses are at most a few kilobytes.
pub(crate) const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Serialize `value` to the length-prefixed XML-plist wire frame shared by
/// plaintext and TLS channels alike.
pub(crate) fn encode_frame(value: &Value) -> Result<Vec<u8>, TransportError> {
    let mut body = Vec::new();
    value
        .to_writer_xml(&mut body)
        .map_err(|e| TransportError::Plist(e.to_string()))?;

    let mut frame = Vec::with_capacity(4 + body.len());
    frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Decode a frame's 4-byte length prefix, validating it against
/// [`MAX_FRAME_LEN`].
pub(crate) fn decode_frame_len(header: &[u8]) -> Result<usize, TransportError> {
    let len = BigEndian::read_u32(header) as usize;
    if len > MAX_FRAME_LEN {
        return Err(TransportError::FrameTooLarge(len));
    }
    Ok(len)
}

/// Parse a frame's XML-plist body.
pub(crate) fn decode_frame_body(body: Vec<u8>) -> Result<Value, TransportError> {
    Value::from_reader_xml(std::io::Cursor::new(body)).map_err(|e| TransportError::Plist(e.to_string()))
}

/// A [`PlistChannel`] that speaks length-prefixed XML plists over a raw
/// [`DeviceConnection`].
#[derive(Debug)]
pub struct FramedPlistChannel<C> {
    connection: C,
}

impl<C: DeviceConnection> FramedPlistChannel<C> {
    /// Wrap a device connection in length-prefixed plist framing.
    pub fn new(connection: C) -> Self {
        Self { connection }
    }

    /// Recover the underlying connection, e.g. to hand it to the TLS Driver
    /// once a session upgrades.
    pub fn into_inner(self) -> C {
        self.connection
    }

    async fn read_exact(&mut self, len: usize) -> Result<Vec<u8>, TransportError> {
        let mut buf = vec![0u8; len];
        let mut filled = 0;
        while filled < len {
            let n = self.connection.read(&mut buf[filled..]).await?;
            if n == 0 {
                return Err(TransportError::ShortRead {
                    read: filled,
                    expected: len,
                });
            }
            filled += n;
        }
        Ok(buf)
    }
}

#[async_trait::async_trait]
impl<C: DeviceConnection> PlistChannel for FramedPlistChannel<C> {
    async fn send_plist(&mut self, value: &Value) -> Result<(), TransportError> {
        let frame = encode_frame(value)?;
        self.connection.write_all(&frame).await
    }

    async fn receive_plist(&mut self) -> Result<Value, TransportError> {
        let header = self.read_exact(4).await?;
        let len = decode_frame_len(&header)?;
        let body = self.read_exact(len).await?;
        decode_frame_body(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockDeviceConnection;
    use plist::Dictionary;

    fn sample_request() -> Value {
        let mut dict = Dictionary::new();
        dict.insert("Request".to_string(), Value::String("QueryType".to_string()));
        Value::Dictionary(dict)
    }

    #[tokio::test]
    async fn send_then_receive_round_trips_through_a_shared_buffer() {
        let (client_conn, server_conn) = MockDeviceConnection::paired();
        let mut client = FramedPlistChannel::new(client_conn);
        let mut server = FramedPlistChannel::new(server_conn);

        client.send_plist(&sample_request()).await.unwrap();
        let received = server.receive_plist().await.unwrap();
        assert_eq!(received.as_dictionary().unwrap().get("Request"), sample_request().as_dictionary().unwrap().get("Request"));
    }

    #[tokio::test]
    async fn oversized_length_prefix_is_rejected_without_reading_body() {
        let (mut client_conn, server_conn) = MockDeviceConnection::paired();
        client_conn
            .write_all(&((MAX_FRAME_LEN as u32) + 1).to_be_bytes())
            .await
            .unwrap();
        let mut server = FramedPlistChannel::new(server_conn);
        assert!(matches!(
            server.receive_plist().await,
            Err(TransportError::FrameTooLarge(_))
        ));
    }

    #[tokio::test]
    async fn connection_closed_mid_frame_is_a_short_read() {
        let (mut client_conn, server_conn) = MockDeviceConnection::paired();
        client_conn.write_all(&20u32.to_be_bytes()).await.unwrap();
        client_conn.write_all(b"short").await.unwrap();
        client_conn.close();
        let mut server = FramedPlistChannel::new(server_conn);
        assert!(matches!(
            server.receive_plist().await,
            Err(TransportError::ShortRead { .. })
        ));
    }
}
