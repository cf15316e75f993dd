//! The TLS Driver (component C): drives a client TLS handshake over the
//! Transport Adapter's push/pull callbacks, using legacy parameters old
//! lockdown devices require — RSA/anonymous-DH key exchange, AES-CBC
//! ciphers, HMAC-SHA1/MD5, null compression, and a protocol floor as low
//! as SSL 3.0.
//!
//! `rustls` cannot negotiate any of the above, so this driver is built on
//! `openssl`/`tokio-openssl` instead, the same swap the wider idevice Rust
//! ecosystem makes for this exact protocol.
//!
//! OpenSSL's handshake and record I/O are synchronous; [`BlockingIo`]
//! bridges that to the async [`TransportAdapter`] by calling
//! [`tokio::runtime::Handle::block_on`] from inside [`tokio::task::spawn_blocking`],
//! which is the standard way to host a blocking library inside an async
//! client without starving the runtime.

use std::io::{self, Read, Write};

use openssl::pkey::PKey;
use openssl::ssl::{SslConnector, SslMethod, SslStream, SslVerifyMode, SslVersion};
use openssl::x509::X509;

use crate::adapter::TransportAdapter;
use crate::core::{DeviceConnection, TransportError};
use crate::framed::{decode_frame_body, decode_frame_len, encode_frame};

/// Host certificate and private key presented during the handshake, loaded
/// from the preference store.
#[derive(Clone)]
pub struct TlsCredentials {
    /// Host certificate, PEM-encoded.
    pub host_cert_pem: Vec<u8>,
    /// Host private key, PEM-encoded.
    pub host_key_pem: Vec<u8>,
}

/// The lowest protocol version the driver will offer. Most lockdown
/// devices speak something in the SSL3/TLS1.0 era; a handshake that
/// negotiates lower than this is refused rather than silently accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsFloor {
    /// SSL 3.0, the oldest floor this driver will set.
    Ssl3,
    /// TLS 1.0.
    Tls1_0,
}

impl TlsFloor {
    fn to_openssl(self) -> SslVersion {
        match self {
            TlsFloor::Ssl3 => SslVersion::SSL3,
            TlsFloor::Tls1_0 => SslVersion::TLS1,
        }
    }
}

/// A small `Read + Write` shim over a [`TransportAdapter`], so OpenSSL's
/// synchronous `SslStream` can drive the handshake and record layer
/// without knowing the underlying transport is async.
struct BlockingIo<C: DeviceConnection> {
    adapter: TransportAdapter<C>,
    handle: tokio::runtime::Handle,
}

impl<C: DeviceConnection> Read for BlockingIo<C> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = buf.len();
        if n == 0 {
            return Ok(0);
        }
        let pulled = self
            .handle
            .block_on(self.adapter.pull(n))
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
        buf[..pulled.len()].copy_from_slice(&pulled);
        Ok(pulled.len())
    }
}

impl<C: DeviceConnection> Write for BlockingIo<C> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.handle
            .block_on(self.adapter.push(buf))
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn build_connector(
    floor: TlsFloor,
    credentials: &TlsCredentials,
) -> Result<SslConnector, TransportError> {
    let mut builder =
        SslConnector::builder(SslMethod::tls()).map_err(|e| TransportError::Tls(e.to_string()))?;

    builder
        .set_min_proto_version(Some(floor.to_openssl()))
        .map_err(|e| TransportError::Tls(e.to_string()))?;
    builder
        .set_max_proto_version(None)
        .map_err(|e| TransportError::Tls(e.to_string()))?;

    // Devices old enough to require SSL3 also require ciphers modern
    // OpenSSL disables by default: anonymous and RSA key exchange, CBC
    // block ciphers, and HMAC-SHA1/MD5 MACs. @SECLEVEL=0 lifts OpenSSL's
    // minimum security floor so this list can actually be negotiated.
    builder
        .set_cipher_list("ALL:eNULL:aNULL:@SECLEVEL=0")
        .map_err(|e| TransportError::Tls(e.to_string()))?;

    // The device presents a self-signed certificate whose trust is
    // established out-of-band by pairing, not by a CA chain; OpenSSL's
    // usual verification has nothing to check it against.
    builder.set_verify(SslVerifyMode::NONE);

    let cert =
        X509::from_pem(&credentials.host_cert_pem).map_err(|e| TransportError::Tls(e.to_string()))?;
    let key = PKey::private_key_from_pem(&credentials.host_key_pem)
        .map_err(|e| TransportError::Tls(e.to_string()))?;
    builder
        .set_certificate(&cert)
        .map_err(|e| TransportError::Tls(e.to_string()))?;
    builder
        .set_private_key(&key)
        .map_err(|e| TransportError::Tls(e.to_string()))?;

    Ok(builder.build())
}

/// An established TLS session riding on a device connection. All reads and
/// writes after [`TlsSession::handshake`] go through the encrypted record
/// layer.
pub struct TlsSession<C: DeviceConnection + 'static> {
    stream: Option<SslStream<BlockingIo<C>>>,
}

impl<C: DeviceConnection + 'static> TlsSession<C> {
    /// Drive the blocking client handshake to completion over `adapter`.
    ///
    /// Runs on a dedicated blocking thread via [`tokio::task::spawn_blocking`]
    /// so the handshake's synchronous record I/O never blocks the runtime's
    /// async worker threads.
    pub async fn handshake(
        adapter: TransportAdapter<C>,
        floor: TlsFloor,
        credentials: TlsCredentials,
    ) -> Result<Self, TransportError> {
        let io = BlockingIo {
            adapter,
            handle: tokio::runtime::Handle::current(),
        };
        let connector = build_connector(floor, &credentials)?;

        let stream = tokio::task::spawn_blocking(move || {
            connector
                .connect("lockdownd", io)
                .map_err(|e| TransportError::Tls(e.to_string()))
        })
        .await
        .map_err(|e| TransportError::Tls(e.to_string()))??;

        Ok(Self {
            stream: Some(stream),
        })
    }

    /// Write the full buffer through the TLS record layer.
    pub async fn write_all(&mut self, bytes: Vec<u8>) -> Result<(), TransportError> {
        let mut stream = self.take_stream()?;
        let (stream, result) = tokio::task::spawn_blocking(move || {
            let result = stream.write_all(&bytes).and_then(|()| stream.flush());
            (stream, result)
        })
        .await
        .map_err(|e| TransportError::Tls(e.to_string()))?;
        self.stream = Some(stream);
        result.map_err(|e| TransportError::Tls(e.to_string()))
    }

    /// Read exactly `len` bytes through the TLS record layer.
    pub async fn read_exact(&mut self, len: usize) -> Result<Vec<u8>, TransportError> {
        let mut stream = self.take_stream()?;
        let (stream, result) = tokio::task::spawn_blocking(move || {
            let mut buf = vec![0u8; len];
            let result = stream.read_exact(&mut buf).map(|()| buf);
            (stream, result)
        })
        .await
        .map_err(|e| TransportError::Tls(e.to_string()))?;
        self.stream = Some(stream);
        result.map_err(|e| TransportError::Tls(e.to_string()))
    }

    /// Serialize and send `value` as one length-prefixed frame over the
    /// TLS record layer.
    pub async fn send_plist(&mut self, value: &plist::Value) -> Result<(), TransportError> {
        self.write_all(encode_frame(value)?).await
    }

    /// Receive and parse the next length-prefixed frame over the TLS
    /// record layer.
    pub async fn receive_plist(&mut self) -> Result<plist::Value, TransportError> {
        let header = self.read_exact(4).await?;
        let len = decode_frame_len(&header)?;
        let body = self.read_exact(len).await?;
        decode_frame_body(body)
    }

    /// Close the TLS session with a bidirectional close-notify. A session
    /// is never reused after TLS has ended; the underlying device
    /// connection is dropped along with it.
    pub async fn shutdown(mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = tokio::task::spawn_blocking(move || stream.shutdown()).await;
        }
    }

    fn take_stream(&mut self) -> Result<SslStream<BlockingIo<C>>, TransportError> {
        self.stream
            .take()
            .ok_or_else(|| TransportError::Tls("TLS session already shut down".to_string()))
    }
}

#[async_trait::async_trait]
impl<C: DeviceConnection + 'static> crate::core::PlistChannel for TlsSession<C> {
    async fn send_plist(&mut self, value: &plist::Value) -> Result<(), TransportError> {
        TlsSession::send_plist(self, value).await
    }

    async fn receive_plist(&mut self) -> Result<plist::Value, TransportError> {
        TlsSession::receive_plist(self).await
    }
}
