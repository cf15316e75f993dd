//! # Lockdown Client
//!
//! The Session Manager (component F): drives the handshake, session
//! lifecycle, and request/response operations for a single device over a
//! [`lockdown_transport::DeviceConnection`].
//!
//! ## Architecture
//!
//! ```text
//! lockdown-client/
//! └── client/   # LockdownClient: handshake, StartSession/StopSession, operations
//! ```
//!
//! This crate sits above `lockdown-protocol` (request/response shapes),
//! `lockdown-transport` (framing and TLS), and `lockdown-pairing`
//! (certificates and `Pair`/`ValidatePair`/`Unpair`), which it composes into
//! one session handle.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use lockdown_core::{host::FilePreferenceStore, LockdownConfig};
//! use lockdown_client::LockdownClient;
//!
//! # async fn example(connection: impl lockdown_transport::DeviceConnection + 'static) -> lockdown_core::Result<()> {
//! let store = Arc::new(FilePreferenceStore::standard_location()?);
//! let mut client = LockdownClient::new(connection, store, LockdownConfig::default());
//! client.handshake().await?;
//! let device_name: plist::Value = client.get_value(None, Some("DeviceName")).await?;
//! client.close().await;
//! # Ok(())
//! # }
//! ```

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub,
    clippy::all
)]
#![deny(unsafe_code)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]

pub mod client;

pub use client::LockdownClient;

#[cfg(test)]
mod tests {
    use std::io::{self, Read, Write};
    use std::sync::Arc;
    use std::time::Duration;

    use openssl::pkey::{PKey, Private};
    use openssl::rsa::Rsa;
    use openssl::ssl::{SslAcceptor, SslMethod, SslVerifyMode};
    use openssl::x509::{X509, X509NameBuilder};
    use plist::{Dictionary, Value};
    use tempfile::tempdir;

    use lockdown_core::host::{FilePreferenceStore, PreferenceStore};
    use lockdown_core::{DeviceUdid, LockdownConfig, LockdownError};
    use lockdown_protocol::verb;
    use lockdown_transport::{MockDeviceConnection, TransportAdapter};

    use super::*;

    fn response(request: &str, result: &str) -> Value {
        let mut dict = Dictionary::new();
        dict.insert("Request".to_string(), Value::String(request.to_string()));
        dict.insert("Result".to_string(), Value::String(result.to_string()));
        Value::Dictionary(dict)
    }

    fn get_value_response(request_key: &str, field: &str, value: Value) -> Value {
        let mut dict = response(request_key, "Success").into_dictionary().unwrap();
        dict.insert(field.to_string(), value);
        Value::Dictionary(dict)
    }

    /// Drives the server half of a scripted handshake over the mock
    /// transport's paired connection: QueryType, UDID lookup, pairing
    /// (Pair + ValidatePair, since no device key is stored yet), and a
    /// `StartSession` that does not request TLS.
    async fn run_cold_handshake_server(mut server: lockdown_transport::FramedPlistChannel<MockDeviceConnection>) {
        use lockdown_transport::PlistChannel;
        use openssl::rsa::Rsa;

        // QueryType
        let _ = server.receive_plist().await.unwrap();
        server
            .send_plist(&get_value_response(
                verb::QUERY_TYPE,
                "Type",
                Value::String(lockdown_core::LOCKDOWN_SERVICE_TYPE.to_string()),
            ))
            .await
            .unwrap();

        // GetValue(UniqueDeviceID)
        let _ = server.receive_plist().await.unwrap();
        server
            .send_plist(&get_value_response(
                verb::GET_VALUE,
                "Value",
                Value::String("test-udid-0001".to_string()),
            ))
            .await
            .unwrap();

        let device_key = Rsa::generate(1024).unwrap().public_key_to_pem_pkcs1().unwrap();

        // Pair: GetValue(DevicePublicKey) then Pair
        let _ = server.receive_plist().await.unwrap();
        server
            .send_plist(&get_value_response(
                verb::GET_VALUE,
                "Value",
                Value::Data(device_key.clone()),
            ))
            .await
            .unwrap();
        let _ = server.receive_plist().await.unwrap();
        server.send_plist(&response(verb::PAIR, "Success")).await.unwrap();

        // ValidatePair: GetValue(DevicePublicKey) then ValidatePair
        let _ = server.receive_plist().await.unwrap();
        server
            .send_plist(&get_value_response(
                verb::GET_VALUE,
                "Value",
                Value::Data(device_key),
            ))
            .await
            .unwrap();
        let _ = server.receive_plist().await.unwrap();
        server
            .send_plist(&response(verb::VALIDATE_PAIR, "Success"))
            .await
            .unwrap();

        // StartSession, no TLS requested
        let _ = server.receive_plist().await.unwrap();
        server
            .send_plist(&get_value_response(
                verb::START_SESSION,
                "SessionID",
                Value::String("session-1".to_string()),
            ))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn cold_handshake_pairs_and_opens_a_plaintext_session() {
        let dir = tempdir().unwrap();
        let store = Arc::new(FilePreferenceStore::new(dir.path()).unwrap());
        let (client_conn, server_conn) = MockDeviceConnection::paired();
        let server = lockdown_transport::FramedPlistChannel::new(server_conn);

        let server_task = tokio::spawn(run_cold_handshake_server(server));

        let mut client = LockdownClient::new(client_conn, store.clone(), LockdownConfig::default());
        client.handshake().await.unwrap();

        server_task.await.unwrap();

        assert_eq!(client.udid(), Some(&DeviceUdid::from("test-udid-0001")));
        assert_eq!(client.session_id().unwrap().as_ref(), "session-1");
        assert!(store.has_device_public_key(&DeviceUdid::from("test-udid-0001")));
    }

    #[tokio::test]
    async fn warm_reconnect_skips_pair_when_a_device_key_is_already_stored() {
        let dir = tempdir().unwrap();
        let store = Arc::new(FilePreferenceStore::new(dir.path()).unwrap());
        let udid = DeviceUdid::from("test-udid-0001");
        store.set_device_public_key(&udid, b"already-paired").unwrap();

        let (client_conn, server_conn) = MockDeviceConnection::paired();
        let mut server = lockdown_transport::FramedPlistChannel::new(server_conn);

        let server_task = tokio::spawn(async move {
            use lockdown_transport::PlistChannel;
            use openssl::rsa::Rsa;

            let _ = server.receive_plist().await.unwrap();
            server
                .send_plist(&get_value_response(
                    verb::QUERY_TYPE,
                    "Type",
                    Value::String(lockdown_core::LOCKDOWN_SERVICE_TYPE.to_string()),
                ))
                .await
                .unwrap();

            let _ = server.receive_plist().await.unwrap();
            server
                .send_plist(&get_value_response(
                    verb::GET_VALUE,
                    "Value",
                    Value::String("test-udid-0001".to_string()),
                ))
                .await
                .unwrap();

            let device_key = Rsa::generate(1024).unwrap().public_key_to_pem_pkcs1().unwrap();

            // Only ValidatePair is expected; no Pair round trip.
            let _ = server.receive_plist().await.unwrap();
            server
                .send_plist(&get_value_response(
                    verb::GET_VALUE,
                    "Value",
                    Value::Data(device_key),
                ))
                .await
                .unwrap();
            let _ = server.receive_plist().await.unwrap();
            server
                .send_plist(&response(verb::VALIDATE_PAIR, "Success"))
                .await
                .unwrap();

            let _ = server.receive_plist().await.unwrap();
            server
                .send_plist(&get_value_response(
                    verb::START_SESSION,
                    "SessionID",
                    Value::String("session-2".to_string()),
                ))
                .await
                .unwrap();
        });

        let mut client = LockdownClient::new(client_conn, store, LockdownConfig::default());
        client.handshake().await.unwrap();
        server_task.await.unwrap();

        assert_eq!(client.session_id().unwrap().as_ref(), "session-2");
    }

    #[tokio::test]
    async fn password_protected_device_surfaces_the_typed_error() {
        let dir = tempdir().unwrap();
        let store = Arc::new(FilePreferenceStore::new(dir.path()).unwrap());
        let (client_conn, server_conn) = MockDeviceConnection::paired();
        let mut server = lockdown_transport::FramedPlistChannel::new(server_conn);

        let server_task = tokio::spawn(async move {
            use lockdown_transport::PlistChannel;

            let _ = server.receive_plist().await.unwrap();
            server
                .send_plist(&get_value_response(
                    verb::QUERY_TYPE,
                    "Type",
                    Value::String(lockdown_core::LOCKDOWN_SERVICE_TYPE.to_string()),
                ))
                .await
                .unwrap();

            let _ = server.receive_plist().await.unwrap();
            server
                .send_plist(&get_value_response(
                    verb::GET_VALUE,
                    "Value",
                    Value::String("test-udid-0001".to_string()),
                ))
                .await
                .unwrap();

            let device_key = openssl::rsa::Rsa::generate(1024)
                .unwrap()
                .public_key_to_pem_pkcs1()
                .unwrap();
            let _ = server.receive_plist().await.unwrap();
            server
                .send_plist(&get_value_response(
                    verb::GET_VALUE,
                    "Value",
                    Value::Data(device_key),
                ))
                .await
                .unwrap();

            let _ = server.receive_plist().await.unwrap();
            let mut failure = response(verb::PAIR, "Failure").into_dictionary().unwrap();
            failure.insert(
                "Error".to_string(),
                Value::String("PasswordProtected".to_string()),
            );
            server.send_plist(&Value::Dictionary(failure)).await.unwrap();
        });

        let mut client = LockdownClient::new(client_conn, store, LockdownConfig::default());
        let err = client.handshake().await.unwrap_err();
        server_task.await.unwrap();

        assert!(matches!(err, LockdownError::PasswordProtected));
    }

    #[tokio::test]
    async fn stale_host_id_surfaces_invalid_host_id_on_start_session() {
        let dir = tempdir().unwrap();
        let store = Arc::new(FilePreferenceStore::new(dir.path()).unwrap());
        let udid = DeviceUdid::from("test-udid-0001");
        store.set_device_public_key(&udid, b"already-paired").unwrap();

        let (client_conn, server_conn) = MockDeviceConnection::paired();
        let mut server = lockdown_transport::FramedPlistChannel::new(server_conn);

        let server_task = tokio::spawn(async move {
            use lockdown_transport::PlistChannel;
            use openssl::rsa::Rsa;

            let _ = server.receive_plist().await.unwrap();
            server
                .send_plist(&get_value_response(
                    verb::QUERY_TYPE,
                    "Type",
                    Value::String(lockdown_core::LOCKDOWN_SERVICE_TYPE.to_string()),
                ))
                .await
                .unwrap();

            let _ = server.receive_plist().await.unwrap();
            server
                .send_plist(&get_value_response(
                    verb::GET_VALUE,
                    "Value",
                    Value::String("test-udid-0001".to_string()),
                ))
                .await
                .unwrap();

            let device_key = Rsa::generate(1024).unwrap().public_key_to_pem_pkcs1().unwrap();
            let _ = server.receive_plist().await.unwrap();
            server
                .send_plist(&get_value_response(
                    verb::GET_VALUE,
                    "Value",
                    Value::Data(device_key),
                ))
                .await
                .unwrap();
            let _ = server.receive_plist().await.unwrap();
            server
                .send_plist(&response(verb::VALIDATE_PAIR, "Success"))
                .await
                .unwrap();

            let _ = server.receive_plist().await.unwrap();
            let mut failure = response(verb::START_SESSION, "Failure").into_dictionary().unwrap();
            failure.insert("Error".to_string(), Value::String("InvalidHostID".to_string()));
            server.send_plist(&Value::Dictionary(failure)).await.unwrap();
        });

        let mut client = LockdownClient::new(client_conn, store, LockdownConfig::default());
        let err = client.handshake().await.unwrap_err();
        server_task.await.unwrap();

        assert!(matches!(err, LockdownError::InvalidHostId));
    }

    #[tokio::test]
    async fn start_service_without_a_session_is_rejected_locally() {
        let dir = tempdir().unwrap();
        let store = Arc::new(FilePreferenceStore::new(dir.path()).unwrap());
        let (client_conn, _server_conn) = MockDeviceConnection::paired();
        let mut client = LockdownClient::new(client_conn, store, LockdownConfig::default());

        let err = client.start_service("com.apple.mobile.diagnostics_relay").await.unwrap_err();
        assert!(matches!(err, LockdownError::NoRunningSession));
    }

    /// A `Read + Write` bridge from the device's side of the mock connection
    /// onto OpenSSL's synchronous `SslStream`, the same trick `tls.rs` plays
    /// on the client side.
    struct DeviceIo {
        adapter: TransportAdapter<MockDeviceConnection>,
        handle: tokio::runtime::Handle,
    }

    impl Read for DeviceIo {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if buf.is_empty() {
                return Ok(0);
            }
            let pulled = self
                .handle
                .block_on(self.adapter.pull(buf.len()))
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
            buf[..pulled.len()].copy_from_slice(&pulled);
            Ok(pulled.len())
        }
    }

    impl Write for DeviceIo {
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

    fn device_tls_identity() -> (X509, PKey<Private>) {
        let key = PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap();
        let mut name = X509NameBuilder::new().unwrap();
        name.append_entry_by_text("CN", "test device").unwrap();
        let name = name.build();

        let mut builder = X509::builder().unwrap();
        builder.set_version(2).unwrap();
        builder
            .set_serial_number(&openssl::bn::BigNum::from_u32(1).unwrap().to_asn1_integer().unwrap())
            .unwrap();
        builder.set_subject_name(&name).unwrap();
        builder.set_issuer_name(&name).unwrap();
        builder.set_pubkey(&key).unwrap();
        builder
            .set_not_before(&openssl::asn1::Asn1Time::days_from_now(0).unwrap())
            .unwrap();
        builder
            .set_not_after(&openssl::asn1::Asn1Time::days_from_now(3650).unwrap())
            .unwrap();
        builder.sign(&key, openssl::hash::MessageDigest::sha256()).unwrap();
        (builder.build(), key)
    }

    /// Plays the device's half of a handshake that enables session TLS, then
    /// the StopSession/Goodbye/close-notify teardown, asserting the wire
    /// ordering the whole way. Panics (failing the test) if the client sends
    /// anything out of order.
    async fn run_tls_capable_device(connection: MockDeviceConnection) {
        use lockdown_transport::PlistChannel;

        let mut server = lockdown_transport::FramedPlistChannel::new(connection);

        let _ = server.receive_plist().await.unwrap();
        server
            .send_plist(&get_value_response(
                verb::QUERY_TYPE,
                "Type",
                Value::String(lockdown_core::LOCKDOWN_SERVICE_TYPE.to_string()),
            ))
            .await
            .unwrap();

        let _ = server.receive_plist().await.unwrap();
        server
            .send_plist(&get_value_response(
                verb::GET_VALUE,
                "Value",
                Value::String("test-udid-0001".to_string()),
            ))
            .await
            .unwrap();

        let device_key = Rsa::generate(1024).unwrap().public_key_to_pem_pkcs1().unwrap();

        let _ = server.receive_plist().await.unwrap();
        server
            .send_plist(&get_value_response(
                verb::GET_VALUE,
                "Value",
                Value::Data(device_key.clone()),
            ))
            .await
            .unwrap();
        let _ = server.receive_plist().await.unwrap();
        server.send_plist(&response(verb::PAIR, "Success")).await.unwrap();

        let _ = server.receive_plist().await.unwrap();
        server
            .send_plist(&get_value_response(
                verb::GET_VALUE,
                "Value",
                Value::Data(device_key),
            ))
            .await
            .unwrap();
        let _ = server.receive_plist().await.unwrap();
        server
            .send_plist(&response(verb::VALIDATE_PAIR, "Success"))
            .await
            .unwrap();

        let _ = server.receive_plist().await.unwrap();
        let mut start_session = get_value_response(
            verb::START_SESSION,
            "SessionID",
            Value::String("session-1".to_string()),
        )
        .into_dictionary()
        .unwrap();
        start_session.insert("EnableSessionSSL".to_string(), Value::Boolean(true));
        server.send_plist(&Value::Dictionary(start_session)).await.unwrap();

        // The session is now TLS. Take the raw connection back and run a
        // real handshake as the device's side of it.
        let connection = server.into_inner();
        let (device_cert, device_key) = device_tls_identity();
        let mut acceptor_builder = SslAcceptor::mozilla_intermediate_v5(SslMethod::tls()).unwrap();
        acceptor_builder
            .set_min_proto_version(Some(openssl::ssl::SslVersion::SSL3))
            .unwrap();
        acceptor_builder.set_max_proto_version(None).unwrap();
        acceptor_builder
            .set_cipher_list("ALL:eNULL:aNULL:@SECLEVEL=0")
            .unwrap();
        acceptor_builder.set_verify(SslVerifyMode::NONE);
        acceptor_builder.set_certificate(&device_cert).unwrap();
        acceptor_builder.set_private_key(&device_key).unwrap();
        let acceptor = acceptor_builder.build();

        let io = DeviceIo {
            adapter: TransportAdapter::new(connection),
            handle: tokio::runtime::Handle::current(),
        };
        let mut stream = tokio::task::spawn_blocking(move || acceptor.accept(io).unwrap())
            .await
            .unwrap();

        // StopSession must arrive first, over TLS.
        let (stream, stop_session) = tokio::task::spawn_blocking(move || {
            let mut header = [0u8; 4];
            stream.read_exact(&mut header).unwrap();
            let len = lockdown_transport_frame_len(&header);
            let mut body = vec![0u8; len];
            stream.read_exact(&mut body).unwrap();
            (stream, plist::Value::from_reader_xml(std::io::Cursor::new(body)).unwrap())
        })
        .await
        .unwrap();
        assert_eq!(
            stop_session.as_dictionary().and_then(|d| d.get("Request")).and_then(Value::as_string),
            Some(verb::STOP_SESSION)
        );
        let stop_session_reply = response(verb::STOP_SESSION, "Success");
        let mut stream = tokio::task::spawn_blocking(move || {
            let mut body = Vec::new();
            stop_session_reply.to_writer_xml(&mut body).unwrap();
            let mut frame = Vec::with_capacity(4 + body.len());
            frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
            frame.extend_from_slice(&body);
            stream.write_all(&frame).unwrap();
            stream.flush().unwrap();
            stream
        })
        .await
        .unwrap();

        // Goodbye must arrive next, still over the same TLS session.
        let (stream, goodbye) = tokio::task::spawn_blocking(move || {
            let mut header = [0u8; 4];
            stream.read_exact(&mut header).unwrap();
            let len = lockdown_transport_frame_len(&header);
            let mut body = vec![0u8; len];
            stream.read_exact(&mut body).unwrap();
            (stream, plist::Value::from_reader_xml(std::io::Cursor::new(body)).unwrap())
        })
        .await
        .unwrap();
        assert_eq!(
            goodbye.as_dictionary().and_then(|d| d.get("Request")).and_then(Value::as_string),
            Some(verb::GOODBYE)
        );
        let goodbye_reply = response(verb::GOODBYE, "Success");
        let mut stream = tokio::task::spawn_blocking(move || {
            let mut body = Vec::new();
            goodbye_reply.to_writer_xml(&mut body).unwrap();
            let mut frame = Vec::with_capacity(4 + body.len());
            frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
            frame.extend_from_slice(&body);
            stream.write_all(&frame).unwrap();
            stream.flush().unwrap();
            stream
        })
        .await
        .unwrap();

        // Only now does the transport shut down, via the TLS close-notify.
        tokio::task::spawn_blocking(move || {
            let _ = stream.shutdown();
            let _ = stream.shutdown();
        })
        .await
        .unwrap();
    }

    fn lockdown_transport_frame_len(header: &[u8]) -> usize {
        u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize
    }

    #[tokio::test]
    async fn cold_handshake_with_ssl_enabled_upgrades_to_a_real_tls_session() {
        let dir = tempdir().unwrap();
        let store = Arc::new(FilePreferenceStore::new(dir.path()).unwrap());
        let (client_conn, device_conn) = MockDeviceConnection::paired();

        let device_task = tokio::spawn(run_tls_capable_device(device_conn));

        let mut client = LockdownClient::new(client_conn, store, LockdownConfig::default());
        client.handshake().await.unwrap();
        assert_eq!(client.session_id().unwrap().as_ref(), "session-1");

        client.close().await;

        tokio::time::timeout(Duration::from_secs(5), device_task)
            .await
            .expect("device peer did not observe StopSession -> Goodbye -> close-notify in time")
            .unwrap();
    }
}
