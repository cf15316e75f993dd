//! The Session Manager (component F): handshake, session lifecycle, and
//! the plain request/response operations built on top of it.

use std::sync::Arc;

use plist::{Dictionary, Value};
use tokio::time::timeout;
use tracing::{instrument, warn};

use lockdown_core::host::PreferenceStore;
use lockdown_core::{config::MinTlsVersion, DeviceUdid, LockdownConfig, LockdownError, Result, SessionId};
use lockdown_pairing::{do_pair, OpensslHostIdentityFactory, PairVerb};
use lockdown_protocol::{
    check_result, error_string, get_bool, get_string, get_u64, verb, RequestBuilder, ResponseOutcome,
};
use lockdown_transport::{DeviceConnection, FramedPlistChannel, PlistChannel, TlsCredentials, TlsFloor, TlsSession, TransportAdapter};

const UNIQUE_DEVICE_ID_KEY: &str = "UniqueDeviceID";

enum Channel<C: DeviceConnection + 'static> {
    Plain(FramedPlistChannel<C>),
    Tls(TlsSession<C>),
}

impl<C: DeviceConnection + 'static> Channel<C> {
    fn as_plist_channel(&mut self) -> &mut dyn PlistChannel {
        match self {
            Channel::Plain(c) => c,
            Channel::Tls(c) => c,
        }
    }
}

/// A handle to one lockdown session against a single device.
///
/// Owns the transport exclusively; every method takes `&mut self`, so the
/// borrow checker enforces the "at most one in-flight request" invariant
/// instead of a runtime lock. `channel` is `None` only for the instant a
/// TLS upgrade or teardown is in progress.
pub struct LockdownClient<C: DeviceConnection + 'static> {
    config: LockdownConfig,
    store: Arc<dyn PreferenceStore>,
    udid: Option<DeviceUdid>,
    session_id: Option<SessionId>,
    channel: Option<Channel<C>>,
}

impl<C: DeviceConnection + 'static> LockdownClient<C> {
    /// Wrap a freshly opened device connection. No I/O happens until
    /// [`LockdownClient::handshake`] is called.
    pub fn new(connection: C, store: Arc<dyn PreferenceStore>, config: LockdownConfig) -> Self {
        Self {
            config,
            store,
            udid: None,
            session_id: None,
            channel: Some(Channel::Plain(FramedPlistChannel::new(connection))),
        }
    }

    /// The device's UDID, once the handshake has fetched it.
    #[must_use]
    pub fn udid(&self) -> Option<&DeviceUdid> {
        self.udid.as_ref()
    }

    /// The currently open session id, if any.
    #[must_use]
    pub fn session_id(&self) -> Option<&SessionId> {
        self.session_id.as_ref()
    }

    fn channel_mut(&mut self) -> Result<&mut dyn PlistChannel> {
        Ok(self
            .channel
            .as_mut()
            .ok_or_else(|| LockdownError::Unknown("channel unavailable mid-transition".to_string()))?
            .as_plist_channel())
    }

    async fn send_request(&mut self, value: &Value) -> Result<()> {
        let timeout_duration = self.config.handshake_timeout;
        let channel = self.channel_mut()?;
        timeout(timeout_duration, channel.send_plist(value))
            .await
            .map_err(|_| LockdownError::MuxError("send timed out".to_string()))?
            .map_err(Into::into)
    }

    async fn recv_response(&mut self) -> Result<Dictionary> {
        let timeout_duration = self.config.handshake_timeout;
        let channel = self.channel_mut()?;
        let value = timeout(timeout_duration, channel.receive_plist())
            .await
            .map_err(|_| LockdownError::MuxError("receive timed out".to_string()))?
            .map_err(Into::into)?;

        value
            .into_dictionary()
            .ok_or_else(|| LockdownError::PlistError("expected a dictionary response".to_string()))
    }

    async fn roundtrip(&mut self, request: Value) -> Result<Dictionary> {
        self.send_request(&request).await?;
        self.recv_response().await
    }

    /// Run the full-trust handshake: `QueryType`, fetch the device UDID,
    /// pair if no device public key is on file, always `ValidatePair`, then
    /// `StartSession`.
    #[instrument(skip(self))]
    pub async fn handshake(&mut self) -> Result<()> {
        self.query_type().await;
        let udid = self.fetch_udid().await?;
        self.udid = Some(udid.clone());

        if !self.store.has_device_public_key(&udid) {
            self.pair(PairVerb::Pair, &udid).await?;
        }
        self.pair(PairVerb::ValidatePair, &udid).await?;
        self.start_session().await?;
        Ok(())
    }

    /// `QueryType`; a mismatched `Type` field is logged as a warning, not
    /// treated as fatal, per the handshake's tolerant-continue policy.
    async fn query_type(&mut self) {
        let request = RequestBuilder::new(verb::QUERY_TYPE)
            .label(&self.config.label)
            .build();
        match self.roundtrip(request).await {
            Ok(dict) => {
                let reported = get_string(&dict, "Type");
                if reported != Some(lockdown_core::LOCKDOWN_SERVICE_TYPE) {
                    warn!(?reported, "QueryType returned an unexpected service type");
                }
            }
            Err(err) => warn!(%err, "QueryType failed; continuing handshake anyway"),
        }
    }

    async fn fetch_udid(&mut self) -> Result<DeviceUdid> {
        let request = RequestBuilder::new(verb::GET_VALUE)
            .label(&self.config.label)
            .optional_string("Key", Some(UNIQUE_DEVICE_ID_KEY))
            .build();
        let response = self.roundtrip(request).await?;
        get_string(&response, "Value")
            .map(DeviceUdid::from)
            .ok_or(LockdownError::NotEnoughData(UNIQUE_DEVICE_ID_KEY))
    }

    async fn pair(&mut self, pair_verb: PairVerb, udid: &DeviceUdid) -> Result<()> {
        let store = Arc::clone(&self.store);
        let label = self.config.label.clone();
        let channel = self.channel_mut()?;
        do_pair(channel, store.as_ref(), udid, &label, None, pair_verb).await
    }

    /// `StartSession`. If a session is already open, it is stopped first.
    /// On success, upgrades the channel to TLS when the device requests it.
    #[instrument(skip(self))]
    pub async fn start_session(&mut self) -> Result<(SessionId, bool)> {
        if self.session_id.is_some() {
            self.stop_session().await;
        }

        let host_id = self.store.get_host_id()?;
        let request = RequestBuilder::new(verb::START_SESSION)
            .label(&self.config.label)
            .field("HostID", Value::String(host_id.as_str().to_string()))
            .build();
        let response = self.roundtrip(request).await?;

        match check_result(&response, verb::START_SESSION) {
            ResponseOutcome::Success => {}
            ResponseOutcome::Failure => {
                let raw = error_string(&response).unwrap_or("Unknown");
                return Err(LockdownError::from_session_error_string(raw));
            }
            ResponseOutcome::Malformed => {
                return Err(LockdownError::PlistError(
                    "malformed StartSession response".to_string(),
                ))
            }
        }

        let session_id = get_string(&response, "SessionID")
            .map(|s| SessionId::from(s.to_string()))
            .ok_or(LockdownError::NotEnoughData("SessionID"))?;
        let enable_ssl = get_bool(&response, "EnableSessionSSL").unwrap_or(false);

        self.session_id = Some(session_id.clone());

        if enable_ssl {
            self.upgrade_to_tls().await?;
        }

        Ok((session_id, enable_ssl))
    }

    async fn upgrade_to_tls(&mut self) -> Result<()> {
        let identity = self.store.get_keys_and_certs(&OpensslHostIdentityFactory)?;

        let plain = match self
            .channel
            .take()
            .ok_or_else(|| LockdownError::Unknown("channel unavailable mid-transition".to_string()))?
        {
            Channel::Plain(c) => c,
            Channel::Tls(_) => {
                return Err(LockdownError::Unknown(
                    "StartSession cannot re-enable TLS on an already-TLS channel".to_string(),
                ))
            }
        };

        let adapter = TransportAdapter::new(plain.into_inner());
        let credentials = TlsCredentials {
            host_cert_pem: identity.host_cert_pem,
            host_key_pem: identity.host_key_pem,
        };
        let floor = match self.config.min_tls_version {
            MinTlsVersion::Ssl3 => TlsFloor::Ssl3,
            _ => TlsFloor::Tls1_0,
        };

        let tls = timeout(
            self.config.handshake_timeout,
            TlsSession::handshake(adapter, floor, credentials),
        )
        .await
        .map_err(|_| LockdownError::SslError("TLS handshake timed out".to_string()))??;

        self.channel = Some(Channel::Tls(tls));
        Ok(())
    }

    /// `StopSession`. The session id is always cleared locally, regardless
    /// of what the device reports. The channel (plain or TLS) is left open:
    /// `start_session` reuses it to negotiate the next session, and `close`
    /// still needs it to send `Goodbye`.
    #[instrument(skip(self))]
    pub async fn stop_session(&mut self) {
        if let Some(session_id) = self.session_id.take() {
            let request = RequestBuilder::new(verb::STOP_SESSION)
                .label(&self.config.label)
                .field("SessionID", Value::String(session_id.as_ref().to_string()))
                .build();
            if let Err(err) = self.roundtrip(request).await {
                warn!(%err, "StopSession request failed; tearing down locally anyway");
            }
        }
    }

    /// Send the TLS close-notify and drop the channel, if one is open. A
    /// session is never reused after this; it is only ever called as the
    /// last step of [`LockdownClient::close`].
    async fn shutdown_channel(&mut self) {
        if let Some(Channel::Tls(tls)) = self.channel.take() {
            tls.shutdown().await;
        }
    }

    /// Read a domain/key pair, or the whole preferences tree when both are
    /// `None`.
    #[instrument(skip(self))]
    pub async fn get_value(&mut self, domain: Option<&str>, key: Option<&str>) -> Result<Value> {
        let request = RequestBuilder::new(verb::GET_VALUE)
            .label(&self.config.label)
            .optional_string("Domain", domain)
            .optional_string("Key", key)
            .build();
        let response = self.roundtrip(request).await?;
        response
            .get("Value")
            .cloned()
            .ok_or(LockdownError::NotEnoughData("Value"))
    }

    /// Write a domain/key pair.
    #[instrument(skip(self, value))]
    pub async fn set_value(&mut self, domain: Option<&str>, key: &str, value: Value) -> Result<()> {
        let request = RequestBuilder::new(verb::SET_VALUE)
            .label(&self.config.label)
            .optional_string("Domain", domain)
            .field("Key", Value::String(key.to_string()))
            .field("Value", value)
            .build();
        let response = self.roundtrip(request).await?;
        Self::expect_success(&response, verb::SET_VALUE)
    }

    /// Delete a domain/key pair.
    #[instrument(skip(self))]
    pub async fn remove_value(&mut self, domain: Option<&str>, key: Option<&str>) -> Result<()> {
        let request = RequestBuilder::new(verb::REMOVE_VALUE)
            .label(&self.config.label)
            .optional_string("Domain", domain)
            .optional_string("Key", key)
            .build();
        let response = self.roundtrip(request).await?;
        Self::expect_success(&response, verb::REMOVE_VALUE)
    }

    /// Ask lockdown to spawn a service, returning its port. Requires an
    /// open session.
    #[instrument(skip(self))]
    pub async fn start_service(&mut self, name: &str) -> Result<u16> {
        if self.session_id.is_none() {
            return Err(LockdownError::NoRunningSession);
        }
        let request = RequestBuilder::new(verb::START_SERVICE)
            .label(&self.config.label)
            .field("Service", Value::String(name.to_string()))
            .build();
        let response = self.roundtrip(request).await?;

        match check_result(&response, verb::START_SERVICE) {
            ResponseOutcome::Success => get_u64(&response, "Port")
                .map(|p| p as u16)
                .ok_or(LockdownError::NotEnoughData("Port")),
            ResponseOutcome::Failure => {
                let raw = error_string(&response).unwrap_or("Unknown").to_string();
                Err(LockdownError::StartServiceFailed(raw))
            }
            ResponseOutcome::Malformed => Err(LockdownError::PlistError(
                "malformed StartService response".to_string(),
            )),
        }
    }

    /// Activate the device with an activation record. Requires an open
    /// session.
    #[instrument(skip(self, activation_record))]
    pub async fn activate(&mut self, activation_record: Dictionary) -> Result<()> {
        if self.session_id.is_none() {
            return Err(LockdownError::NoRunningSession);
        }
        let request = RequestBuilder::new(verb::ACTIVATE)
            .label(&self.config.label)
            .dict_field("ActivationRecord", activation_record)
            .build();
        let response = self.roundtrip(request).await?;
        match check_result(&response, verb::ACTIVATE) {
            ResponseOutcome::Success => Ok(()),
            ResponseOutcome::Failure => {
                let raw = error_string(&response).unwrap_or("Unknown").to_string();
                Err(LockdownError::ActivationFailed(raw))
            }
            ResponseOutcome::Malformed => Err(LockdownError::PlistError(
                "malformed Activate response".to_string(),
            )),
        }
    }

    /// Deactivate the device. Requires an open session.
    #[instrument(skip(self))]
    pub async fn deactivate(&mut self) -> Result<()> {
        if self.session_id.is_none() {
            return Err(LockdownError::NoRunningSession);
        }
        let request = RequestBuilder::new(verb::DEACTIVATE).label(&self.config.label).build();
        let response = self.roundtrip(request).await?;
        Self::expect_success(&response, verb::DEACTIVATE)
    }

    /// Reboot the device into recovery mode.
    #[instrument(skip(self))]
    pub async fn enter_recovery(&mut self) -> Result<()> {
        let request = RequestBuilder::new(verb::ENTER_RECOVERY)
            .label(&self.config.label)
            .build();
        let response = self.roundtrip(request).await?;
        Self::expect_success(&response, verb::ENTER_RECOVERY)
    }

    /// Politely end the connection.
    #[instrument(skip(self))]
    pub async fn goodbye(&mut self) -> Result<()> {
        let request = RequestBuilder::new(verb::GOODBYE).label(&self.config.label).build();
        let response = self.roundtrip(request).await?;
        Self::expect_success(&response, verb::GOODBYE)
    }

    fn expect_success(response: &Dictionary, expected_verb: &str) -> Result<()> {
        match check_result(response, expected_verb) {
            ResponseOutcome::Success => Ok(()),
            ResponseOutcome::Failure => Err(LockdownError::Unknown(
                error_string(response).unwrap_or("Unknown").to_string(),
            )),
            ResponseOutcome::Malformed => Err(LockdownError::PlistError(format!(
                "malformed {expected_verb} response"
            ))),
        }
    }

    /// Tear the client down: `StopSession`, then `Goodbye`, both sent over
    /// the still-open channel; only then is the TLS close-notify sent and
    /// the transport released. Errors during teardown are logged and
    /// swallowed; resources are always released.
    #[instrument(skip(self))]
    pub async fn close(mut self) {
        self.stop_session().await;
        if let Err(err) = self.goodbye().await {
            warn!(%err, "Goodbye failed during teardown; releasing resources anyway");
        }
        self.shutdown_channel().await;
    }
}
