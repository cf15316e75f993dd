//! The Pairing Engine (component E): a single internal operation,
//! [`do_pair`], that implements `Pair`, `ValidatePair`, and `Unpair` alike.

use plist::{Dictionary, Value};
use tracing::{info, instrument, warn};

use lockdown_core::host::PreferenceStore;
use lockdown_core::{DeviceUdid, HostId, Label, LockdownError, Result};
use lockdown_protocol::{check_result, error_string, get_data_or_string, verb, RequestBuilder, ResponseOutcome};
use lockdown_transport::PlistChannel;

use crate::ca::{self, OpensslHostIdentityFactory};

/// Which of the three pairing requests `do_pair` should send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairVerb {
    /// Establish a new trust relationship.
    Pair,
    /// Confirm an existing trust relationship.
    ValidatePair,
    /// Revoke a trust relationship.
    Unpair,
}

impl PairVerb {
    fn wire(self) -> &'static str {
        match self {
            PairVerb::Pair => verb::PAIR,
            PairVerb::ValidatePair => verb::VALIDATE_PAIR,
            PairVerb::Unpair => verb::UNPAIR,
        }
    }
}

fn as_dict(value: &Value) -> Result<&Dictionary> {
    value
        .as_dictionary()
        .ok_or_else(|| LockdownError::PlistError("expected a dictionary response".to_string()))
}

/// Fetch the device's `DevicePublicKey`, mint device/host/root certificates
/// for it, send a `Pair`/`ValidatePair`/`Unpair` request, and update the
/// preference store's stored public key on success.
///
/// `host_id_override` lets a caller supply an explicit `HostID` (used when
/// re-validating a pairing created under a different host id); `None` uses
/// the store's persistent host id.
#[instrument(skip(channel, store), fields(udid = %udid, verb = ?pair_verb))]
pub async fn do_pair(
    channel: &mut dyn PlistChannel,
    store: &dyn PreferenceStore,
    udid: &DeviceUdid,
    label: &Label,
    host_id_override: Option<&HostId>,
    pair_verb: PairVerb,
) -> Result<()> {
    let get_key_request = RequestBuilder::new(verb::GET_VALUE)
        .label(label)
        .optional_string("Key", Some("DevicePublicKey"))
        .build();
    channel.send_plist(&get_key_request).await?;
    let response = channel.receive_plist().await?;
    let dict = as_dict(&response)?;
    let device_public_key = get_data_or_string(dict, "Value")
        .ok_or(LockdownError::NotEnoughData("DevicePublicKey"))?;

    let identity = store.get_keys_and_certs(&OpensslHostIdentityFactory)?;
    let (device_cert_pem, host_cert_pem, root_cert_pem) = ca::issue_device_certificate(
        &device_public_key,
        &identity.root_key_pem,
        &identity.root_cert_pem,
        &identity.host_cert_pem,
    )?;

    let host_id = match host_id_override {
        Some(h) => h.clone(),
        None => store.get_host_id()?,
    };

    let mut pair_record = Dictionary::new();
    pair_record.insert("DeviceCertificate".to_string(), Value::Data(device_cert_pem));
    pair_record.insert("HostCertificate".to_string(), Value::Data(host_cert_pem));
    pair_record.insert("HostID".to_string(), Value::String(host_id.as_str().to_string()));
    pair_record.insert("RootCertificate".to_string(), Value::Data(root_cert_pem));

    let pair_request = RequestBuilder::new(pair_verb.wire())
        .label(label)
        .dict_field("PairRecord", pair_record)
        .build();
    channel.send_plist(&pair_request).await?;
    let response = channel.receive_plist().await?;
    let dict = as_dict(&response)?;

    match check_result(dict, pair_verb.wire()) {
        ResponseOutcome::Success => {
            if pair_verb == PairVerb::Unpair {
                store.remove_device_public_key(udid)?;
            } else {
                store.set_device_public_key(udid, &device_public_key)?;
            }
            info!("pairing request succeeded");
            Ok(())
        }
        ResponseOutcome::Failure => {
            let raw = error_string(dict).unwrap_or("Unknown");
            warn!(error = raw, "pairing request failed");
            Err(LockdownError::from_pairing_error_string(raw))
        }
        ResponseOutcome::Malformed => Err(LockdownError::PlistError(
            "malformed pairing response".to_string(),
        )),
    }
}
