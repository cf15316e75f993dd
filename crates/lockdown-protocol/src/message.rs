//! The Message Codec: request dictionary builders and the uniform response
//! inspector `check_result`.

use plist::{Dictionary, Value};
use tracing::trace;

use lockdown_core::Label;

/// Request verbs recognized by the lockdown protocol.
pub mod verb {
    /// `QueryType` — asks the device to identify which service is listening.
    pub const QUERY_TYPE: &str = "QueryType";
    /// `GetValue` — reads a domain/key pair (or the whole preferences tree).
    pub const GET_VALUE: &str = "GetValue";
    /// `SetValue` — writes a domain/key pair.
    pub const SET_VALUE: &str = "SetValue";
    /// `RemoveValue` — deletes a domain/key pair.
    pub const REMOVE_VALUE: &str = "RemoveValue";
    /// `StartSession` — opens a trusted session, possibly upgrading to TLS.
    pub const START_SESSION: &str = "StartSession";
    /// `StopSession` — closes the currently open session.
    pub const STOP_SESSION: &str = "StopSession";
    /// `StartService` — asks lockdown to spawn a service on a port.
    pub const START_SERVICE: &str = "StartService";
    /// `Activate` — activates the device with an activation record.
    pub const ACTIVATE: &str = "Activate";
    /// `Deactivate` — deactivates the device.
    pub const DEACTIVATE: &str = "Deactivate";
    /// `EnterRecovery` — reboots the device into recovery mode.
    pub const ENTER_RECOVERY: &str = "EnterRecovery";
    /// `Goodbye` — politely ends the connection.
    pub const GOODBYE: &str = "Goodbye";
    /// `Pair` — establishes a new trust relationship.
    pub const PAIR: &str = "Pair";
    /// `ValidatePair` — confirms an existing trust relationship.
    pub const VALIDATE_PAIR: &str = "ValidatePair";
    /// `Unpair` — revokes a trust relationship.
    pub const UNPAIR: &str = "Unpair";
}

/// Builds a request property-list dictionary of the shape
/// `{ Label?, Request: <verb>, ...fields }`.
///
/// Label insertion is conditional on a non-empty [`Label`] being configured;
/// an empty label is never serialized.
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    dict: Dictionary,
}

impl RequestBuilder {
    /// Start a new request for the given verb.
    #[must_use]
    pub fn new(request: &str) -> Self {
        let mut dict = Dictionary::new();
        dict.insert("Request".to_string(), Value::String(request.to_string()));
        Self { dict }
    }

    /// Attach the client's diagnostic label, if one is configured.
    #[must_use]
    pub fn label(mut self, label: &Label) -> Self {
        if label.is_present() {
            self.dict
                .insert("Label".to_string(), Value::String(label.as_str().to_string()));
        }
        self
    }

    /// Set a string field, omitting it entirely when `value` is `None`.
    #[must_use]
    pub fn optional_string(mut self, field: &str, value: Option<&str>) -> Self {
        if let Some(value) = value {
            self.dict
                .insert(field.to_string(), Value::String(value.to_string()));
        }
        self
    }

    /// Set an arbitrary field to a [`plist::Value`].
    #[must_use]
    pub fn field(mut self, field: &str, value: Value) -> Self {
        self.dict.insert(field.to_string(), value);
        self
    }

    /// Set a nested dictionary field (used for `PairRecord` and `ActivationRecord`).
    #[must_use]
    pub fn dict_field(mut self, field: &str, value: Dictionary) -> Self {
        self.dict.insert(field.to_string(), Value::Dictionary(value));
        self
    }

    /// Finish building, returning the request as a plist value ready to send.
    #[must_use]
    pub fn build(self) -> Value {
        trace!(fields = self.dict.len(), "built request dictionary");
        Value::Dictionary(self.dict)
    }
}

/// The three-way outcome of inspecting a lockdown response dictionary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseOutcome {
    /// `Result: "Success"` and the echoed verb matched.
    Success,
    /// `Result: "Failure"` and the echoed verb matched.
    Failure,
    /// The echoed `Request` verb didn't match, or `Result` was missing/unrecognized.
    Malformed,
}

/// Inspect a response dictionary for a request of `expected_verb`.
///
/// Requires that the response's `Request` field equal `expected_verb`; a
/// mismatch returns [`ResponseOutcome::Malformed`] regardless of any other
/// field. Otherwise reads `Result`: `"Success"` maps to
/// [`ResponseOutcome::Success`], `"Failure"` to [`ResponseOutcome::Failure`],
/// and anything missing or unrecognized to [`ResponseOutcome::Malformed`].
#[must_use]
pub fn check_result(response: &Dictionary, expected_verb: &str) -> ResponseOutcome {
    let echoed = response.get("Request").and_then(Value::as_string);
    if echoed != Some(expected_verb) {
        return ResponseOutcome::Malformed;
    }

    match response.get("Result").and_then(Value::as_string) {
        Some("Success") => ResponseOutcome::Success,
        Some("Failure") => ResponseOutcome::Failure,
        _ => ResponseOutcome::Malformed,
    }
}

/// Read the `Error` string from a failed response, if present.
#[must_use]
pub fn error_string(response: &Dictionary) -> Option<&str> {
    response.get("Error").and_then(Value::as_string)
}

/// Read a string field from a response dictionary.
#[must_use]
pub fn get_string<'a>(response: &'a Dictionary, field: &str) -> Option<&'a str> {
    response.get(field).and_then(Value::as_string)
}

/// Read a boolean field from a response dictionary.
#[must_use]
pub fn get_bool(response: &Dictionary, field: &str) -> Option<bool> {
    response.get(field).and_then(Value::as_boolean)
}

/// Read an unsigned integer field from a response dictionary.
#[must_use]
pub fn get_u64(response: &Dictionary, field: &str) -> Option<u64> {
    response
        .get(field)
        .and_then(Value::as_unsigned_integer)
}

/// Read a byte-string field that the device may return as either a `data`
/// node or a `string` node — some lockdown responses (notably
/// `DevicePublicKey`) are documented to return `data`, but devices have been
/// observed to return plain PEM text as a `string` node instead.
#[must_use]
pub fn get_data_or_string(response: &Dictionary, field: &str) -> Option<Vec<u8>> {
    match response.get(field)? {
        Value::Data(bytes) => Some(bytes.clone()),
        Value::String(text) => Some(text.as_bytes().to_vec()),
        _ => None,
    }
}
