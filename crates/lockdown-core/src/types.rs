//! Core identifiers shared by every lockdown component.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The well-known lockdown service identifier, returned by a correct `QueryType` response.
pub const LOCKDOWN_SERVICE_TYPE: &str = "com.apple.mobile.lockdown";

/// The well-known lockdown port on the multiplexed device bus.
pub const LOCKDOWN_PORT: u16 = 0xf27e;

/// Opaque identifier of a paired device, as reported by the device itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceUdid(pub String);

impl DeviceUdid {
    /// Borrow the UDID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceUdid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for DeviceUdid {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for DeviceUdid {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A host installation identifier, minted once and reused across every device the host pairs with.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HostId(pub String);

impl HostId {
    /// Generate a fresh, random host id.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string().to_uppercase())
    }

    /// Borrow the host id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for HostId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// The diagnostic tag a client optionally attaches to every outbound request as `Label`.
///
/// An empty label is treated as "no label configured": it is never serialized into a request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label(pub String);

impl Label {
    /// Whether this label should be inserted into outbound requests.
    #[must_use]
    pub fn is_present(&self) -> bool {
        !self.0.is_empty()
    }

    /// Borrow the label text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for Label {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for Label {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A session identifier returned by a successful `StartSession`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
