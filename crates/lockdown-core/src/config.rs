//! Configuration for the lockdown client.
//!
//! This crate is a library, not a CLI: there is no bundled config-file
//! format. Embedders construct a [`LockdownConfig`] directly or via
//! [`LockdownConfigBuilder`] and pass it to the session manager and
//! preference store.
//!
//! # Examples
//!
//! ```
//! use lockdown_core::config::LockdownConfigBuilder;
//! use std::time::Duration;
//!
//! let config = LockdownConfigBuilder::new()
//!     .label("my-tool")
//!     .connect_timeout(Duration::from_secs(5))
//!     .build();
//!
//! assert_eq!(config.label.as_str(), "my-tool");
//! ```

use std::path::PathBuf;
use std::time::Duration;

use crate::types::Label;

/// Minimum TLS protocol floor a handshake will negotiate down to.
///
/// Device firmware of the lockdown era may only support very old TLS/SSL
/// revisions; this is a device-compatibility knob, not a security
/// recommendation (see the TLS Driver component design notes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MinTlsVersion {
    /// SSL 3.0 — the oldest revision this client will attempt.
    Ssl3,
    /// TLS 1.0.
    Tls1_0,
    /// TLS 1.1.
    Tls1_1,
    /// TLS 1.2.
    Tls1_2,
}

/// Top-level configuration for a lockdown client.
#[derive(Debug, Clone)]
pub struct LockdownConfig {
    /// Diagnostic label echoed as `Label` in every outbound request.
    pub label: Label,

    /// Timeout for establishing the underlying device connection.
    pub connect_timeout: Duration,

    /// Timeout applied to each individual request/response round trip,
    /// including the TLS handshake.
    pub handshake_timeout: Duration,

    /// Directory backing the host preference store. `None` resolves to the
    /// platform's standard configuration directory at preference-store
    /// construction time.
    pub preference_store_dir: Option<PathBuf>,

    /// Oldest TLS/SSL revision the TLS Driver will negotiate down to.
    pub min_tls_version: MinTlsVersion,
}

impl Default for LockdownConfig {
    fn default() -> Self {
        Self {
            label: Label::default(),
            connect_timeout: Duration::from_secs(5),
            handshake_timeout: Duration::from_secs(10),
            preference_store_dir: None,
            min_tls_version: MinTlsVersion::Ssl3,
        }
    }
}

/// Builder for [`LockdownConfig`].
#[derive(Debug, Default)]
pub struct LockdownConfigBuilder {
    config: LockdownConfig,
}

impl LockdownConfigBuilder {
    /// Start from the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the diagnostic label attached to every outbound request.
    #[must_use]
    pub fn label(mut self, label: impl Into<Label>) -> Self {
        self.config.label = label.into();
        self
    }

    /// Set the device connection timeout.
    #[must_use]
    pub const fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Set the per-request handshake timeout.
    #[must_use]
    pub const fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.config.handshake_timeout = timeout;
        self
    }

    /// Override the directory backing the preference store.
    #[must_use]
    pub fn preference_store_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.preference_store_dir = Some(dir.into());
        self
    }

    /// Set the oldest TLS/SSL revision to negotiate down to.
    #[must_use]
    pub const fn min_tls_version(mut self, version: MinTlsVersion) -> Self {
        self.config.min_tls_version = version;
        self
    }

    /// Build the configuration.
    #[must_use]
    pub fn build(self) -> LockdownConfig {
        self.config
    }
}
