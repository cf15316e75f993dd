//! # Lockdown Core
//!
//! Foundation crate for the lockdown client workspace: the error taxonomy,
//! shared identifiers (device UDID, host id, session id, label), client
//! configuration, and the host preference store.
//!
//! ## Architecture
//!
//! ```text
//! lockdown-core/
//! ├── error/   # LockdownError taxonomy
//! ├── types/   # DeviceUdid, HostId, SessionId, Label
//! ├── config/  # LockdownConfig
//! └── host/    # PreferenceStore trait + FilePreferenceStore
//! ```
//!
//! ## Usage
//!
//! This crate is the foundation used by `lockdown-protocol`, `lockdown-transport`,
//! `lockdown-pairing`, and `lockdown-client`. It is not normally used standalone.

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub,
    clippy::all
)]
#![deny(unsafe_code)]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::must_use_candidate,
    clippy::return_self_not_must_use
)]

pub mod config;
pub mod error;
pub mod host;
pub mod types;

pub use config::{LockdownConfig, LockdownConfigBuilder};
pub use error::{LockdownError, Result};
pub use host::{FilePreferenceStore, HostIdentity, HostIdentityFactory, PreferenceStore};
pub use types::{DeviceUdid, HostId, Label, SessionId, LOCKDOWN_PORT, LOCKDOWN_SERVICE_TYPE};
