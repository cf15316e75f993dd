//! # Lockdown Pairing
//!
//! The Certificate Authority (component D) and Pairing Engine (component E):
//! mints host/device X.509 certificates and drives `Pair`/`ValidatePair`/
//! `Unpair` against a device.

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub,
    clippy::all
)]
#![deny(unsafe_code)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]

pub mod ca;
pub mod pairing;

pub use ca::{issue_device_certificate, OpensslHostIdentityFactory};
pub use pairing::{do_pair, PairVerb};
