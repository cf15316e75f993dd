//! # Lockdown Protocol
//!
//! The Message Codec (component A of the lockdown client): typed request
//! dictionary builders and a uniform response inspector, `check_result`.
//!
//! This crate deliberately knows nothing about transports or sessions — it
//! only builds and inspects property-list dictionaries.

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub,
    clippy::all
)]
#![deny(unsafe_code)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]

pub mod message;

pub use message::{
    check_result, error_string, get_bool, get_data_or_string, get_string, get_u64, verb,
    RequestBuilder, ResponseOutcome,
};

// Re-exported so downstream crates construct request/response payloads
// without taking a direct dependency on the `plist` crate version we pin.
pub use plist::{Dictionary, Value};
