//! The Certificate Authority (component D): mints the root and host
//! identity on first use, and issues a device certificate that tags the
//! device's own RSA public key for inclusion in a pair record.

use openssl::asn1::Asn1Time;
use openssl::bn::{BigNum, MsbOption};
use openssl::hash::MessageDigest;
use openssl::pkey::{PKey, Private};
use openssl::rsa::Rsa;
use openssl::x509::extension::BasicConstraints;
use openssl::x509::{X509, X509Name, X509NameBuilder};

use lockdown_core::host::{HostIdentity, HostIdentityFactory};
use lockdown_core::{LockdownError, Result};

const RSA_KEY_BITS: u32 = 2048;
const VALIDITY_DAYS: u32 = 3650;

/// Fixed byte pattern used to fill the placeholder RSA private-key
/// parameters (`d`, `p`, `q`, `dmp1`, `dmq1`, `iqmp`) when tagging a
/// device's public key into a certificate. These values are never used to
/// sign anything; only the modulus and exponent (the device's real public
/// key) end up in the issued certificate.
const PLACEHOLDER_BYTE: u8 = 0x01;

fn to_lockdown_error(err: openssl::error::ErrorStack) -> LockdownError {
    LockdownError::SslError(err.to_string())
}

fn placeholder_bignum(byte_len: usize) -> Result<BigNum> {
    let bytes = vec![PLACEHOLDER_BYTE; byte_len];
    BigNum::from_slice(&bytes).map_err(to_lockdown_error)
}

/// Parse a device's PKCS#1 RSA public key (PEM, `RSA PUBLIC KEY` block)
/// and construct a "fake" private key carrying the same modulus and
/// exponent, suitable only for setting an X.509 certificate's subject
/// public key.
fn fake_private_key_for_device_public_key(device_public_key_pem: &[u8]) -> Result<PKey<Private>> {
    let public = Rsa::public_key_from_pem_pkcs1(device_public_key_pem)
        .or_else(|_| Rsa::public_key_from_pem(device_public_key_pem))
        .map_err(|e| LockdownError::InvalidArgument(format!("malformed device public key: {e}")))?;

    let modulus = public.n().to_owned().map_err(to_lockdown_error)?;
    let exponent = public.e().to_owned().map_err(to_lockdown_error)?;
    let byte_len = modulus.num_bytes() as usize;

    let rsa = Rsa::from_private_components(
        modulus,
        exponent,
        placeholder_bignum(byte_len)?,
        placeholder_bignum(byte_len / 2)?,
        placeholder_bignum(byte_len / 2)?,
        placeholder_bignum(byte_len / 2)?,
        placeholder_bignum(byte_len / 2)?,
        placeholder_bignum(byte_len / 2)?,
    )
    .map_err(to_lockdown_error)?;

    PKey::from_rsa(rsa).map_err(to_lockdown_error)
}

fn build_name(common_name: &str) -> Result<X509Name> {
    let mut builder = X509NameBuilder::new().map_err(to_lockdown_error)?;
    builder
        .append_entry_by_text("CN", common_name)
        .map_err(to_lockdown_error)?;
    Ok(builder.build())
}

fn generate_rsa_key() -> Result<PKey<Private>> {
    let rsa = Rsa::generate(RSA_KEY_BITS).map_err(to_lockdown_error)?;
    PKey::from_rsa(rsa).map_err(to_lockdown_error)
}

fn random_serial() -> Result<openssl::asn1::Asn1Integer> {
    let mut serial = BigNum::new().map_err(to_lockdown_error)?;
    serial
        .rand(64, MsbOption::MAYBE_ZERO, false)
        .map_err(to_lockdown_error)?;
    serial.to_asn1_integer().map_err(to_lockdown_error)
}

/// The device certificate's serial number is fixed at a single zero byte,
/// matching what lockdownd itself expects to see on the device cert.
fn device_serial() -> Result<openssl::asn1::Asn1Integer> {
    BigNum::from_slice(&[0])
        .and_then(|n| n.to_asn1_integer())
        .map_err(to_lockdown_error)
}

fn self_signed_root(key: &PKey<Private>) -> Result<X509> {
    let name = build_name("lockdownd Root CA")?;
    let mut builder = X509::builder().map_err(to_lockdown_error)?;
    builder.set_version(2).map_err(to_lockdown_error)?;
    builder
        .set_serial_number(&random_serial()?)
        .map_err(to_lockdown_error)?;
    builder.set_subject_name(&name).map_err(to_lockdown_error)?;
    builder.set_issuer_name(&name).map_err(to_lockdown_error)?;
    builder.set_pubkey(key).map_err(to_lockdown_error)?;
    builder
        .set_not_before(&Asn1Time::days_from_now(0).map_err(to_lockdown_error)?)
        .map_err(to_lockdown_error)?;
    builder
        .set_not_after(&Asn1Time::days_from_now(VALIDITY_DAYS).map_err(to_lockdown_error)?)
        .map_err(to_lockdown_error)?;
    builder
        .append_extension(
            BasicConstraints::new()
                .critical()
                .ca()
                .build()
                .map_err(to_lockdown_error)?,
        )
        .map_err(to_lockdown_error)?;
    builder
        .sign(key, MessageDigest::sha256())
        .map_err(to_lockdown_error)?;
    Ok(builder.build())
}

fn issue_leaf(
    subject_cn: &str,
    subject_pubkey: &PKey<Private>,
    issuer_cert: &X509,
    issuer_key: &PKey<Private>,
    digest: MessageDigest,
    serial: openssl::asn1::Asn1Integer,
) -> Result<X509> {
    let mut builder = X509::builder().map_err(to_lockdown_error)?;
    builder.set_version(2).map_err(to_lockdown_error)?;
    builder
        .set_serial_number(&serial)
        .map_err(to_lockdown_error)?;
    builder
        .set_subject_name(&build_name(subject_cn)?)
        .map_err(to_lockdown_error)?;
    builder
        .set_issuer_name(issuer_cert.subject_name())
        .map_err(to_lockdown_error)?;
    builder
        .set_pubkey(subject_pubkey)
        .map_err(to_lockdown_error)?;
    builder
        .set_not_before(&Asn1Time::days_from_now(0).map_err(to_lockdown_error)?)
        .map_err(to_lockdown_error)?;
    builder
        .set_not_after(&Asn1Time::days_from_now(VALIDITY_DAYS).map_err(to_lockdown_error)?)
        .map_err(to_lockdown_error)?;
    builder
        .append_extension(
            BasicConstraints::new()
                .critical()
                .build()
                .map_err(to_lockdown_error)?,
        )
        .map_err(to_lockdown_error)?;
    builder
        .sign(issuer_key, digest)
        .map_err(to_lockdown_error)?;
    Ok(builder.build())
}

/// Mint a fresh host identity (root key/cert, host key/cert) via OpenSSL.
/// Implements [`HostIdentityFactory`] so [`FilePreferenceStore`] can lazily
/// provision one the first time it's asked for an identity.
///
/// [`FilePreferenceStore`]: lockdown_core::host::FilePreferenceStore
#[derive(Debug, Default)]
pub struct OpensslHostIdentityFactory;

impl HostIdentityFactory for OpensslHostIdentityFactory {
    fn generate(&self) -> Result<HostIdentity> {
        let root_key = generate_rsa_key()?;
        let root_cert = self_signed_root(&root_key)?;

        let host_key = generate_rsa_key()?;
        let host_cert = issue_leaf(
            "lockdownd Host",
            &host_key,
            &root_cert,
            &root_key,
            MessageDigest::sha256(),
            random_serial()?,
        )?;

        Ok(HostIdentity {
            root_key_pem: root_key.private_key_to_pem_pkcs8().map_err(to_lockdown_error)?,
            root_cert_pem: root_cert.to_pem().map_err(to_lockdown_error)?,
            host_key_pem: host_key.private_key_to_pem_pkcs8().map_err(to_lockdown_error)?,
            host_cert_pem: host_cert.to_pem().map_err(to_lockdown_error)?,
        })
    }
}

/// Issue a device certificate tagging `device_public_key_pem` (the
/// device's PKCS#1 RSA public key), signed by the persisted root key.
///
/// Returns `(device_cert_pem, host_cert_pem, root_cert_pem)`, ready to drop
/// into a `PairRecord`.
pub fn issue_device_certificate(
    device_public_key_pem: &[u8],
    root_key_pem: &[u8],
    root_cert_pem: &[u8],
    host_cert_pem: &[u8],
) -> Result<(Vec<u8>, Vec<u8>, Vec<u8>)> {
    let root_key = PKey::private_key_from_pem(root_key_pem)
        .map_err(|e| LockdownError::InvalidConfiguration(format!("bad root key: {e}")))?;
    let root_cert = X509::from_pem(root_cert_pem)
        .map_err(|e| LockdownError::InvalidConfiguration(format!("bad root certificate: {e}")))?;

    let fake_key = fake_private_key_for_device_public_key(device_public_key_pem)?;
    let device_cert = issue_leaf(
        "lockdownd Device",
        &fake_key,
        &root_cert,
        &root_key,
        MessageDigest::sha1(),
        device_serial()?,
    )?;

    Ok((
        device_cert.to_pem().map_err(to_lockdown_error)?,
        host_cert_pem.to_vec(),
        root_cert_pem.to_vec(),
    ))
}
