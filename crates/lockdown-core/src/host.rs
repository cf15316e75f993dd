//! The host preference store: process-wide persistent state holding the
//! host identity (root/host keys and certs, host id) and per-device pair
//! records.
//!
//! The protocol specification treats this store as an external
//! collaborator reachable only through the trait below. [`FilePreferenceStore`]
//! is this crate's concrete, filesystem-backed implementation, so the
//! workspace is runnable and testable without a real preference daemon.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, instrument};

use crate::error::{LockdownError, Result};
use crate::types::{DeviceUdid, HostId};

/// The host's persistent identity: a host id plus root and host key/cert pairs,
/// each stored as PEM text.
#[derive(Debug, Clone)]
pub struct HostIdentity {
    /// Root private key, PEM-encoded.
    pub root_key_pem: Vec<u8>,
    /// Self-signed root certificate, PEM-encoded.
    pub root_cert_pem: Vec<u8>,
    /// Host private key, PEM-encoded.
    pub host_key_pem: Vec<u8>,
    /// Host certificate signed by the root, PEM-encoded.
    pub host_cert_pem: Vec<u8>,
}

/// Callback the preference store invokes to lazily mint a host identity the
/// first time one is requested and none is persisted yet.
///
/// Implemented by the Certificate Authority component (`lockdown-pairing`),
/// which is the only component that knows how to generate RSA key material
/// and self-signed certificates. Kept as a trait object here to avoid a
/// dependency cycle between `lockdown-core` and `lockdown-pairing`.
pub trait HostIdentityFactory: Send + Sync {
    /// Generate a brand-new host identity.
    fn generate(&self) -> Result<HostIdentity>;
}

/// The preference store collaborator consumed by the Certificate Authority,
/// Pairing Engine, and Session Manager.
pub trait PreferenceStore: Send + Sync {
    /// Read the persistent host id, generating and persisting one if absent.
    fn get_host_id(&self) -> Result<HostId>;

    /// Read the host identity (root/host keys and certs), lazily provisioning
    /// it via `factory` on first call.
    fn get_keys_and_certs(&self, factory: &dyn HostIdentityFactory) -> Result<HostIdentity>;

    /// Read just the host and root certificates in PEM form.
    fn get_certs_as_pem(&self) -> Result<(Vec<u8>, Vec<u8>)>;

    /// Whether a device public key is on file for `udid`.
    fn has_device_public_key(&self, udid: &DeviceUdid) -> bool;

    /// Read the stored device public key, if any.
    fn get_device_public_key(&self, udid: &DeviceUdid) -> Result<Option<Vec<u8>>>;

    /// Persist the device's public key, recording that pairing succeeded.
    fn set_device_public_key(&self, udid: &DeviceUdid, pem: &[u8]) -> Result<()>;

    /// Remove a persisted device public key (on `Unpair`).
    fn remove_device_public_key(&self, udid: &DeviceUdid) -> Result<()>;
}

/// A filesystem-backed [`PreferenceStore`].
///
/// Layout under the store directory:
/// - `host_id` — the host id, as plain UTF-8 text.
/// - `root_key.pem`, `root_cert.pem`, `host_key.pem`, `host_cert.pem` — PEM blobs.
/// - `pairing/<udid>.pem` — one device public key per paired device.
#[derive(Debug, Clone)]
pub struct FilePreferenceStore {
    dir: PathBuf,
}

impl FilePreferenceStore {
    /// Open (creating if necessary) a preference store rooted at `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        fs::create_dir_all(dir.join("pairing"))?;
        Ok(Self { dir })
    }

    /// Open the store at the platform standard configuration directory,
    /// under `lockdown/`.
    pub fn standard_location() -> Result<Self> {
        let base = dirs::config_dir().ok_or_else(|| {
            LockdownError::InvalidConfiguration(
                "could not determine platform configuration directory".to_string(),
            )
        })?;
        Self::new(base.join("lockdown"))
    }

    fn host_id_path(&self) -> PathBuf {
        self.dir.join("host_id")
    }

    fn root_key_path(&self) -> PathBuf {
        self.dir.join("root_key.pem")
    }

    fn root_cert_path(&self) -> PathBuf {
        self.dir.join("root_cert.pem")
    }

    fn host_key_path(&self) -> PathBuf {
        self.dir.join("host_key.pem")
    }

    fn host_cert_path(&self) -> PathBuf {
        self.dir.join("host_cert.pem")
    }

    fn pairing_path(&self, udid: &DeviceUdid) -> PathBuf {
        self.dir.join("pairing").join(format!("{}.pem", udid.0))
    }

    /// Write `contents` to `path` by writing a sibling temp file and
    /// renaming it over the target, so a reader never observes a partial
    /// write and concurrent first-time initialization across processes
    /// cannot race to a torn file.
    fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| LockdownError::InvalidConfiguration("bad store path".to_string()))?;
        let tmp = path.with_file_name(format!("{file_name}.tmp-{}", std::process::id()));
        fs::write(&tmp, contents)?;
        set_owner_only_permissions(&tmp)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }
}

#[cfg(unix)]
fn set_owner_only_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = fs::metadata(path)?.permissions();
    perms.set_mode(0o600);
    fs::set_permissions(path, perms)?;
    Ok(())
}

#[cfg(not(unix))]
fn set_owner_only_permissions(_path: &Path) -> Result<()> {
    Ok(())
}

impl PreferenceStore for FilePreferenceStore {
    #[instrument(skip(self))]
    fn get_host_id(&self) -> Result<HostId> {
        let path = self.host_id_path();
        if let Ok(existing) = fs::read_to_string(&path) {
            return Ok(HostId(existing.trim().to_string()));
        }

        info!("no host id on file, minting a new one");
        let host_id = HostId::generate();
        Self::write_atomic(&path, host_id.as_str().as_bytes())?;
        Ok(host_id)
    }

    #[instrument(skip(self, factory))]
    fn get_keys_and_certs(&self, factory: &dyn HostIdentityFactory) -> Result<HostIdentity> {
        let paths = [
            self.root_key_path(),
            self.root_cert_path(),
            self.host_key_path(),
            self.host_cert_path(),
        ];
        if paths.iter().all(|p| p.exists()) {
            debug!("loading existing host identity from disk");
            return Ok(HostIdentity {
                root_key_pem: fs::read(&paths[0])?,
                root_cert_pem: fs::read(&paths[1])?,
                host_key_pem: fs::read(&paths[2])?,
                host_cert_pem: fs::read(&paths[3])?,
            });
        }

        info!("host identity missing, generating root and host certificates");
        let identity = factory.generate()?;
        Self::write_atomic(&paths[0], &identity.root_key_pem)?;
        Self::write_atomic(&paths[1], &identity.root_cert_pem)?;
        Self::write_atomic(&paths[2], &identity.host_key_pem)?;
        Self::write_atomic(&paths[3], &identity.host_cert_pem)?;
        Ok(identity)
    }

    fn get_certs_as_pem(&self) -> Result<(Vec<u8>, Vec<u8>)> {
        let root = fs::read(self.root_cert_path()).map_err(|_| {
            LockdownError::InvalidConfiguration("root certificate not provisioned".to_string())
        })?;
        let host = fs::read(self.host_cert_path()).map_err(|_| {
            LockdownError::InvalidConfiguration("host certificate not provisioned".to_string())
        })?;
        Ok((root, host))
    }

    fn has_device_public_key(&self, udid: &DeviceUdid) -> bool {
        self.pairing_path(udid).exists()
    }

    fn get_device_public_key(&self, udid: &DeviceUdid) -> Result<Option<Vec<u8>>> {
        match fs::read(self.pairing_path(udid)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(self, pem))]
    fn set_device_public_key(&self, udid: &DeviceUdid, pem: &[u8]) -> Result<()> {
        Self::write_atomic(&self.pairing_path(udid), pem)
    }

    #[instrument(skip(self))]
    fn remove_device_public_key(&self, udid: &DeviceUdid) -> Result<()> {
        match fs::remove_file(self.pairing_path(udid)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
