//! PKCS#12 client certificate handling. The broker hands out a single `.pfx`
//! blob per device; we split it into a PEM cert and key on disk because
//! that's what the underlying MQTT client library wants, and make sure the
//! split copy doesn't outlive the process or outrank its owner's umask.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

use log::debug;
use openssl::pkcs12::Pkcs12;
use power_sdk_core::error::TransportError;
use tempfile::TempDir;

/// Directories still awaiting cleanup, drained by `reap_on_exit` if the
/// process exits before their owning `TlsMaterial` gets a chance to drop,
/// e.g. `std::process::exit` or an unhandled signal.
fn pending_dirs() -> &'static Mutex<Vec<PathBuf>> {
    static PENDING: OnceLock<Mutex<Vec<PathBuf>>> = OnceLock::new();
    PENDING.get_or_init(|| Mutex::new(Vec::new()))
}

/// Registers `reap_on_exit` with `libc::atexit` exactly once. `atexit` only
/// takes a bare `extern "C" fn()`, so the hook has no captured state of its
/// own and instead drains whatever paths `pending_dirs()` still holds.
fn ensure_exit_hook_registered() {
    static REGISTERED: OnceLock<()> = OnceLock::new();
    REGISTERED.get_or_init(|| {
        // SAFETY: `reap_on_exit` takes no arguments, returns nothing, and
        // only touches the process-global `pending_dirs()` registry.
        unsafe {
            libc::atexit(reap_on_exit);
        }
    });
}

extern "C" fn reap_on_exit() {
    let dirs = match pending_dirs().lock() {
        Ok(mut guard) => std::mem::take(&mut *guard),
        Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
    };
    for dir in dirs {
        let _ = fs::remove_dir_all(&dir);
    }
}

/// Extracted client cert/key pair, written to a process-private temp
/// directory. The directory is removed deterministically when this value
/// drops (the failure/disconnect path), and is also registered with a
/// process-exit hook so it is still reaped if the process terminates
/// abruptly before `Drop` runs.
pub struct TlsMaterial {
    dir: TempDir,
    cert_path: PathBuf,
    key_path: PathBuf,
}

impl TlsMaterial {
    pub fn cert_path(&self) -> &Path {
        &self.cert_path
    }

    pub fn key_path(&self) -> &Path {
        &self.key_path
    }
}

impl Drop for TlsMaterial {
    fn drop(&mut self) {
        let path = self.dir.path().to_path_buf();
        if let Ok(mut pending) = pending_dirs().lock() {
            pending.retain(|p| p != &path);
        }
    }
}

/// Reads a PKCS#12 blob, decrypts it with `password`, and writes the client
/// certificate and private key out as PEM files under a fresh temp
/// directory restricted to the current user.
pub fn prepare_tls_material(pfx_path: &Path, password: &str) -> Result<TlsMaterial, TransportError> {
    let der = fs::read(pfx_path)
        .map_err(|e| TransportError::TlsSetupFailed(format!("reading {}: {e}", pfx_path.display())))?;
    let pkcs12 = Pkcs12::from_der(&der)
        .map_err(|e| TransportError::TlsSetupFailed(format!("parsing pkcs12: {e}")))?;
    let parsed = pkcs12
        .parse2(password)
        .map_err(|e| TransportError::TlsSetupFailed(format!("decrypting pkcs12: {e}")))?;

    let cert = parsed
        .cert
        .ok_or_else(|| TransportError::TlsSetupFailed("pkcs12 contains no client certificate".to_string()))?;
    let key = parsed
        .pkey
        .ok_or_else(|| TransportError::TlsSetupFailed("pkcs12 contains no private key".to_string()))?;

    let cert_pem = cert
        .to_pem()
        .map_err(|e| TransportError::TlsSetupFailed(format!("encoding cert pem: {e}")))?;
    let key_pem = key
        .private_key_to_pem_pkcs8()
        .map_err(|e| TransportError::TlsSetupFailed(format!("encoding key pem: {e}")))?;

    let dir = TempDir::new().map_err(|e| TransportError::TlsSetupFailed(format!("creating tls dir: {e}")))?;
    set_owner_only(dir.path())?;

    let cert_path = dir.path().join("client.crt");
    let key_path = dir.path().join("client.key");
    write_secure(&cert_path, &cert_pem)?;
    write_secure(&key_path, &key_pem)?;

    ensure_exit_hook_registered();
    pending_dirs()
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .push(dir.path().to_path_buf());

    debug!("wrote client tls material to {}", dir.path().display());

    Ok(TlsMaterial {
        dir,
        cert_path,
        key_path,
    })
}

fn write_secure(path: &Path, contents: &[u8]) -> Result<(), TransportError> {
    let mut f = fs::File::create(path)
        .map_err(|e| TransportError::TlsSetupFailed(format!("creating {}: {e}", path.display())))?;
    f.write_all(contents)
        .map_err(|e| TransportError::TlsSetupFailed(format!("writing {}: {e}", path.display())))?;
    set_owner_read_only(path)
}

#[cfg(unix)]
fn set_owner_only(dir: &Path) -> Result<(), TransportError> {
    fs::set_permissions(dir, fs::Permissions::from_mode(0o700))
        .map_err(|e| TransportError::TlsSetupFailed(format!("chmod {}: {e}", dir.display())))
}

#[cfg(not(unix))]
fn set_owner_only(_dir: &Path) -> Result<(), TransportError> {
    Ok(())
}

#[cfg(unix)]
fn set_owner_read_only(path: &Path) -> Result<(), TransportError> {
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
        .map_err(|e| TransportError::TlsSetupFailed(format!("chmod {}: {e}", path.display())))
}

#[cfg(not(unix))]
fn set_owner_read_only(_path: &Path) -> Result<(), TransportError> {
    Ok(())
}
