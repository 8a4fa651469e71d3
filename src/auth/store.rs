use std::collections::HashMap;
use std::fs;
use std::io::Write;
#[cfg(unix)]
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AuthError;

/// Durable key-value secret storage supplied by the host application.
pub trait SecretStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, AuthError>;
    fn set(&self, key: &str, value: &str) -> Result<(), AuthError>;
    fn delete(&self, key: &str) -> Result<(), AuthError>;
}

/// File-backed secret store: one owner-only TOML file per key.
///
/// # Example
/// ```no_run
/// use connector_auth::auth::{FileSecretStore, SecretStore};
///
/// let store = FileSecretStore::new_default();
/// store.set("github.sessions", "[]")?;
/// # Ok::<(), connector_auth::error::AuthError>(())
/// ```
#[derive(Debug, Clone)]
pub struct FileSecretStore {
    base_dir: PathBuf,
}

impl FileSecretStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn new_default() -> Self {
        Self::new(default_store_dir())
    }

    fn secret_path(&self, key: &str) -> PathBuf {
        self.base_dir.join(format!("{}.toml", normalize_key(key)))
    }

    fn read_file(path: &Path) -> Result<Option<SecretFile>, AuthError> {
        let raw = match fs::read_to_string(path) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(AuthError::Storage(err.to_string())),
        };
        let file: SecretFile = toml::from_str(&raw)
            .map_err(|e| AuthError::Serialization(format!("{}: {e}", path.display())))?;
        if file.version != SECRET_FILE_VERSION {
            return Err(AuthError::Storage(format!(
                "Unsupported secret file version {} at {}",
                file.version,
                path.display()
            )));
        }
        Ok(Some(file))
    }
}

/// Two keys normalized to the same file name must not read or clobber
/// each other's secrets.
fn key_conflict(path: &Path, stored: &str, requested: &str) -> AuthError {
    AuthError::Storage(format!(
        "{} holds secrets for key {stored:?}, not {requested:?}",
        path.display()
    ))
}

impl SecretStore for FileSecretStore {
    fn get(&self, key: &str) -> Result<Option<String>, AuthError> {
        let path = self.secret_path(key);
        match Self::read_file(&path)? {
            Some(file) if file.key != key => Err(key_conflict(&path, &file.key, key)),
            Some(file) => Ok(Some(file.value)),
            None => Ok(None),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), AuthError> {
        let path = self.secret_path(key);
        if let Some(existing) = Self::read_file(&path)? {
            if existing.key != key {
                return Err(key_conflict(&path, &existing.key, key));
            }
        }
        let file = SecretFile {
            version: SECRET_FILE_VERSION,
            key: key.to_string(),
            value: value.to_string(),
            saved_at: Utc::now(),
        };
        let serialized =
            toml::to_string(&file).map_err(|e| AuthError::Serialization(e.to_string()))?;
        atomic_write(&path, serialized.as_bytes())
    }

    fn delete(&self, key: &str) -> Result<(), AuthError> {
        let path = self.secret_path(key);
        if Self::read_file(&path)?.is_some_and(|file| file.key != key) {
            return Ok(());
        }
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(AuthError::Storage(err.to_string())),
        }
    }
}

const SECRET_FILE_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct SecretFile {
    version: u32,
    key: String,
    value: String,
    saved_at: DateTime<Utc>,
}

/// Process-local secret store for tests and ephemeral hosts.
#[derive(Debug, Default)]
pub struct MemorySecretStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>, AuthError> {
        self.entries
            .lock()
            .map_err(|_| AuthError::Storage("secret store lock poisoned".to_string()))
    }
}

impl SecretStore for MemorySecretStore {
    fn get(&self, key: &str) -> Result<Option<String>, AuthError> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), AuthError> {
        self.lock()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), AuthError> {
        self.lock()?.remove(key);
        Ok(())
    }
}

/// Secret store backed by the OS keyring (Secret Service, Keychain, Credential Manager).
#[cfg(feature = "keyring")]
#[derive(Debug, Clone)]
pub struct KeyringSecretStore {
    service: String,
}

#[cfg(feature = "keyring")]
impl KeyringSecretStore {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, key: &str) -> Result<keyring::Entry, AuthError> {
        keyring::Entry::new(&self.service, key).map_err(|e| AuthError::Storage(e.to_string()))
    }
}

#[cfg(feature = "keyring")]
impl SecretStore for KeyringSecretStore {
    fn get(&self, key: &str) -> Result<Option<String>, AuthError> {
        match self.entry(key)?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(AuthError::Storage(e.to_string())),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), AuthError> {
        self.entry(key)?
            .set_password(value)
            .map_err(|e| AuthError::Storage(e.to_string()))
    }

    fn delete(&self, key: &str) -> Result<(), AuthError> {
        match self.entry(key)?.delete_password() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(AuthError::Storage(e.to_string())),
        }
    }
}

/// `~/.connector-auth`, or `.connector-auth` when no home directory is known.
pub fn default_store_dir() -> PathBuf {
    directories::UserDirs::new()
        .map(|dirs| dirs.home_dir().join(".connector-auth"))
        .unwrap_or_else(|| PathBuf::from(".connector-auth"))
}

/// File-name-safe form of a secret key. Not injective: `ACME` and `acme` share one.
pub(crate) fn normalize_key(value: &str) -> String {
    let trimmed = value.trim();
    let mut out = String::with_capacity(trimmed.len());
    for ch in trimmed.chars() {
        let lower = ch.to_ascii_lowercase();
        if lower.is_ascii_alphanumeric() || lower == '-' || lower == '.' || lower == '_' {
            out.push(lower);
        } else {
            out.push('-');
        }
    }
    if out.trim_matches(|c: char| c == '-' || c == '.').is_empty() {
        "default".to_string()
    } else {
        out
    }
}

fn atomic_write(path: &Path, data: &[u8]) -> Result<(), AuthError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let file_name = path.file_name().ok_or_else(|| {
        AuthError::Storage(format!("Secret path {} has no file name", path.display()))
    })?;
    let temp_path = path.with_file_name(format!(
        ".{}.tmp-{}-{}",
        file_name.to_string_lossy(),
        std::process::id(),
        uuid::Uuid::new_v4().simple()
    ));

    let mut options = fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    options.mode(0o600);

    let write_result = (|| -> std::io::Result<()> {
        let mut temp_file = options.open(&temp_path)?;
        temp_file.write_all(data)?;
        temp_file.sync_all()?;
        Ok(())
    })();

    if let Err(err) = write_result {
        let _ = fs::remove_file(&temp_path);
        return Err(err.into());
    }

    if let Err(err) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(err.into());
    }

    #[cfg(unix)]
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;

    Ok(())
}
