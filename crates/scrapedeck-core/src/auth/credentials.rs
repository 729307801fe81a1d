use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use anyhow::{Context, Result};
use keyring::Entry;

use crate::config::{Config, CredentialBackend, APP_NAME};

/// Storage key for the bearer credential.
pub const ACCESS_TOKEN_KEY: &str = "accessToken";

/// Storage key for the refresh cookie the backend sets on login.
pub const SESSION_COOKIE_KEY: &str = "sessionCookie";

/// Credentials file name in cache directory
const CREDENTIALS_FILE: &str = "credentials.json";

/// Durable client-side key/value store for session secrets.
///
/// Implementations must be safe to share between the session store and
/// every in-flight request; reads always hit the backing store so callers
/// never see a cached copy.
pub trait CredentialStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;

    fn access_token(&self) -> Result<Option<String>> {
        Ok(self.get(ACCESS_TOKEN_KEY)?.filter(|t| !t.is_empty()))
    }

    fn set_access_token(&self, token: &str) -> Result<()> {
        self.set(ACCESS_TOKEN_KEY, token)
    }

    /// Remove every session secret (token and refresh cookie).
    fn clear_session(&self) -> Result<()> {
        self.remove(ACCESS_TOKEN_KEY)?;
        self.remove(SESSION_COOKIE_KEY)
    }
}

/// Build the backend selected in the config.
pub fn open_store(config: &Config) -> Result<Arc<dyn CredentialStore>> {
    let store: Arc<dyn CredentialStore> = match config.credential_backend {
        CredentialBackend::File => Arc::new(FileCredentialStore::new(config.cache_dir()?)),
        CredentialBackend::Keyring => Arc::new(KeyringCredentialStore::new(APP_NAME)),
        CredentialBackend::Memory => Arc::new(MemoryCredentialStore::default()),
    };
    Ok(store)
}

/// Stores secrets in the OS keychain, one entry per key.
pub struct KeyringCredentialStore {
    service: String,
}

impl KeyringCredentialStore {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, key: &str) -> Result<Entry> {
        Entry::new(&self.service, key).context("Failed to create keyring entry")
    }
}

impl CredentialStore for KeyringCredentialStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        match self.entry(key)?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e).context("Failed to retrieve secret from keychain"),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entry(key)?
            .set_password(value)
            .context("Failed to store secret in keychain")
    }

    fn remove(&self, key: &str) -> Result<()> {
        match self.entry(key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e).context("Failed to delete secret from keychain"),
        }
    }
}

/// Stores secrets as a flat JSON object in the cache directory.
pub struct FileCredentialStore {
    cache_dir: PathBuf,
    // Serializes read-modify-write cycles within this process.
    lock: RwLock<()>,
}

impl FileCredentialStore {
    pub fn new(cache_dir: PathBuf) -> Self {
        Self {
            cache_dir,
            lock: RwLock::new(()),
        }
    }

    fn path(&self) -> PathBuf {
        self.cache_dir.join(CREDENTIALS_FILE)
    }

    fn read_all(&self) -> Result<BTreeMap<String, String>> {
        let path = self.path();
        if !path.exists() {
            return Ok(BTreeMap::new());
        }
        let contents = std::fs::read_to_string(&path).context("Failed to read credentials file")?;
        serde_json::from_str(&contents).context("Failed to parse credentials file")
    }

    fn write_all(&self, values: &BTreeMap<String, String>) -> Result<()> {
        let path = self.path();
        if values.is_empty() {
            if path.exists() {
                std::fs::remove_file(&path).context("Failed to remove credentials file")?;
            }
            return Ok(());
        }
        std::fs::create_dir_all(&self.cache_dir)?;
        let contents = serde_json::to_string_pretty(values)?;
        std::fs::write(&path, contents).context("Failed to write credentials file")?;
        restrict_permissions(&path)
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &std::path::Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .context("Failed to restrict credentials file permissions")
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &std::path::Path) -> Result<()> {
    Ok(())
}

impl CredentialStore for FileCredentialStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let _guard = self.lock.read().map_err(|_| anyhow::anyhow!("credentials lock poisoned"))?;
        Ok(self.read_all()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let _guard = self.lock.write().map_err(|_| anyhow::anyhow!("credentials lock poisoned"))?;
        let mut values = self.read_all()?;
        values.insert(key.to_string(), value.to_string());
        self.write_all(&values)
    }

    fn remove(&self, key: &str) -> Result<()> {
        let _guard = self.lock.write().map_err(|_| anyhow::anyhow!("credentials lock poisoned"))?;
        let mut values = self.read_all()?;
        if values.remove(key).is_some() {
            self.write_all(&values)?;
        }
        Ok(())
    }
}

/// Process-local store. Used by tests and `memory` mode.
#[derive(Default)]
pub struct MemoryCredentialStore {
    values: RwLock<HashMap<String, String>>,
}

impl MemoryCredentialStore {
    /// Store pre-seeded with an access token.
    pub fn with_token(token: &str) -> Self {
        let store = Self::default();
        if let Ok(mut values) = store.values.write() {
            values.insert(ACCESS_TOKEN_KEY.to_string(), token.to_string());
        }
        store
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let values = self.values.read().map_err(|_| anyhow::anyhow!("credentials lock poisoned"))?;
        Ok(values.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut values = self.values.write().map_err(|_| anyhow::anyhow!("credentials lock poisoned"))?;
        values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut values = self.values.write().map_err(|_| anyhow::anyhow!("credentials lock poisoned"))?;
        values.remove(key);
        Ok(())
    }
}
