//! Persisted local key-value state
//!
//! Small string-keyed store holding per-device state: the usage counter and
//! its day stamp, the device fingerprint, preferences, one-time bonus flags
//! and auth tokens. Everything that must survive a restart on this device
//! (and only this device) lives here.

use crate::error::{CharlaError, Result};
use crate::locale::Language;
use directories::ProjectDirs;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Device fingerprint cache
pub const KEY_FINGERPRINT: &str = "charla.fingerprint";
/// Messages used on the stamped day
pub const KEY_USED_COUNT: &str = "charla.msgs_used";
/// Day stamp the counter belongs to
pub const KEY_USED_DATE: &str = "charla.msgs_date";
/// Age verification acknowledgement
pub const KEY_AGE_VERIFIED: &str = "charla.age_verified";
/// Selected UI language
pub const KEY_LANGUAGE: &str = "charla.lang";
/// Accumulated bonus message allowance
pub const KEY_BONUS_MESSAGES: &str = "charla.bonus_msgs";
/// Prefix for one-time bonus grant flags
pub const KEY_BONUS_FLAG_PREFIX: &str = "charla.bonus.";
/// Serialized auth tokens
pub const KEY_AUTH_TOKENS: &str = "charla.auth";

/// String-keyed persistent storage
///
/// Implementations use interior mutability so a single store can be shared
/// between the ledger, preferences and the token source.
pub trait KeyValueStore: Send + Sync {
    /// Reads a value, `None` when the key is absent
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Writes a value, replacing any previous one
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Removes a key; removing an absent key is not an error
    fn remove(&self, key: &str) -> Result<()>;
}

/// In-process store used by tests and ephemeral runs
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    /// Creates an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let values = self
            .values
            .lock()
            .map_err(|_| CharlaError::Storage("memory store lock poisoned".to_string()))?;
        Ok(values.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut values = self
            .values
            .lock()
            .map_err(|_| CharlaError::Storage("memory store lock poisoned".to_string()))?;
        values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut values = self
            .values
            .lock()
            .map_err(|_| CharlaError::Storage("memory store lock poisoned".to_string()))?;
        values.remove(key);
        Ok(())
    }
}

/// JSON-file backed store
///
/// The whole map is loaded on first access and rewritten after every
/// mutation. A corrupt file is logged and treated as empty so local state
/// never blocks the user.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    cache: Mutex<Option<BTreeMap<String, String>>>,
}

impl FileStore {
    /// Opens the store in the platform data directory
    ///
    /// Honors `CHARLA_STATE_PATH` as an override.
    ///
    /// # Errors
    ///
    /// Returns `CharlaError::Storage` if no data directory can be determined
    pub fn new() -> Result<Self> {
        if let Ok(override_path) = std::env::var("CHARLA_STATE_PATH") {
            return Ok(Self::with_path(override_path));
        }

        let proj_dirs = ProjectDirs::from("com", "charla", "charla")
            .ok_or_else(|| CharlaError::Storage("Could not determine data directory".into()))?;

        Ok(Self::with_path(proj_dirs.data_dir().join("state.json")))
    }

    /// Opens the store at an explicit path
    ///
    /// # Examples
    ///
    /// ```
    /// use charla::local_state::{FileStore, KeyValueStore};
    ///
    /// let dir = std::env::temp_dir().join("charla-doc-state");
    /// let store = FileStore::with_path(dir.join("state.json"));
    /// store.set("greeting", "hola").unwrap();
    /// assert_eq!(store.get("greeting").unwrap(), Some("hola".to_string()));
    /// ```
    pub fn with_path<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            cache: Mutex::new(None),
        }
    }

    /// Location of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> BTreeMap<String, String> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return BTreeMap::new(),
            Err(e) => {
                tracing::warn!("Failed to read state file {}: {}", self.path.display(), e);
                return BTreeMap::new();
            }
        };

        serde_json::from_str(&contents).unwrap_or_else(|e| {
            tracing::warn!(
                "State file {} is corrupt, starting empty: {}",
                self.path.display(),
                e
            );
            BTreeMap::new()
        })
    }

    fn persist(&self, values: &BTreeMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                CharlaError::Storage(format!("Failed to create state directory: {}", e))
            })?;
        }
        let json = serde_json::to_string_pretty(values)?;
        std::fs::write(&self.path, json)
            .map_err(|e| CharlaError::Storage(format!("Failed to write state file: {}", e)))?;
        Ok(())
    }

    fn with_values<T>(&self, f: impl FnOnce(&BTreeMap<String, String>) -> T) -> Result<T> {
        let mut cache = self
            .cache
            .lock()
            .map_err(|_| CharlaError::Storage("state file lock poisoned".to_string()))?;
        let values = cache.get_or_insert_with(|| self.load());
        Ok(f(values))
    }

    // The cache only takes the new map once it is on disk.
    fn update(&self, f: impl FnOnce(&mut BTreeMap<String, String>)) -> Result<()> {
        let mut cache = self
            .cache
            .lock()
            .map_err(|_| CharlaError::Storage("state file lock poisoned".to_string()))?;
        let mut next = cache.get_or_insert_with(|| self.load()).clone();
        f(&mut next);
        self.persist(&next)?;
        *cache = Some(next);
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        self.with_values(|values| values.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.update(|values| {
            values.insert(key.to_string(), value.to_string());
        })
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.update(|values| {
            values.remove(key);
        })
    }
}

/// Typed accessors for user preferences kept in the local store
pub struct LocalPrefs<'a> {
    store: &'a dyn KeyValueStore,
}

impl<'a> LocalPrefs<'a> {
    /// Wraps a store
    pub fn new(store: &'a dyn KeyValueStore) -> Self {
        Self { store }
    }

    /// Whether the user has confirmed the age gate on this device
    pub fn age_verified(&self) -> bool {
        matches!(self.store.get(KEY_AGE_VERIFIED), Ok(Some(v)) if v == "true")
    }

    /// Records the age gate confirmation
    pub fn set_age_verified(&self) -> Result<()> {
        self.store.set(KEY_AGE_VERIFIED, "true")
    }

    /// Selected language, if one was stored and is known
    pub fn language(&self) -> Option<Language> {
        match self.store.get(KEY_LANGUAGE) {
            Ok(Some(code)) => code.parse().ok(),
            _ => None,
        }
    }

    /// Stores the selected language
    pub fn set_language(&self, language: Language) -> Result<()> {
        self.store.set(KEY_LANGUAGE, language.code())
    }
}
