//! Persistent session store
//!
//! Durable mirror of the session token and user profile. Backends implement
//! [`KeyValueStore`]; [`PersistentSessionStore`] layers the session entries on
//! top and never lets a storage failure escape.

use classcraft_core::{ClassCraftError, ClassCraftResult, ErrorContext, KeyValueStore, UserProfile};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Key holding the raw token string
pub const TOKEN_KEY: &str = "token";
/// Key holding the JSON-serialized user profile
pub const USER_KEY: &str = "user";

/// Key-value store persisted as a single JSON object on disk
pub struct FileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStore {
    /// Create a store backed by `path`. The file is created on first write.
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn storage_error(
        &self,
        operation: &str,
        message: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> ClassCraftError {
        ClassCraftError::Storage {
            message,
            source: Some(source),
            context: ErrorContext::new("file_store")
                .with_operation(operation)
                .with_metadata("path", &self.path.display().to_string()),
        }
    }

    fn read_entries(&self) -> ClassCraftResult<BTreeMap<String, String>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => {
                return Err(self.storage_error(
                    "read",
                    format!("Failed to read session file: {}", e),
                    Box::new(e),
                ))
            }
        };

        if content.trim().is_empty() {
            return Ok(BTreeMap::new());
        }

        serde_json::from_str(&content).map_err(|e| {
            self.storage_error(
                "parse",
                format!("Session file is corrupt: {}", e),
                Box::new(e),
            )
        })
    }

    /// Entries to rewrite, and whether the file on disk was unparsable.
    /// A corrupt file is replaced rather than blocking every later write.
    fn entries_for_write(&self) -> ClassCraftResult<(BTreeMap<String, String>, bool)> {
        match self.read_entries() {
            Ok(entries) => Ok((entries, false)),
            Err(ClassCraftError::Storage { context, .. })
                if context.operation.as_deref() == Some("parse") =>
            {
                warn!(path = %self.path.display(), "Overwriting corrupt session file");
                Ok((BTreeMap::new(), true))
            }
            Err(e) => Err(e),
        }
    }

    fn write_entries(&self, entries: &BTreeMap<String, String>) -> ClassCraftResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                self.storage_error(
                    "create_dir",
                    format!("Failed to create session directory: {}", e),
                    Box::new(e),
                )
            })?;
        }

        let json_data = serde_json::to_string_pretty(entries)?;
        let tmp_path = self.path.with_extension("json.tmp");

        std::fs::write(&tmp_path, json_data).map_err(|e| {
            self.storage_error(
                "write",
                format!("Failed to write session file: {}", e),
                Box::new(e),
            )
        })?;
        std::fs::rename(&tmp_path, &self.path).map_err(|e| {
            self.storage_error(
                "rename",
                format!("Failed to replace session file: {}", e),
                Box::new(e),
            )
        })?;

        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> ClassCraftResult<Option<String>> {
        let _guard = self.lock.lock();
        Ok(self.read_entries()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> ClassCraftResult<()> {
        let _guard = self.lock.lock();
        let (mut entries, _) = self.entries_for_write()?;
        entries.insert(key.to_string(), value.to_string());
        self.write_entries(&entries)
    }

    fn remove(&self, key: &str) -> ClassCraftResult<()> {
        let _guard = self.lock.lock();
        let (mut entries, corrupt) = self.entries_for_write()?;
        if entries.remove(key).is_none() && !corrupt {
            return Ok(());
        }
        self.write_entries(&entries)
    }
}

/// In-process key-value store
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
    unavailable: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose every operation fails, like a disabled browser storage
    pub fn unavailable() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            unavailable: true,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    fn check_available(&self, operation: &str) -> ClassCraftResult<()> {
        if self.unavailable {
            return Err(ClassCraftError::Storage {
                message: "storage is unavailable".to_string(),
                source: None,
                context: ErrorContext::new("memory_store").with_operation(operation),
            });
        }
        Ok(())
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> ClassCraftResult<Option<String>> {
        self.check_available("get")?;
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> ClassCraftResult<()> {
        self.check_available("set")?;
        self.entries
            .lock()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> ClassCraftResult<()> {
        self.check_available("remove")?;
        self.entries.lock().remove(key);
        Ok(())
    }
}

/// Best-effort session entries on top of a durable store
#[derive(Clone)]
pub struct PersistentSessionStore {
    backend: Arc<dyn KeyValueStore>,
}

impl PersistentSessionStore {
    pub fn new(backend: Arc<dyn KeyValueStore>) -> Self {
        Self { backend }
    }

    /// Store backed by a JSON file at `path`
    pub fn file<P: AsRef<Path>>(path: P) -> Self {
        Self::new(Arc::new(FileStore::new(path)))
    }

    pub fn read_token(&self) -> Option<String> {
        match self.backend.get(TOKEN_KEY) {
            Ok(token) => token.filter(|t| !t.is_empty()),
            Err(e) => {
                warn!(error = %e, "Failed to read stored token");
                None
            }
        }
    }

    pub fn write_token(&self, token: &str) {
        if let Err(e) = self.backend.set(TOKEN_KEY, token) {
            warn!(error = %e, "Failed to persist token");
        }
    }

    pub fn clear_token(&self) {
        if let Err(e) = self.backend.remove(TOKEN_KEY) {
            warn!(error = %e, "Failed to clear stored token");
        }
    }

    /// Stored profile; absent or unparsable entries read as `None`
    pub fn read_user(&self) -> Option<UserProfile> {
        let raw = match self.backend.get(USER_KEY) {
            Ok(raw) => raw?,
            Err(e) => {
                warn!(error = %e, "Failed to read stored user");
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(user) => Some(user),
            Err(e) => {
                warn!(error = %e, "Ignoring unparsable stored user");
                None
            }
        }
    }

    pub fn write_user(&self, user: &UserProfile) {
        let json = match serde_json::to_string(user) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "Failed to serialize user");
                return;
            }
        };

        if let Err(e) = self.backend.set(USER_KEY, &json) {
            warn!(error = %e, "Failed to persist user");
        }
    }

    pub fn clear_user(&self) {
        if let Err(e) = self.backend.remove(USER_KEY) {
            warn!(error = %e, "Failed to clear stored user");
        }
    }

    /// Remove both entries
    pub fn clear(&self) {
        self.clear_token();
        self.clear_user();
        debug!("Cleared stored session");
    }
}
