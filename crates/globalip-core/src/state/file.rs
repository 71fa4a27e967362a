// # File State Store
//
// File-based implementation of StateStore with crash recovery.
//
// ## Purpose
//
// Persists bound global IPs across daemon restarts. Losing this file means
// losing track of allocated (and billed) remote objects, so every change is
// written through immediately.
//
// ## Crash Recovery
//
// - Atomic writes: Uses write-then-rename for atomicity
// - Corruption detection: Validates JSON on load
// - Automatic backup: Keeps .backup of last known good state
// - Recovery: Falls back to backup if corruption detected
//
// ## File Format
//
// ```json
// {
//   "version": "1.0",
//   "bindings": {
//     "test-global-ip": {
//       "id": "1234",
//       "ip_address": "159.8.1.2",
//       "routes_to": "10.0.0.5",
//       "last_updated": "2025-01-09T12:00:00Z"
//     }
//   }
// }
// ```

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

use crate::Error;
use crate::config::StateStoreConfig;
use crate::model::GlobalIpBinding;
use crate::traits::{StateStore, StateStoreFactory};

/// State file format version
const STATE_FILE_VERSION: &str = "1.0";

/// File-based state store with crash recovery
///
/// Writes are serialized: the in-memory map and the file are updated under
/// the same lock, so concurrent reconciles never interleave temp files.
///
/// # Example
///
/// ```rust,no_run
/// use globalip_core::state::FileStateStore;
/// use globalip_core::traits::StateStore;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = FileStateStore::new("/var/lib/globalip/state.json").await?;
///
///     for name in store.list_bindings().await? {
///         println!("{name}: {:?}", store.get_binding(&name).await?);
///     }
///
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct FileStateStore {
    path: PathBuf,
    state: RwLock<FileState>,
}

#[derive(Debug)]
struct FileState {
    bindings: HashMap<String, GlobalIpBinding>,
    dirty: bool,
}

/// Serializable state file format
#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct StateFileFormat {
    version: String,
    bindings: HashMap<String, GlobalIpBinding>,
}

impl FileStateStore {
    /// Create or load a file state store
    ///
    /// This will:
    /// 1. Create parent directories if needed
    /// 2. Try to load the existing state file
    /// 3. If it is corrupted, load the backup and restore it
    /// 4. If both fail, start with empty state
    pub async fn new<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).await.map_err(|e| {
                    Error::config(format!(
                        "Failed to create state directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let bindings = Self::load_state_with_recovery(&path).await?;

        Ok(Self {
            path,
            state: RwLock::new(FileState {
                bindings,
                dirty: false,
            }),
        })
    }

    async fn load_state_with_recovery(
        path: &Path,
    ) -> Result<HashMap<String, GlobalIpBinding>, Error> {
        let err = match Self::load_state(path).await {
            Ok(bindings) => {
                tracing::debug!("Loaded state from file: {} bindings", bindings.len());
                return Ok(bindings);
            }
            Err(Error::Json(e)) => e,
            Err(e) => return Err(e),
        };

        tracing::warn!(
            "State file {} appears corrupted: {}. Attempting recovery from backup.",
            path.display(),
            err
        );

        let backup_path = Self::backup_path(path);
        if !backup_path.exists() {
            tracing::warn!("No backup file found. Starting with empty state.");
            return Ok(HashMap::new());
        }

        match Self::load_state(&backup_path).await {
            Ok(bindings) => {
                tracing::info!("Recovered state from backup: {} bindings", bindings.len());
                if let Err(restore_err) = fs::copy(&backup_path, path).await {
                    tracing::error!(
                        "Failed to restore state file from backup: {}",
                        restore_err
                    );
                }
                Ok(bindings)
            }
            Err(backup_err) => {
                tracing::error!(
                    "Backup also corrupted: {}. Starting with empty state.",
                    backup_err
                );
                Ok(HashMap::new())
            }
        }
    }

    /// Load state from file; parse failures surface as [`Error::Json`]
    async fn load_state(path: &Path) -> Result<HashMap<String, GlobalIpBinding>, Error> {
        if !path.exists() {
            tracing::debug!("State file does not exist: {}", path.display());
            return Ok(HashMap::new());
        }

        let content = fs::read_to_string(path).await.map_err(|e| {
            Error::state_store(format!(
                "Failed to read state file {}: {}",
                path.display(),
                e
            ))
        })?;

        let state_file: StateFileFormat = serde_json::from_str(&content)?;

        if state_file.version != STATE_FILE_VERSION {
            tracing::warn!(
                "State file version mismatch: expected {}, got {}. \
                Attempting to load anyway.",
                STATE_FILE_VERSION,
                state_file.version
            );
        }

        Ok(state_file.bindings)
    }

    /// Write state to file atomically; caller holds the write lock
    async fn write_state(&self, state: &mut FileState) -> Result<(), Error> {
        let state_file = StateFileFormat {
            version: STATE_FILE_VERSION.to_string(),
            bindings: state.bindings.clone(),
        };

        let json = serde_json::to_string_pretty(&state_file)
            .map_err(|e| Error::state_store(format!("Failed to serialize state: {}", e)))?;

        let temp_path = self.temp_path();
        {
            let mut file = fs::File::create(&temp_path).await.map_err(|e| {
                Error::state_store(format!(
                    "Failed to create temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;

            file.write_all(json.as_bytes()).await.map_err(|e| {
                Error::state_store(format!(
                    "Failed to write to temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;

            file.sync_all().await.map_err(|e| {
                Error::state_store(format!(
                    "Failed to sync temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;
        }

        if self.path.exists() {
            let backup_path = Self::backup_path(&self.path);
            if let Err(e) = fs::copy(&self.path, &backup_path).await {
                tracing::warn!("Failed to create backup: {}", e);
            }
        }

        fs::rename(&temp_path, &self.path).await.map_err(|e| {
            Error::state_store(format!(
                "Failed to rename {} to {}: {}",
                temp_path.display(),
                self.path.display(),
                e
            ))
        })?;

        state.dirty = false;
        tracing::trace!("State written to file: {}", self.path.display());
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let mut temp = self.path.clone();
        temp.set_extension("tmp");
        temp
    }

    fn backup_path(path: &Path) -> PathBuf {
        let mut backup = path.to_path_buf();
        backup.set_extension("backup");
        backup
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn get_binding(&self, name: &str) -> Result<Option<GlobalIpBinding>, Error> {
        Ok(self.state.read().await.bindings.get(name).cloned())
    }

    async fn set_binding(&self, name: &str, binding: &GlobalIpBinding) -> Result<(), Error> {
        let mut state = self.state.write().await;
        state.bindings.insert(name.to_string(), binding.clone());
        state.dirty = true;

        // Immediate write for durability
        self.write_state(&mut state).await
    }

    async fn delete_binding(&self, name: &str) -> Result<(), Error> {
        let mut state = self.state.write().await;
        if state.bindings.remove(name).is_none() {
            return Ok(());
        }
        state.dirty = true;

        self.write_state(&mut state).await
    }

    async fn list_bindings(&self) -> Result<Vec<String>, Error> {
        Ok(self.state.read().await.bindings.keys().cloned().collect())
    }

    async fn flush(&self) -> Result<(), Error> {
        let mut state = self.state.write().await;
        if state.dirty {
            self.write_state(&mut state).await
        } else {
            Ok(())
        }
    }
}

/// Factory for [`FileStateStore`]
pub struct FileStateStoreFactory;

#[async_trait]
impl StateStoreFactory for FileStateStoreFactory {
    async fn create(&self, config: &StateStoreConfig) -> Result<Box<dyn StateStore>, Error> {
        match config {
            StateStoreConfig::File { path } => Ok(Box::new(FileStateStore::new(path).await?)),
            other => Err(Error::config(format!(
                "File state store cannot be built from {} config",
                other.type_name()
            ))),
        }
    }
}
