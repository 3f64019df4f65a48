//! Key-value stores backing the engine state
//!
//! Two namespaces exist at runtime: a session store that lives exactly as
//! long as one WebSocket session, and a durable store that survives process
//! restarts. Values are plain strings; callers parse.

use crate::error::{EngineError, EngineResult};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::warn;

/// Well-known store keys
pub mod keys {
    pub const CP_STATUS: &str = "cp_status";
    pub const METER_VALUE: &str = "meter_value";
    pub const TRANSACTION_ID: &str = "TransactionId";
    pub const WS_URL: &str = "WSURL";
    pub const CP_ID: &str = "CPID";
    pub const TAG: &str = "TAG";

    /// Session-scoped connector status key
    pub fn conn_status(connector_id: u32) -> String {
        format!("conn_status{connector_id}")
    }

    /// Durable connector availability key
    pub fn conn_availability(connector_id: u32) -> String {
        format!("conn_availability{connector_id}")
    }
}

/// String-keyed store interface shared by both namespaces
pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn put(&self, key: &str, value: &str);

    /// Read with a fallback default
    fn get_or(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }
}

/// In-memory store used for the session namespace
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every entry; called when a new session starts
    pub fn clear(&self) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn put(&self, key: &str, value: &str) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value.to_string());
    }
}

/// JSON-file-backed store used for the durable namespace.
///
/// The whole map is loaded at open and written through on every put; the
/// volume of durable keys is a handful of settings and three availability
/// flags, so the rewrite cost is irrelevant.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    entries: Mutex<HashMap<String, String>>,
}

impl FileStore {
    /// Open the store, creating an empty one when the file does not exist
    pub fn open(path: impl Into<PathBuf>) -> EngineResult<Self> {
        let path = path.into();
        let entries = match std::fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw).map_err(|e| EngineError::Store {
                message: format!("{}: {e}", path.display()),
            })?,
            Err(e) if e.kind() == ErrorKind::NotFound => HashMap::new(),
            Err(e) => {
                return Err(EngineError::Store {
                    message: format!("{}: {e}", path.display()),
                })
            }
        };
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    fn persist(&self, entries: &HashMap<String, String>) {
        let serialized = match serde_json::to_string_pretty(entries) {
            Ok(serialized) => serialized,
            Err(e) => {
                warn!("Failed to serialize durable store: {e}");
                return;
            }
        };
        if let Err(e) = std::fs::write(&self.path, serialized) {
            warn!("Failed to write durable store {}: {e}", self.path.display());
        }
    }
}

impl KvStore for FileStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn put(&self, key: &str, value: &str) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_string(), value.to_string());
        self.persist(&entries);
    }
}
