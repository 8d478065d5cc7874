//! Key-value storage scopes for session state.
//!
//! Session data lives in two scopes, paired in `SessionStores`:
//! - ephemeral: cleared when the session ends (the "primary" scope)
//! - persistent: survives restarts and is shared across sessions
//!
//! Both scopes are reached through the `KeyValueStore` trait so the
//! recovery chain does not care whether values live in memory or on disk.

pub mod file;
pub mod keys;
pub mod memory;

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

pub use file::FileStore;
pub use memory::MemoryStore;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Storage quota exceeded while writing '{0}'")]
    QuotaExceeded(String),

    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// String-keyed, string-valued store. Operations are synchronous.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Removing a missing key is not an error.
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// The pair of scopes a session is spread across.
/// Clone is cheap - both scopes are shared handles.
#[derive(Clone)]
pub struct SessionStores {
    ephemeral: Arc<dyn KeyValueStore>,
    persistent: Arc<dyn KeyValueStore>,
}

impl SessionStores {
    pub fn new(ephemeral: Arc<dyn KeyValueStore>, persistent: Arc<dyn KeyValueStore>) -> Self {
        Self {
            ephemeral,
            persistent,
        }
    }

    /// Two independent in-memory scopes
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()), Arc::new(MemoryStore::new()))
    }

    pub fn ephemeral(&self) -> &dyn KeyValueStore {
        self.ephemeral.as_ref()
    }

    pub fn persistent(&self) -> &dyn KeyValueStore {
        self.persistent.as_ref()
    }
}

impl fmt::Debug for SessionStores {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionStores").finish_non_exhaustive()
    }
}
