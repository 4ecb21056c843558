mod filesystem;
mod memory;
mod sqlite;

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use moodboard_contracts::{ConversationId, ImageRef};
use thiserror::Error;

use crate::resolve::ImageResolver;

pub use filesystem::{FileSessionModes, FsReferenceStore, SESSION_MODES_FILE};
pub use memory::{MemoryReferenceStore, MemorySessionModes};
pub use sqlite::{SqliteReferenceStore, SqliteSessionModes};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{backend} store unavailable: {message}")]
    Unavailable {
        backend: &'static str,
        message: String,
    },
    #[error("{backend} store holds an unreadable entry: {message}")]
    Corrupt {
        backend: &'static str,
        message: String,
    },
}

impl StoreError {
    pub(crate) fn unavailable(backend: &'static str, err: impl fmt::Display) -> Self {
        Self::Unavailable {
            backend,
            message: err.to_string(),
        }
    }

    pub(crate) fn corrupt(backend: &'static str, err: impl fmt::Display) -> Self {
        Self::Corrupt {
            backend,
            message: err.to_string(),
        }
    }
}

/// Ordered style references per conversation. `list` returns insertion
/// order, which is also the order references are sent for composition.
pub trait ReferenceStore: Send + Sync {
    fn backend(&self) -> &'static str;
    fn list(&self, conversation: &ConversationId) -> Result<Vec<ImageRef>, StoreError>;
    fn append(&self, conversation: &ConversationId, image: ImageRef) -> Result<(), StoreError>;
    fn clear(&self, conversation: &ConversationId) -> Result<(), StoreError>;

    fn count(&self, conversation: &ConversationId) -> Result<usize, StoreError> {
        Ok(self.list(conversation)?.len())
    }
}

/// Per-conversation "collecting references" flag, `false` when never set.
pub trait SessionModeTracker: Send + Sync {
    fn get(&self, conversation: &ConversationId) -> Result<bool, StoreError>;
    fn set(&self, conversation: &ConversationId, collecting: bool) -> Result<(), StoreError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StoreBackend {
    #[default]
    Memory,
    Sqlite,
    Filesystem,
}

impl StoreBackend {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Sqlite => "sqlite",
            Self::Filesystem => "filesystem",
        }
    }
}

impl fmt::Display for StoreBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "memory" | "mem" => Ok(Self::Memory),
            "sqlite" | "sql" | "db" => Ok(Self::Sqlite),
            "filesystem" | "fs" | "disk" => Ok(Self::Filesystem),
            other => Err(format!(
                "unknown store backend '{other}' (expected memory, sqlite or filesystem)"
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StoreSettings {
    pub backend: StoreBackend,
    pub sqlite_path: PathBuf,
    pub styles_dir: PathBuf,
}

/// Both stores behind one backend choice, built once at startup.
#[derive(Clone)]
pub struct Stores {
    pub references: Arc<dyn ReferenceStore>,
    pub modes: Arc<dyn SessionModeTracker>,
}

impl Stores {
    pub fn in_memory() -> Self {
        Self {
            references: Arc::new(MemoryReferenceStore::new()),
            modes: Arc::new(MemorySessionModes::new()),
        }
    }

    /// `resolver` materializes non-local images for the filesystem backend.
    pub fn open(
        settings: &StoreSettings,
        resolver: Arc<dyn ImageResolver>,
    ) -> Result<Self, StoreError> {
        match settings.backend {
            StoreBackend::Memory => Ok(Self::in_memory()),
            StoreBackend::Sqlite => {
                let references = SqliteReferenceStore::open(&settings.sqlite_path)?;
                let modes = SqliteSessionModes::new(references.connection());
                Ok(Self {
                    references: Arc::new(references),
                    modes: Arc::new(modes),
                })
            }
            StoreBackend::Filesystem => {
                let references = FsReferenceStore::open(&settings.styles_dir, resolver)?;
                let modes = FileSessionModes::new(settings.styles_dir.join(SESSION_MODES_FILE));
                Ok(Self {
                    references: Arc::new(references),
                    modes: Arc::new(modes),
                })
            }
        }
    }
}
