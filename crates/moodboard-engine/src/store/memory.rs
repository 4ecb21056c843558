use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use moodboard_contracts::{ConversationId, ImageRef};

use super::{ReferenceStore, SessionModeTracker, StoreError};

const BACKEND: &str = "memory";

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, StoreError> {
    mutex
        .lock()
        .map_err(|_| StoreError::unavailable(BACKEND, "lock poisoned"))
}

/// Volatile references; lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryReferenceStore {
    entries: Mutex<HashMap<ConversationId, Vec<ImageRef>>>,
}

impl MemoryReferenceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ReferenceStore for MemoryReferenceStore {
    fn backend(&self) -> &'static str {
        BACKEND
    }

    fn list(&self, conversation: &ConversationId) -> Result<Vec<ImageRef>, StoreError> {
        Ok(lock(&self.entries)?
            .get(conversation)
            .cloned()
            .unwrap_or_default())
    }

    fn append(&self, conversation: &ConversationId, image: ImageRef) -> Result<(), StoreError> {
        lock(&self.entries)?
            .entry(conversation.clone())
            .or_default()
            .push(image);
        Ok(())
    }

    fn clear(&self, conversation: &ConversationId) -> Result<(), StoreError> {
        lock(&self.entries)?.remove(conversation);
        Ok(())
    }

    fn count(&self, conversation: &ConversationId) -> Result<usize, StoreError> {
        Ok(lock(&self.entries)?
            .get(conversation)
            .map(Vec::len)
            .unwrap_or(0))
    }
}

#[derive(Debug, Default)]
pub struct MemorySessionModes {
    modes: Mutex<HashMap<ConversationId, bool>>,
}

impl MemorySessionModes {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionModeTracker for MemorySessionModes {
    fn get(&self, conversation: &ConversationId) -> Result<bool, StoreError> {
        Ok(lock(&self.modes)?
            .get(conversation)
            .copied()
            .unwrap_or(false))
    }

    fn set(&self, conversation: &ConversationId, collecting: bool) -> Result<(), StoreError> {
        let mut modes = lock(&self.modes)?;
        if collecting {
            modes.insert(conversation.clone(), true);
        } else {
            modes.remove(conversation);
        }
        Ok(())
    }
}
