//! Note storage behind an async trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

/// A stored note.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    pub id: u64,
    pub text: String,
    pub date: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("note store unavailable: {0}")]
    Unavailable(String),
}

/// Persistence used by the note handlers.
#[async_trait]
pub trait NoteStore: Send + Sync {
    async fn create(&self, text: String, date: DateTime<Utc>) -> Result<Note, StoreError>;

    async fn get(&self, id: u64) -> Result<Option<Note>, StoreError>;

    async fn find_by_text(&self, text: &str) -> Result<Option<Note>, StoreError>;

    /// Replace an existing note. Returns `false` if it does not exist.
    async fn update(&self, note: Note) -> Result<bool, StoreError>;

    /// Returns `false` if the note does not exist.
    async fn delete(&self, id: u64) -> Result<bool, StoreError>;

    /// One page of notes in id order; `page` starts at 1.
    async fn page(&self, limit: usize, page: usize) -> Result<Vec<Note>, StoreError>;
}

/// In-process store, lost on restart.
#[derive(Debug, Default)]
pub struct MemoryNoteStore {
    notes: RwLock<BTreeMap<u64, Note>>,
    last_id: AtomicU64,
}

impl MemoryNoteStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NoteStore for MemoryNoteStore {
    async fn create(&self, text: String, date: DateTime<Utc>) -> Result<Note, StoreError> {
        let id = self.last_id.fetch_add(1, Ordering::Relaxed) + 1;
        let note = Note { id, text, date };
        self.notes.write().insert(id, note.clone());
        Ok(note)
    }

    async fn get(&self, id: u64) -> Result<Option<Note>, StoreError> {
        Ok(self.notes.read().get(&id).cloned())
    }

    async fn find_by_text(&self, text: &str) -> Result<Option<Note>, StoreError> {
        Ok(self.notes.read().values().find(|n| n.text == text).cloned())
    }

    async fn update(&self, note: Note) -> Result<bool, StoreError> {
        let mut notes = self.notes.write();
        match notes.get_mut(&note.id) {
            Some(existing) => {
                *existing = note;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, id: u64) -> Result<bool, StoreError> {
        Ok(self.notes.write().remove(&id).is_some())
    }

    async fn page(&self, limit: usize, page: usize) -> Result<Vec<Note>, StoreError> {
        let skip = page.saturating_sub(1).saturating_mul(limit);
        Ok(self
            .notes
            .read()
            .values()
            .skip(skip)
            .take(limit)
            .cloned()
            .collect())
    }
}
