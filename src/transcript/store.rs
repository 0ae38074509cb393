//! Session-scoped transcript storage.
//!
//! Transcripts are held in a plain in-memory map. A background task sweeps
//! entries that have not been touched within the session TTL; an explicit
//! delete drops one immediately. Nothing survives a restart.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{Transcript, TranscriptSegment};

#[derive(Debug, PartialEq)]
pub enum StoreError {
    /// The store already holds the maximum number of transcripts.
    Full(usize),
    NotFound,
    SegmentOutOfRange { index: usize, count: usize },
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Full(max) => {
                write!(f, "Transcript limit ({}) reached, delete one or retry later", max)
            }
            StoreError::NotFound => write!(f, "Transcript not found"),
            StoreError::SegmentOutOfRange { index, count } => {
                write!(f, "Segment index {} out of range (transcript has {} segments)", index, count)
            }
        }
    }
}

impl std::error::Error for StoreError {}

struct Entry {
    transcript: Transcript,
    last_accessed: DateTime<Utc>,
}

/// Thread-safe map of live transcripts.
pub struct TranscriptStore {
    entries: RwLock<HashMap<Uuid, Entry>>,
    max_stored: usize,
}

impl TranscriptStore {
    pub fn new(max_stored: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            max_stored,
        }
    }

    /// Store a transcript, enforcing the capacity cap.
    pub fn insert(&self, transcript: Transcript) -> Result<Uuid, StoreError> {
        let mut entries = self.entries.write().unwrap();
        if entries.len() >= self.max_stored {
            return Err(StoreError::Full(self.max_stored));
        }
        let id = transcript.id;
        entries.insert(
            id,
            Entry {
                transcript,
                last_accessed: Utc::now(),
            },
        );
        Ok(id)
    }

    /// Fetch a transcript copy, refreshing its idle timer.
    pub fn get(&self, id: &Uuid) -> Option<Transcript> {
        let mut entries = self.entries.write().unwrap();
        let entry = entries.get_mut(id)?;
        entry.last_accessed = Utc::now();
        Some(entry.transcript.clone())
    }

    /// Replace the text of one segment, returning the updated segment.
    pub fn update_segment(
        &self,
        id: &Uuid,
        index: usize,
        text: String,
    ) -> Result<TranscriptSegment, StoreError> {
        let mut entries = self.entries.write().unwrap();
        let entry = entries.get_mut(id).ok_or(StoreError::NotFound)?;
        entry.last_accessed = Utc::now();
        let count = entry.transcript.segment_count();
        entry
            .transcript
            .edit_segment(index, text)
            .cloned()
            .ok_or(StoreError::SegmentOutOfRange { index, count })
    }

    pub fn remove(&self, id: &Uuid) -> bool {
        let mut entries = self.entries.write().unwrap();
        entries.remove(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop transcripts idle for longer than `ttl_seconds`. Returns how many
    /// were removed. The TTL is passed in per sweep so config updates take
    /// effect without rebuilding the store.
    pub fn cleanup_expired(&self, ttl_seconds: u64) -> usize {
        let mut entries = self.entries.write().unwrap();
        let now = Utc::now();
        let before = entries.len();
        entries.retain(|_, entry| {
            now.signed_duration_since(entry.last_accessed).num_milliseconds()
                <= ttl_seconds as i64 * 1000
        });
        let removed = before - entries.len();
        if removed > 0 {
            tracing::info!("Expired {} idle transcript(s)", removed);
        }
        removed
    }

    #[cfg(test)]
    fn backdate(&self, id: &Uuid, ms: i64) {
        let mut entries = self.entries.write().unwrap();
        if let Some(entry) = entries.get_mut(id) {
            entry.last_accessed = entry.last_accessed - chrono::Duration::milliseconds(ms);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcription::language::Language;
    use crate::transcription::model::ModelSize;

    fn transcript(text: &str) -> Transcript {
        Transcript::new(
            "clip.mp3".to_string(),
            ModelSize::Tiny,
            Language::En,
            true,
            3.0,
            150,
            vec![TranscriptSegment {
                start_ms: 0,
                end_ms: 3000,
                text: text.to_string(),
            }],
        )
    }

    #[test]
    fn test_insert_and_get() {
        let store = TranscriptStore::new(4);
        let id = store.insert(transcript("hello")).unwrap();
        let fetched = store.get(&id).unwrap();
        assert_eq!(fetched.segments()[0].text, "hello");
        assert!(store.get(&Uuid::new_v4()).is_none());
    }

    #[test]
    fn test_capacity_cap() {
        let store = TranscriptStore::new(2);
        store.insert(transcript("a")).unwrap();
        store.insert(transcript("b")).unwrap();
        assert_eq!(store.insert(transcript("c")), Err(StoreError::Full(2)));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_update_segment() {
        let store = TranscriptStore::new(4);
        let id = store.insert(transcript("draft")).unwrap();

        let updated = store.update_segment(&id, 0, "final".to_string()).unwrap();
        assert_eq!(updated.text, "final");
        assert_eq!((updated.start_ms, updated.end_ms), (0, 3000));
        assert_eq!(store.get(&id).unwrap().segments()[0].text, "final");

        assert_eq!(
            store.update_segment(&id, 9, "x".to_string()),
            Err(StoreError::SegmentOutOfRange { index: 9, count: 1 })
        );
        assert_eq!(
            store.update_segment(&Uuid::new_v4(), 0, "x".to_string()),
            Err(StoreError::NotFound)
        );
    }

    #[test]
    fn test_remove() {
        let store = TranscriptStore::new(4);
        let id = store.insert(transcript("gone")).unwrap();
        assert!(store.remove(&id));
        assert!(!store.remove(&id));
        assert!(store.is_empty());
    }

    #[test]
    fn test_cleanup_expired() {
        let store = TranscriptStore::new(4);
        let keep = store.insert(transcript("fresh")).unwrap();
        let stale = store.insert(transcript("stale")).unwrap();
        store.backdate(&stale, 2 * 3600 * 1000);

        let removed = store.cleanup_expired(3600);
        assert_eq!(removed, 1);
        assert_eq!(store.len(), 1);
        assert!(store.get(&keep).is_some());
        assert!(store.get(&stale).is_none());
    }
}
