//! The durable FIFO queue behind the relay write pipeline (§4.2). Every
//! mutation is persisted immediately so a restart resumes from the same
//! position in the queue.

use std::collections::VecDeque;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::block::now_iso8601;
use crate::fsutil;
use crate::LedgerError;

/// A letter submission waiting to be committed (or replayed after a fork).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PendingEntry {
    pub id: String,
    pub letter_payload: String,
    pub owner_fingerprint: String,
    pub relay_metrics: Value,
    pub enqueued_at: String,
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replayed_from_block: Option<u64>,
}

impl PendingEntry {
    /// A letter submitted directly by a client.
    pub fn submitted(letter_payload: String, owner_fingerprint: String, relay_metrics: Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            letter_payload,
            owner_fingerprint,
            relay_metrics,
            enqueued_at: now_iso8601(),
            attempts: 0,
            replayed_from_block: None,
        }
    }

    /// A letter harvested from an orphaned block during fork resolution
    /// (§4.3): `payload` and `ownerFingerprint` are preserved byte-for-byte.
    pub fn replayed(
        owner_fingerprint: String,
        letter_payload: String,
        relay_metrics: Value,
        replayed_from_block: u64,
    ) -> Self {
        let mut entry = Self::submitted(letter_payload, owner_fingerprint, relay_metrics);
        entry.replayed_from_block = Some(replayed_from_block);
        entry
    }
}

/// Durable FIFO queue of [`PendingEntry`] values, persisted as a JSON array.
#[derive(Debug)]
pub struct PendingQueue {
    entries: VecDeque<PendingEntry>,
    path: PathBuf,
}

impl PendingQueue {
    pub fn load_or_init(path: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let path = path.into();
        let entries = fsutil::read_json_opt::<Vec<PendingEntry>>(&path)?
            .unwrap_or_default()
            .into();
        Ok(Self { entries, path })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn front(&self) -> Option<&PendingEntry> {
        self.entries.front()
    }

    /// First ten entries' metadata, for `GetQueueStatus`.
    pub fn preview(&self, limit: usize) -> Vec<&PendingEntry> {
        self.entries.iter().take(limit).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PendingEntry> {
        self.entries.iter()
    }

    pub fn push_back(&mut self, entry: PendingEntry) -> Result<(), LedgerError> {
        self.entries.push_back(entry);
        self.persist()
    }

    /// Bulk-append, used by fork resolution to replay an orphaned block's
    /// letters in one persisted step.
    pub fn extend(&mut self, entries: impl IntoIterator<Item = PendingEntry>) -> Result<(), LedgerError> {
        self.entries.extend(entries);
        self.persist()
    }

    pub fn pop_front(&mut self) -> Result<Option<PendingEntry>, LedgerError> {
        let popped = self.entries.pop_front();
        if popped.is_some() {
            self.persist()?;
        }
        Ok(popped)
    }

    pub fn increment_attempts_front(&mut self) -> Result<(), LedgerError> {
        if let Some(front) = self.entries.front_mut() {
            front.attempts += 1;
        }
        self.persist()
    }

    /// `ClearQueue`: drain every pending entry so callers can reject their
    /// waiters with a cancellation error.
    pub fn clear(&mut self) -> Result<Vec<PendingEntry>, LedgerError> {
        let drained: Vec<PendingEntry> = self.entries.drain(..).collect();
        self.persist()?;
        Ok(drained)
    }

    fn persist(&self) -> Result<(), LedgerError> {
        let as_vec: Vec<&PendingEntry> = self.entries.iter().collect();
        fsutil::write_json(&self.path, &as_vec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn entry(fp: &str) -> PendingEntry {
        PendingEntry::submitted("payload".into(), fp.into(), json!({}))
    }

    #[test]
    fn load_or_init_starts_empty_when_no_file() {
        let dir = tempdir().unwrap();
        let queue = PendingQueue::load_or_init(dir.path().join("pending.json")).unwrap();
        assert!(queue.is_empty());
    }

    #[test]
    fn push_back_persists_and_reloads() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pending.json");
        {
            let mut queue = PendingQueue::load_or_init(&path).unwrap();
            queue.push_back(entry("fp1")).unwrap();
        }
        let reloaded = PendingQueue::load_or_init(&path).unwrap();
        assert_eq!(reloaded.len(), 1);
        assert_eq!(reloaded.front().unwrap().owner_fingerprint, "fp1");
    }

    #[test]
    fn fifo_order_preserved() {
        let dir = tempdir().unwrap();
        let mut queue = PendingQueue::load_or_init(dir.path().join("pending.json")).unwrap();
        queue.push_back(entry("fp_a")).unwrap();
        queue.push_back(entry("fp_b")).unwrap();

        let first = queue.pop_front().unwrap().unwrap();
        assert_eq!(first.owner_fingerprint, "fp_a");
        let second = queue.pop_front().unwrap().unwrap();
        assert_eq!(second.owner_fingerprint, "fp_b");
    }

    #[test]
    fn increment_attempts_only_touches_front() {
        let dir = tempdir().unwrap();
        let mut queue = PendingQueue::load_or_init(dir.path().join("pending.json")).unwrap();
        queue.push_back(entry("fp_a")).unwrap();
        queue.push_back(entry("fp_b")).unwrap();

        queue.increment_attempts_front().unwrap();

        assert_eq!(queue.front().unwrap().attempts, 1);
        assert_eq!(queue.preview(10)[1].attempts, 0);
    }

    #[test]
    fn clear_drains_and_persists_empty_queue() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pending.json");
        let mut queue = PendingQueue::load_or_init(&path).unwrap();
        queue.push_back(entry("fp_a")).unwrap();
        queue.push_back(entry("fp_b")).unwrap();

        let drained = queue.clear().unwrap();

        assert_eq!(drained.len(), 2);
        assert!(queue.is_empty());
        let reloaded = PendingQueue::load_or_init(&path).unwrap();
        assert!(reloaded.is_empty());
    }

    #[test]
    fn replayed_entry_preserves_payload_and_fingerprint() {
        let entry = PendingEntry::replayed("fp_x".into(), "env_x".into(), json!({"relay": "r1"}), 3);
        assert_eq!(entry.owner_fingerprint, "fp_x");
        assert_eq!(entry.letter_payload, "env_x");
        assert_eq!(entry.replayed_from_block, Some(3));
    }
}
