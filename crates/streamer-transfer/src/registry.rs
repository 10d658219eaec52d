use std::collections::HashMap;

use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry as MapEntry;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::ConfigError;
use crate::types::{Direction, TransferId, TransferRecord, TransferStatus};

struct Entry {
    record: TransferRecord,
    token: CancellationToken,
}

/// Concurrent map of transfer id to its record and cancellation handle.
///
/// Each entry is locked on its own shard, so unrelated transfers never
/// contend. Methods return clones and never hand out guards, so callers
/// cannot hold a lock across an await or while emitting events.
///
/// Terminal records stay in the map until [`TransferRegistry::clear_terminal`]
/// or [`TransferRegistry::remove`] drops them, so a failed transfer still
/// reports `error` when queried afterwards.
#[derive(Default)]
pub struct TransferRegistry {
    entries: DashMap<TransferId, Entry>,
}

impl TransferRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a queued transfer. Fails if the id already has an entry, terminal
    /// or not.
    pub fn register(
        &self,
        id: TransferId,
        direction: Direction,
        token: CancellationToken,
    ) -> Result<(), ConfigError> {
        match self.entries.entry(id) {
            MapEntry::Occupied(occupied) => Err(ConfigError::DuplicateId(occupied.key().clone())),
            MapEntry::Vacant(vacant) => {
                let record = TransferRecord::new(vacant.key().clone(), direction);
                vacant.insert(Entry { record, token });
                Ok(())
            }
        }
    }

    pub fn get(&self, id: &TransferId) -> Option<TransferRecord> {
        self.entries.get(id).map(|e| e.record.clone())
    }

    pub fn status(&self, id: &TransferId) -> Option<TransferStatus> {
        self.entries.get(id).map(|e| e.record.status)
    }

    /// Signal cancellation. Returns true only for the call that actually
    /// signalled a queued or active transfer.
    pub fn cancel(&self, id: &TransferId) -> bool {
        let Some(entry) = self.entries.get_mut(id) else {
            return false;
        };
        if entry.record.status.is_terminal() || entry.token.is_cancelled() {
            return false;
        }
        entry.token.cancel();
        drop(entry);
        info!(transfer_id = %id, "cancellation requested");
        true
    }

    /// Non-terminal transfers in one direction.
    pub fn list_active(&self, direction: Direction) -> HashMap<TransferId, TransferStatus> {
        self.entries
            .iter()
            .filter(|e| e.record.direction == direction && !e.record.status.is_terminal())
            .map(|e| (e.key().clone(), e.record.status))
            .collect()
    }

    /// Snapshot of every record, terminal ones included.
    pub fn records(&self) -> Vec<TransferRecord> {
        self.entries.iter().map(|e| e.record.clone()).collect()
    }

    /// Drop an entry. A transfer that is still running is cancelled first.
    pub fn remove(&self, id: &TransferId) -> Option<TransferRecord> {
        let (_, entry) = self.entries.remove(id)?;
        if !entry.record.status.is_terminal() {
            entry.token.cancel();
        }
        debug!(transfer_id = %id, status = %entry.record.status, "removed from registry");
        Some(entry.record)
    }

    /// Drop an entry only if it has reached a terminal state.
    pub fn clear_terminal(&self, id: &TransferId) -> bool {
        self.entries
            .remove_if(id, |_, e| e.record.status.is_terminal())
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    // ── Owner-side updates, used by the running task ──────────────────────

    pub(crate) fn activate(&self, id: &TransferId, total_bytes: u64) {
        if let Some(mut e) = self.entries.get_mut(id) {
            if e.record.status == TransferStatus::Queued {
                e.record.status = TransferStatus::Active;
            }
            e.record.total_bytes = total_bytes;
        }
    }

    pub(crate) fn set_total(&self, id: &TransferId, total_bytes: u64) {
        if let Some(mut e) = self.entries.get_mut(id) {
            e.record.total_bytes = total_bytes;
        }
    }

    pub(crate) fn update_progress(&self, id: &TransferId, bytes: u64) {
        if let Some(mut e) = self.entries.get_mut(id) {
            e.record.bytes_transferred = bytes;
        }
    }

    /// Move a transfer into a terminal state. Terminal states are final, so a
    /// second call is ignored.
    pub(crate) fn finish(
        &self,
        id: &TransferId,
        status: TransferStatus,
        bytes: u64,
        error: Option<String>,
    ) {
        debug_assert!(status.is_terminal());
        if let Some(mut e) = self.entries.get_mut(id) {
            if e.record.status.is_terminal() {
                return;
            }
            e.record.status = status;
            e.record.bytes_transferred = bytes;
            e.record.finished_at = Some(Utc::now());
            e.record.error = error;
        }
    }
}
