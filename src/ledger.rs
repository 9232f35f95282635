//! Tracking of relayed copies for deletion mirroring.
//!
//! The ledger maps an origin message to the copies it produced in each
//! destination. An entry exists exactly while the origin has live mirrored
//! copies. Entries are removed when the origin is deleted, or by
//! [`RelayLedger::sweep`] once they outlive the configured retention.

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};

use crate::message::{ChannelId, MessageId};

/// Default time an entry is kept for origins that are never deleted.
pub const DEFAULT_RETENTION: TimeDelta = TimeDelta::days(7);

/// The copies of one origin message in one destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayedCopy {
    pub destination: ChannelId,
    pub text: Option<MessageId>,
    pub attachment: Option<MessageId>,
}

#[derive(Debug, Clone)]
struct LedgerEntry {
    recorded_at: DateTime<Utc>,
    copies: Vec<RelayedCopy>,
}

#[derive(Clone, Default)]
pub struct RelayLedger {
    entries: Arc<papaya::HashMap<MessageId, LedgerEntry>>,
}

impl RelayLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_entry(&self, origin: MessageId) -> bool {
        self.entries.pin().contains_key(&origin)
    }

    /// Appends a destination copy under `origin`, creating the entry if needed.
    ///
    /// Callers must serialize writes for the same origin; the engine's single
    /// worker guarantees this.
    pub fn record(
        &self,
        origin: MessageId,
        destination: ChannelId,
        text: Option<MessageId>,
        attachment: Option<MessageId>,
        now: DateTime<Utc>,
    ) {
        let entries = self.entries.pin();
        let mut entry = entries.get(&origin).cloned().unwrap_or(LedgerEntry {
            recorded_at: now,
            copies: Vec::new(),
        });
        entry.copies.push(RelayedCopy {
            destination,
            text,
            attachment,
        });
        entries.insert(origin, entry);
    }

    /// Removes and returns every copy recorded for `origin`.
    ///
    /// Returns an empty list when the origin was never relayed or has already
    /// been taken.
    pub fn take(&self, origin: MessageId) -> Vec<RelayedCopy> {
        self.entries
            .pin()
            .remove(&origin)
            .map(|entry| entry.copies.clone())
            .unwrap_or_default()
    }

    /// Copies recorded for `origin`, in the order they were relayed.
    pub fn copies(&self, origin: MessageId) -> Vec<RelayedCopy> {
        self.entries
            .pin()
            .get(&origin)
            .map(|entry| entry.copies.clone())
            .unwrap_or_default()
    }

    /// Drops entries recorded more than `retention` before `now`.
    pub fn sweep(&self, now: DateTime<Utc>, retention: TimeDelta) -> usize {
        let entries = self.entries.pin();
        let stale: Vec<MessageId> = entries
            .iter()
            .filter(|(_, entry)| now - entry.recorded_at >= retention)
            .map(|(origin, _)| *origin)
            .collect();

        for origin in &stale {
            entries.remove(origin);
        }

        stale.len()
    }

    pub fn size(&self) -> usize {
        self.entries.pin().len()
    }
}
