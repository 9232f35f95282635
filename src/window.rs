//! Time-bounded record of recently relayed content.

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};

use crate::fingerprint::Fingerprint;

/// Default suppression interval for repeated content.
pub const DEFAULT_WINDOW: TimeDelta = TimeDelta::hours(24);

/// Maps fingerprints to the time they were last relayed.
///
/// An entry older than the window is logically expired: it never blocks a
/// relay, and it is evicted the next time it is looked up or pruned.
#[derive(Clone)]
pub struct DedupWindow {
    entries: Arc<papaya::HashMap<Fingerprint, DateTime<Utc>>>,
    window: TimeDelta,
}

impl Default for DedupWindow {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

impl DedupWindow {
    pub fn new(window: TimeDelta) -> Self {
        Self {
            entries: Arc::new(papaya::HashMap::new()),
            window,
        }
    }

    pub fn window(&self) -> TimeDelta {
        self.window
    }

    fn is_live(&self, recorded: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        now - recorded < self.window
    }

    /// Returns true if `fingerprint` was relayed within the window ending at `now`.
    pub fn is_duplicate(&self, fingerprint: &Fingerprint, now: DateTime<Utc>) -> bool {
        let entries = self.entries.pin();
        match entries.get(fingerprint).copied() {
            Some(recorded) if self.is_live(recorded, now) => true,
            Some(_) => {
                entries.remove(fingerprint);
                false
            }
            None => false,
        }
    }

    /// Records a relay of `fingerprint` at `now`, replacing any earlier entry.
    pub fn record(&self, fingerprint: Fingerprint, now: DateTime<Utc>) {
        self.entries.pin().insert(fingerprint, now);
    }

    /// Time `fingerprint` was last relayed, expired or not.
    pub fn last_relayed(&self, fingerprint: &Fingerprint) -> Option<DateTime<Utc>> {
        self.entries.pin().get(fingerprint).copied()
    }

    /// Removes every expired entry, returning how many were dropped.
    pub fn prune(&self, now: DateTime<Utc>) -> usize {
        let entries = self.entries.pin();
        let expired: Vec<Fingerprint> = entries
            .iter()
            .filter(|(_, recorded)| !self.is_live(**recorded, now))
            .map(|(fingerprint, _)| fingerprint.clone())
            .collect();

        for fingerprint in &expired {
            entries.remove(fingerprint);
        }

        expired.len()
    }

    pub fn len(&self) -> usize {
        self.entries.pin().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
