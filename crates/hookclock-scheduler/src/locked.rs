//! Locked-event tracker: ids this instance has claimed but not yet settled.
//!
//! Anything still tracked at shutdown is handed back to the store with
//! `unlock`, so another instance can pick it up.

use std::collections::HashSet;
use std::sync::Mutex;

use crate::events::EventKind;

#[derive(Debug, Default)]
pub struct LockedEvents {
    cron: Mutex<HashSet<String>>,
    one_off: Mutex<HashSet<String>>,
}

impl LockedEvents {
    pub fn new() -> Self {
        Self::default()
    }

    fn set(&self, kind: EventKind) -> std::sync::MutexGuard<'_, HashSet<String>> {
        let set = match kind {
            EventKind::Cron => &self.cron,
            EventKind::OneOff => &self.one_off,
        };
        // A panic mid-insert cannot leave a HashSet half-written.
        set.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn add_all<I>(&self, kind: EventKind, ids: I)
    where
        I: IntoIterator<Item = String>,
    {
        self.set(kind).extend(ids);
    }

    /// Returns whether the id was tracked.
    pub fn remove(&self, kind: EventKind, id: &str) -> bool {
        self.set(kind).remove(id)
    }

    pub fn contains(&self, kind: EventKind, id: &str) -> bool {
        self.set(kind).contains(id)
    }

    pub fn len(&self, kind: EventKind) -> usize {
        self.set(kind).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len(EventKind::Cron) == 0 && self.len(EventKind::OneOff) == 0
    }

    /// Take every tracked id of the kind, leaving the set empty.
    pub fn drain(&self, kind: EventKind) -> Vec<String> {
        self.set(kind).drain().collect()
    }
}
