use crate::model::RegenerationKey;
use std::collections::HashSet;

/// Keys already scheduled during one regeneration run.
///
/// Lives in memory for the invocation that owns it. A restarted scan chain
/// starts with an empty set, so generation tasks must stay idempotent.
#[derive(Debug, Default)]
pub struct RunDeduplicator {
    seen: HashSet<RegenerationKey>,
}

impl RunDeduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` the first time a key is offered and records it.
    pub fn should_schedule(&mut self, key: &RegenerationKey) -> bool {
        if self.seen.contains(key) {
            return false;
        }
        self.seen.insert(key.clone())
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
