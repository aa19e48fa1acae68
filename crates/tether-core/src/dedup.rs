use std::collections::HashSet;
use std::collections::VecDeque;

use super::event::BackendEvent;

pub const DEFAULT_DEDUP_THRESHOLD: usize = 1_000;
pub const DEFAULT_DEDUP_RETAIN: usize = 500;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EventIdentity {
    pub id: String,
    pub kind: String,
    pub session_id: Option<String>,
}

impl EventIdentity {
    pub fn of(event: &BackendEvent) -> Self {
        Self {
            id: event.id.clone(),
            kind: event.kind().to_string(),
            session_id: event.session_id.clone(),
        }
    }
}

/// Recently-seen event identities, bounded by insertion order.
///
/// Once the set grows past `threshold`, only the `retain` most recently
/// inserted identities are kept.
#[derive(Debug, Clone)]
pub struct Deduplicator {
    threshold: usize,
    retain: usize,
    seen: HashSet<EventIdentity>,
    order: VecDeque<EventIdentity>,
}

impl Default for Deduplicator {
    fn default() -> Self {
        Self::new(DEFAULT_DEDUP_THRESHOLD, DEFAULT_DEDUP_RETAIN)
    }
}

impl Deduplicator {
    pub fn new(threshold: usize, retain: usize) -> Self {
        let threshold = threshold.max(1);
        Self {
            threshold,
            retain: retain.min(threshold),
            seen: HashSet::new(),
            order: VecDeque::new(),
        }
    }

    pub fn should_process(&mut self, event: &BackendEvent) -> bool {
        self.insert(EventIdentity::of(event))
    }

    pub fn insert(&mut self, identity: EventIdentity) -> bool {
        if self.seen.contains(&identity) {
            return false;
        }
        self.seen.insert(identity.clone());
        self.order.push_back(identity);

        if self.order.len() > self.threshold {
            while self.order.len() > self.retain {
                if let Some(evicted) = self.order.pop_front() {
                    self.seen.remove(&evicted);
                }
            }
        }
        true
    }

    pub fn contains(&self, identity: &EventIdentity) -> bool {
        self.seen.contains(identity)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn clear(&mut self) {
        self.seen.clear();
        self.order.clear();
    }
}
