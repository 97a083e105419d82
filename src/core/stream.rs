//! Per-call digit collection cursor

use std::time::{Duration, Instant};

use uuid::Uuid;

/// Index of the root node in every registry trie.
pub(crate) const ROOT: usize = 0;

/// Cursor over a [`PatternRegistry`](super::PatternRegistry) trie.
///
/// A stream belongs to exactly one collection on one call. It is cheap to
/// create and holds no reference into the registry, only the index of the
/// node it is parked on, so many streams can walk the same registry while
/// bindings are added or removed.
#[derive(Debug, Clone)]
pub struct DigitStream {
    registry_id: Uuid,
    node: usize,
    buffer: String,
    last_activity: Instant,
}

impl DigitStream {
    pub(crate) fn new(registry_id: Uuid) -> Self {
        Self {
            registry_id,
            node: ROOT,
            buffer: String::new(),
            last_activity: Instant::now(),
        }
    }

    /// Returns the cursor to the root and clears collected digits.
    pub fn reset(&mut self) {
        self.node = ROOT;
        self.buffer.clear();
    }

    /// Digits collected since the stream last left the root.
    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    pub fn is_at_root(&self) -> bool {
        self.node == ROOT
    }

    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    pub fn idle_for(&self) -> Duration {
        self.last_activity.elapsed()
    }

    /// True once `timeout` has passed since the last fed digit.
    pub fn is_expired(&self, timeout: Duration) -> bool {
        self.idle_for() >= timeout
    }

    pub(crate) fn registry_id(&self) -> Uuid {
        self.registry_id
    }

    pub(crate) fn node(&self) -> usize {
        self.node
    }

    pub(crate) fn attach(&mut self, registry_id: Uuid) {
        self.registry_id = registry_id;
        self.reset();
    }

    pub(crate) fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    pub(crate) fn advance(&mut self, node: usize, digit: char) {
        self.node = node;
        self.buffer.push(digit);
    }

    /// Takes the collected digits and parks the cursor at the root.
    pub(crate) fn finish(&mut self) -> String {
        self.node = ROOT;
        std::mem::take(&mut self.buffer)
    }
}
