use std::collections::{HashSet, VecDeque};

use biblink_core::KeyField;

pub const DEFAULT_CAPACITY: usize = 2000;

/// Bounded, insertion-ordered set of keys that previously produced too many
/// candidates. The oldest entry is evicted first.
#[derive(Debug, Clone)]
pub struct ThrottleCache {
    capacity: usize,
    order: VecDeque<String>,
    flagged: HashSet<String>,
}

impl Default for ThrottleCache {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl ThrottleCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            order: VecDeque::new(),
            flagged: HashSet::new(),
        }
    }

    fn entry(field: KeyField, value: &str) -> String {
        format!("{field}={value}")
    }

    pub fn is_flagged(&self, field: KeyField, value: &str) -> bool {
        self.flagged.contains(&Self::entry(field, value))
    }

    pub fn flag(&mut self, field: KeyField, value: &str) {
        let entry = Self::entry(field, value);
        if self.flagged.contains(&entry) {
            return;
        }
        if self.order.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.flagged.remove(&oldest);
            }
        }
        self.flagged.insert(entry.clone());
        self.order.push_back(entry);
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
