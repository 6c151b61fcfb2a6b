//! Bounded sample retention
//!
//! Keeps the most recent values of one field, pruned by age and by count.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Ring of timestamped values bounded by age and count
#[derive(Debug, Clone)]
pub struct RetentionBuffer<T> {
    samples: VecDeque<(Instant, T)>,
    max_age: Duration,
    max_samples: usize,
}

impl<T: Clone> RetentionBuffer<T> {
    /// Create an empty buffer
    pub fn new(max_age: Duration, max_samples: u32) -> Self {
        let max_samples = max_samples.max(1) as usize;
        Self {
            samples: VecDeque::with_capacity(max_samples.min(64)),
            max_age,
            max_samples,
        }
    }

    /// Append a value observed at `at`
    pub fn push(&mut self, at: Instant, value: T) {
        self.samples.push_back((at, value));
        while self.samples.len() > self.max_samples {
            self.samples.pop_front();
        }
        self.prune(at);
    }

    /// Drop values older than the age bound
    pub fn prune(&mut self, now: Instant) {
        while let Some((at, _)) = self.samples.front() {
            if now.saturating_duration_since(*at) > self.max_age {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    /// Most recent value and when it was observed
    pub fn latest(&self) -> Option<(Instant, T)> {
        self.samples.back().cloned()
    }

    /// Most recent value that is still within the age bound at `now`
    pub fn latest_fresh(&mut self, now: Instant) -> Option<T> {
        self.prune(now);
        self.samples.back().map(|(_, value)| value.clone())
    }

    /// Number of retained values
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Check whether nothing is retained
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}
