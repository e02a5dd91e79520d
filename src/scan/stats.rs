//! Queue statistics
//!
//! Counters plus a rolling window of job durations behind one mutex, so a snapshot
//! is always internally consistent (pending never goes negative mid-read).

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct QueueStats {
    inner: Arc<Mutex<StatsInner>>,
}

#[derive(Debug)]
struct StatsInner {
    submitted: u64,
    completed: u64,
    failed: u64,
    window: usize,
    durations_ms: VecDeque<u64>,
}

impl QueueStats {
    pub fn new(window: usize) -> Self {
        let window = window.max(1);
        Self {
            inner: Arc::new(Mutex::new(StatsInner {
                submitted: 0,
                completed: 0,
                failed: 0,
                window,
                durations_ms: VecDeque::with_capacity(window),
            })),
        }
    }

    pub fn job_submitted(&self) {
        self.inner.lock().unwrap().submitted += 1;
    }

    /// Undoes `job_submitted` for a job the worker never received.
    pub fn job_rejected(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.submitted = inner.submitted.saturating_sub(1);
    }

    pub fn job_finished(&self, duration: Duration, success: bool) {
        let mut inner = self.inner.lock().unwrap();
        if success {
            inner.completed += 1;
        } else {
            inner.failed += 1;
        }

        if inner.durations_ms.len() >= inner.window {
            inner.durations_ms.pop_front();
        }
        inner.durations_ms.push_back(duration.as_millis() as u64);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let inner = self.inner.lock().unwrap();
        let average_duration_ms = if inner.durations_ms.is_empty() {
            0
        } else {
            inner.durations_ms.iter().sum::<u64>() / inner.durations_ms.len() as u64
        };

        StatsSnapshot {
            submitted: inner.submitted,
            completed: inner.completed,
            failed: inner.failed,
            pending: inner.submitted - inner.completed - inner.failed,
            average_duration_ms,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    pub pending: u64,
    pub average_duration_ms: u64,
}
