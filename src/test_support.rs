//! Scanner fakes shared by the unit tests.

use crate::{
    finding::{Finding, Location, Severity},
    result::{DefectResult, ScanMetadata},
    scanner::{ScanTarget, Scanner},
};
use anyhow::{anyhow, Result};
use std::{
    sync::{Condvar, Mutex},
    time::Duration,
};

/// Three findings across two categories, one of them low-value.
pub fn sample_result(provider: &str) -> DefectResult {
    DefectResult::new(
        vec![
            Finding::new(
                provider,
                "NullDereference",
                Severity::High,
                Location::new("/work/app/src/A.java", 12),
                "possible null dereference",
            ),
            Finding::new(
                provider,
                "NullDereference",
                Severity::Medium,
                Location::new("/work/app/src/B.java", 4),
                "possible null dereference",
            ),
            Finding::new(
                provider,
                "UnusedImport",
                Severity::Low,
                Location::new("/work/app/src/A.java", 1),
                "unused import",
            )
            .low_value(),
        ],
        ScanMetadata::new(provider, "sample"),
    )
}

#[derive(Default)]
struct GateState {
    open: bool,
    calls: usize,
    fail: bool,
}

/// Scanner that parks every scan until `release` is called, so tests can hold a
/// scan in flight deterministically.
pub struct GatedScanner {
    id: String,
    state: Mutex<GateState>,
    changed: Condvar,
}

impl GatedScanner {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            state: Mutex::new(GateState::default()),
            changed: Condvar::new(),
        }
    }

    pub fn failing(id: &str) -> Self {
        let scanner = Self::new(id);
        scanner.state.lock().unwrap().fail = true;
        scanner
    }

    pub fn set_failing(&self, fail: bool) {
        self.state.lock().unwrap().fail = fail;
    }

    pub fn release(&self) {
        self.state.lock().unwrap().open = true;
        self.changed.notify_all();
    }

    pub fn calls(&self) -> usize {
        self.state.lock().unwrap().calls
    }

    /// Waits until at least `count` scans have entered the scanner.
    pub fn wait_for_calls(&self, count: usize) {
        let state = self.state.lock().unwrap();
        let (state, timeout) = self
            .changed
            .wait_timeout_while(state, Duration::from_secs(10), |s| s.calls < count)
            .unwrap();
        assert!(
            !timeout.timed_out(),
            "expected {} scans, saw {}",
            count,
            state.calls
        );
    }
}

impl Scanner for GatedScanner {
    fn id(&self) -> &str {
        &self.id
    }

    fn scan(&self, _target: &ScanTarget) -> Result<DefectResult> {
        let mut state = self.state.lock().unwrap();
        state.calls += 1;
        self.changed.notify_all();

        while !state.open {
            state = self.changed.wait(state).unwrap();
        }

        if state.fail {
            Err(anyhow!("analysis engine crashed"))
        } else {
            Ok(sample_result(&self.id))
        }
    }
}
