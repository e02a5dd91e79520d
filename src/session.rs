//! Analysis sessions
//!
//! One session exists per (project, provider) pair and tracks the latest defect result
//! for it. The session is a two-state machine, idle or scanning, and the `running`
//! flag lives under the same mutex as the condition variable that blocked callers
//! wait on. Accepting a scan and flipping the flag happen in one critical section,
//! which is what guarantees a single in-flight job no matter how many callers race.
//!
//! Blocked callers do not wait for `running` to drop. They remember how many scans had
//! completed when they joined and wait for that number to move, so spurious wake-ups
//! are harmless and a caller can never be held over into the next scan.
//!
//! The result is an `Arc` swapped wholesale on success. A failed scan keeps the
//! previous result so consumers never see a false "no defects" state.

use crate::{
    config::SessionConfig,
    observer::{Notification, NotificationDispatcher, ObserverId, ObserverList, ResultObserver},
    project::{Project, ProjectKey},
    result::DefectResult,
    scan::{JobId, JobOutcome, ScanError, ScanJob, ScanJobQueue, ScanResult},
    scanner::{ScanTarget, Scanner},
};
use std::{
    collections::BTreeMap,
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Condvar, Mutex, RwLock, Weak,
    },
    time::{Duration, Instant},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionKey {
    project: ProjectKey,
    provider: String,
}

impl SessionKey {
    pub fn new(project: ProjectKey, provider: impl Into<String>) -> Self {
        Self {
            project,
            provider: provider.into(),
        }
    }

    pub fn project(&self) -> &ProjectKey {
        &self.project
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.provider, self.project)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComputeOutcome {
    Started(JobId),
    /// A scan was already in flight; nothing was submitted.
    AlreadyRunning,
}

#[derive(Debug, Default)]
struct ScanState {
    running: bool,
    current_job: Option<JobId>,
    completed_scans: u64,
    waiting: usize,
    released: bool,
    /// Keyed by the `completed_scans` value callers joined at. Holds what the next
    /// completion left behind until every one of those callers has picked it up.
    handoffs: BTreeMap<u64, Handoff>,
}

#[derive(Debug, Default)]
struct Handoff {
    waiters: usize,
    completed: bool,
    result: Option<Arc<DefectResult>>,
}

pub struct Session {
    key: SessionKey,
    project: Project,
    scanner: Arc<dyn Scanner>,
    queue: Arc<ScanJobQueue>,
    dispatcher: NotificationDispatcher,
    state: Mutex<ScanState>,
    scan_done: Condvar,
    result: RwLock<Option<Arc<DefectResult>>>,
    background_scanning: AtomicBool,
    observers: ObserverList,
    poll_interval: Duration,
    self_ref: Weak<Session>,
}

impl Session {
    pub(crate) fn new(
        project: Project,
        scanner: Arc<dyn Scanner>,
        queue: Arc<ScanJobQueue>,
        dispatcher: NotificationDispatcher,
        config: &SessionConfig,
    ) -> Arc<Self> {
        let key = SessionKey::new(project.key(), scanner.id());
        debug!("Creating session {}", key);

        Arc::new_cyclic(|self_ref| Self {
            key,
            project,
            scanner,
            queue,
            dispatcher,
            state: Mutex::new(ScanState::default()),
            scan_done: Condvar::new(),
            result: RwLock::new(None),
            background_scanning: AtomicBool::new(config.background_scanning_default),
            observers: ObserverList::new(),
            poll_interval: config.wait_poll_interval(),
            self_ref: self_ref.clone(),
        })
    }

    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    pub fn project(&self) -> &Project {
        &self.project
    }

    pub fn display_name(&self) -> String {
        format!("{} ({})", self.project.name(), self.scanner.display_name())
    }

    /// Starts a project scan unless one is already in flight. Never blocks on the scan.
    pub fn compute_result(&self) -> ScanResult<ComputeOutcome> {
        let mut state = self.state.lock().unwrap();
        self.start_scan_locked(&mut state)
    }

    /// Joins the in-flight scan, or starts one, and returns the result it produced.
    /// Every caller released by the same completion sees the same `Arc`. A failed scan
    /// yields the previous result, `None` if there never was one.
    pub fn compute_result_and_wait(&self) -> ScanResult<Option<Arc<DefectResult>>> {
        self.wait_for_scan(None, None)
    }

    /// Gives up waiting after `timeout`. The scan itself keeps running and its result
    /// is stored for later callers.
    pub fn compute_result_and_wait_timeout(
        &self,
        timeout: Duration,
    ) -> ScanResult<Option<Arc<DefectResult>>> {
        self.wait_for_scan(Some(Instant::now() + timeout), None)
    }

    /// Returns early with the current result once `cancel` fires. Cancelling only ends
    /// this wait, never the scan.
    pub fn compute_result_and_wait_cancellable(
        &self,
        cancel: &CancellationToken,
    ) -> ScanResult<Option<Arc<DefectResult>>> {
        self.wait_for_scan(None, Some(cancel))
    }

    pub async fn compute_result_and_wait_async(
        self: Arc<Self>,
    ) -> ScanResult<Option<Arc<DefectResult>>> {
        let session = Arc::clone(&self);
        match tokio::task::spawn_blocking(move || session.compute_result_and_wait()).await {
            Ok(result) => result,
            Err(e) => {
                error!("Waiting for {} failed: {}", self.key, e);
                Ok(self.result())
            }
        }
    }

    /// Current result, if any scan has succeeded yet. Never triggers a scan.
    pub fn result(&self) -> Option<Arc<DefectResult>> {
        self.result.read().unwrap().clone()
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().unwrap().running
    }

    pub fn waiting_callers(&self) -> usize {
        self.state.lock().unwrap().waiting
    }

    pub fn is_released(&self) -> bool {
        self.state.lock().unwrap().released
    }

    pub fn is_background_scanning_enabled(&self) -> bool {
        self.background_scanning.load(Ordering::SeqCst)
    }

    /// Pure toggle. Whether enabling should schedule a scan is up to the host.
    pub fn set_background_scanning_enabled(&self, enabled: bool) {
        let previous = self.background_scanning.swap(enabled, Ordering::SeqCst);
        if previous == enabled {
            return;
        }

        info!("Background scanning for {} set to {}", self.key, enabled);
        self.dispatcher.dispatch(
            &self.observers,
            Notification::BackgroundScanningChanged {
                session: self.key.clone(),
                enabled,
            },
        );
    }

    pub fn add_observer(&self, observer: Arc<dyn ResultObserver>) -> ObserverId {
        let id = self.observers.add(observer);
        debug!("Observer {} registered on {}", id, self.key);
        id
    }

    pub fn remove_observer(&self, id: ObserverId) -> bool {
        let removed = self.observers.remove(id);
        if removed {
            debug!("Observer {} removed from {}", id, self.key);
        }
        removed
    }

    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    /// Completion hook, called by the scan worker exactly once per project job.
    pub(crate) fn scanning_done(&self, outcome: &JobOutcome) {
        let mut state = self.state.lock().unwrap();
        if state.released {
            debug!(
                "Ignoring completion of job {} for released session {}",
                outcome.job_id, self.key
            );
            return;
        }

        let change = match &outcome.result {
            Some(new) => {
                let old = self.result.write().unwrap().replace(Arc::clone(new));
                info!(
                    "Scan for {} finished in {:?} with {} findings",
                    self.key,
                    outcome.duration,
                    new.count(false)
                );
                Some((old, Arc::clone(new)))
            }
            None => {
                warn!(
                    "Scan for {} failed after {:?}, keeping previous result",
                    self.key, outcome.duration
                );
                None
            }
        };

        let generation = state.completed_scans;
        if let Some(handoff) = state.handoffs.get_mut(&generation) {
            handoff.completed = true;
            handoff.result = self.result.read().unwrap().clone();
        }

        state.running = false;
        state.current_job = None;
        state.completed_scans += 1;

        // Observers are snapshotted before any waiter can run, so one registered by a
        // released waiter does not also receive this change.
        if let Some((old, new)) = change {
            self.dispatcher.dispatch(
                &self.observers,
                Notification::ResultChanged {
                    session: self.key.clone(),
                    old,
                    new,
                },
            );
        }

        drop(state);
        self.scan_done.notify_all();
    }

    /// Detaches observers and wakes any blocked callers. Idempotent.
    pub(crate) fn release(&self) {
        let mut state = self.state.lock().unwrap();
        if state.released {
            return;
        }
        state.released = true;
        drop(state);
        self.scan_done.notify_all();

        let detached = self.observers.clear();
        info!("Released session {} ({} observers detached)", self.key, detached);
    }

    fn start_scan_locked(&self, state: &mut ScanState) -> ScanResult<ComputeOutcome> {
        if state.released {
            return Err(ScanError::SessionReleased {
                session: self.key.to_string(),
            });
        }

        if state.running {
            debug!(
                "Scan for {} already running (job {:?}), skipping",
                self.key, state.current_job
            );
            return Ok(ComputeOutcome::AlreadyRunning);
        }

        let job = ScanJob::project(
            Arc::clone(&self.scanner),
            ScanTarget::Project(self.project.clone()),
            self.self_ref.clone(),
        );
        let job_id = self.queue.post(job)?;

        state.running = true;
        state.current_job = Some(job_id);
        info!("Started scan {} for {}", job_id, self.key);

        Ok(ComputeOutcome::Started(job_id))
    }

    fn wait_for_scan(
        &self,
        deadline: Option<Instant>,
        cancel: Option<&CancellationToken>,
    ) -> ScanResult<Option<Arc<DefectResult>>> {
        let mut state = self.state.lock().unwrap();
        self.start_scan_locked(&mut state)?;

        let joined_at = state.completed_scans;
        state.waiting += 1;
        state.handoffs.entry(joined_at).or_default().waiters += 1;

        while state.completed_scans == joined_at && !state.released {
            if cancel.is_some_and(|token| token.is_cancelled()) {
                debug!("Wait for {} cancelled", self.key);
                break;
            }

            if deadline.is_none() && cancel.is_none() {
                state = self.scan_done.wait(state).unwrap();
                continue;
            }

            let mut timeout = self.poll_interval;
            if let Some(deadline) = deadline {
                let now = Instant::now();
                if now >= deadline {
                    debug!("Wait for {} timed out", self.key);
                    break;
                }
                timeout = timeout.min(deadline - now);
            }
            state = self.scan_done.wait_timeout(state, timeout).unwrap().0;
        }

        state.waiting -= 1;
        let handed_over = match state.handoffs.get_mut(&joined_at) {
            Some(handoff) => {
                handoff.waiters -= 1;
                let result = handoff.completed.then(|| handoff.result.clone());
                if handoff.waiters == 0 {
                    state.handoffs.remove(&joined_at);
                }
                result
            }
            None => None,
        };
        drop(state);

        // Timed out, cancelled or released callers get whatever is current.
        Ok(handed_over.unwrap_or_else(|| self.result()))
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("key", &self.key)
            .field("queue", &self.queue.name())
            .field("observers", &self.observers.len())
            .finish()
    }
}
