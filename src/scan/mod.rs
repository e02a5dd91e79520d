//! Scan job queue
//!
//! Analysis engines are CPU and memory heavy and frequently not reentrant, so every
//! job posted to a queue runs on that queue's single dedicated worker thread, strictly
//! in submission order. Callers choose independently whether to block: `post` returns
//! at once, `post_and_wait` parks the caller until that specific job has finished.
//!
//! A failing or panicking scanner never takes the worker down. The failure is logged,
//! recorded on the job outcome, and the next queued job runs as usual.

pub mod errors;
pub mod messages;
pub mod stats;

pub use errors::{ScanError, ScanResult};
pub use messages::{JobId, JobOutcome, QueueEvent, ScanJob, TargetInfo};
pub use stats::{QueueStats, StatsSnapshot};

use anyhow::anyhow;
use messages::QueueMessage;
use std::{
    any::Any,
    panic::{self, AssertUnwindSafe},
    sync::{mpsc, Arc, Mutex},
    thread,
    time::Instant,
};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

const EVENT_CAPACITY: usize = 100;
const DEFAULT_HISTORY: usize = 100;

pub struct ScanJobQueue {
    name: String,
    sender: Mutex<Option<mpsc::Sender<QueueMessage>>>,
    stats: QueueStats,
    events: broadcast::Sender<QueueEvent>,
}

struct Worker {
    name: String,
    stats: QueueStats,
    events: broadcast::Sender<QueueEvent>,
}

impl ScanJobQueue {
    pub fn new(name: impl Into<String>) -> ScanResult<Self> {
        Self::with_history(name, DEFAULT_HISTORY)
    }

    /// `history_window` bounds how many recent job durations feed the average.
    pub fn with_history(name: impl Into<String>, history_window: usize) -> ScanResult<Self> {
        let name = name.into();
        let (tx, rx) = mpsc::channel();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let stats = QueueStats::new(history_window);

        let worker = Worker {
            name: name.clone(),
            stats: stats.clone(),
            events: events.clone(),
        };

        thread::Builder::new()
            .name(name.clone())
            .spawn(move || worker.run(rx))
            .map_err(|source| ScanError::WorkerSpawn {
                queue: name.clone(),
                source,
            })?;

        debug!("Started scan worker {}", name);

        Ok(Self {
            name,
            sender: Mutex::new(Some(tx)),
            stats,
            events,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn post(&self, job: ScanJob) -> ScanResult<JobId> {
        let job_id = job.id();
        let sender = self.sender.lock().unwrap();
        let tx = sender.as_ref().ok_or_else(|| self.closed())?;

        let _ = self.events.send(QueueEvent::Queued {
            job_id,
            target: job.target().into(),
        });
        self.stats.job_submitted();

        debug!("Posting job {} for {} to {}", job_id, job.target(), self.name);
        if tx.send(QueueMessage::Run(job)).is_err() {
            self.stats.job_rejected();
            return Err(self.closed());
        }

        Ok(job_id)
    }

    /// Blocks until the job's completion path has run. Must not be called from a
    /// scanner running on this same queue, the worker would wait on itself.
    pub fn post_and_wait(&self, mut job: ScanJob) -> ScanResult<JobOutcome> {
        let (tx, rx) = mpsc::channel();
        job.completion_tx = Some(tx);
        self.post(job)?;
        rx.recv().map_err(|_| self.closed())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn is_shut_down(&self) -> bool {
        self.sender.lock().unwrap().is_none()
    }

    /// Stops accepting jobs. Jobs already queued still run before the worker exits.
    pub fn shutdown(&self) {
        if let Some(tx) = self.sender.lock().unwrap().take() {
            let _ = tx.send(QueueMessage::Shutdown);
            info!("Scan queue {} shutting down", self.name);
        }
    }

    fn closed(&self) -> ScanError {
        ScanError::QueueClosed {
            queue: self.name.clone(),
        }
    }
}

impl Drop for ScanJobQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Worker {
    fn run(self, rx: mpsc::Receiver<QueueMessage>) {
        loop {
            match rx.recv() {
                Ok(QueueMessage::Run(job)) => self.run_job(job),
                Ok(QueueMessage::Shutdown) => {
                    debug!("Scan worker {} received shutdown", self.name);
                    break;
                }
                Err(_) => {
                    debug!("Scan worker {} channel disconnected", self.name);
                    break;
                }
            }
        }
        debug!("Scan worker {} stopped", self.name);
    }

    fn run_job(&self, job: ScanJob) {
        let ScanJob {
            id,
            target,
            scanner,
            owner,
            completion_tx,
            ..
        } = job;

        let _ = self.events.send(QueueEvent::Started {
            job_id: id,
            target: (&target).into(),
        });

        let start = Instant::now();
        let scanned = panic::catch_unwind(AssertUnwindSafe(|| scanner.scan(&target)));
        let duration = start.elapsed();

        let (result, failure) = match scanned {
            Ok(Ok(result)) => (Some(Arc::new(result)), None),
            Ok(Err(e)) => {
                warn!("Scanner {} failed on {}: {:#}", scanner.id(), target, e);
                (None, Some(e))
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!("Scanner {} panicked on {}: {}", scanner.id(), target, message);
                (None, Some(anyhow!("scanner panicked: {}", message)))
            }
        };

        self.stats.job_finished(duration, failure.is_none());

        let event = match (&result, &failure) {
            (Some(result), _) => QueueEvent::Completed {
                job_id: id,
                total_findings: result.count(false),
                duration_ms: duration.as_millis() as u64,
            },
            (None, failure) => QueueEvent::Failed {
                job_id: id,
                error: failure
                    .as_ref()
                    .map(|e| e.to_string())
                    .unwrap_or_default(),
            },
        };
        let _ = self.events.send(event);

        let outcome = JobOutcome {
            job_id: id,
            scanner_id: scanner.id().to_string(),
            target: target.to_string(),
            result,
            failure,
            duration,
        };

        if let Some(owner) = owner {
            match owner.upgrade() {
                Some(session) => session.scanning_done(&outcome),
                None => debug!("Session for job {} is gone, dropping result", id),
            }
        }

        if let Some(tx) = completion_tx {
            let _ = tx.send(outcome);
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        project::Project,
        result::{DefectResult, ScanMetadata},
        scanner::{FnScanner, ScanTarget, Scanner},
        test_support::{sample_result, GatedScanner},
    };
    use std::path::PathBuf;

    fn file_target(name: &str) -> ScanTarget {
        ScanTarget::File {
            project: Project::new("app", "/work/app"),
            path: PathBuf::from(format!("/work/app/src/{}", name)),
            content: None,
        }
    }

    #[test]
    fn test_post_and_wait_returns_outcome() {
        let queue = ScanJobQueue::new("test-queue").unwrap();
        let scanner: Arc<dyn Scanner> = Arc::new(FnScanner::new("pmd", |_: &ScanTarget| {
            Ok(sample_result("pmd"))
        }));

        let outcome = queue
            .post_and_wait(ScanJob::file(scanner, file_target("A.java")))
            .unwrap();

        assert!(outcome.is_success());
        assert_eq!(outcome.scanner_id, "pmd");
        assert_eq!(outcome.result.unwrap().count(false), 3);
    }

    #[test]
    fn test_jobs_run_in_submission_order() {
        let queue = ScanJobQueue::new("fifo-queue").unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorder = Arc::clone(&seen);
        let scanner: Arc<dyn Scanner> = Arc::new(FnScanner::new("pmd", move |target: &ScanTarget| {
            recorder.lock().unwrap().push(target.to_string());
            Ok(DefectResult::empty(ScanMetadata::new("pmd", target.to_string())))
        }));

        for name in ["A.java", "B.java", "C.java"] {
            queue
                .post(ScanJob::file(Arc::clone(&scanner), file_target(name)))
                .unwrap();
        }
        queue
            .post_and_wait(ScanJob::file(scanner, file_target("D.java")))
            .unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(
            *seen,
            vec![
                "file /work/app/src/A.java",
                "file /work/app/src/B.java",
                "file /work/app/src/C.java",
                "file /work/app/src/D.java",
            ]
        );
    }

    #[test]
    fn test_failure_does_not_stop_worker() {
        let queue = ScanJobQueue::new("failing-queue").unwrap();
        let failing: Arc<dyn Scanner> = Arc::new(FnScanner::new("pmd", |_: &ScanTarget| {
            Err(anyhow!("parse error"))
        }));
        let panicking: Arc<dyn Scanner> = Arc::new(FnScanner::new("pmd", |_: &ScanTarget| {
            panic!("engine crashed")
        }));
        let healthy: Arc<dyn Scanner> = Arc::new(FnScanner::new("pmd", |_: &ScanTarget| {
            Ok(sample_result("pmd"))
        }));

        let outcome = queue
            .post_and_wait(ScanJob::file(failing, file_target("A.java")))
            .unwrap();
        assert!(!outcome.is_success());
        assert!(outcome.result.is_none());
        assert_eq!(outcome.failure.unwrap().to_string(), "parse error");

        let outcome = queue
            .post_and_wait(ScanJob::file(panicking, file_target("B.java")))
            .unwrap();
        assert!(outcome
            .failure
            .unwrap()
            .to_string()
            .contains("engine crashed"));

        let outcome = queue
            .post_and_wait(ScanJob::file(healthy, file_target("C.java")))
            .unwrap();
        assert!(outcome.is_success());

        let stats = queue.stats();
        assert_eq!(stats.submitted, 3);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.failed, 2);
        assert_eq!(stats.pending, 0);
    }

    #[test]
    fn test_post_after_shutdown_is_rejected() {
        let queue = ScanJobQueue::new("closed-queue").unwrap();
        queue.shutdown();
        assert!(queue.is_shut_down());

        let scanner: Arc<dyn Scanner> = Arc::new(FnScanner::new("pmd", |_: &ScanTarget| {
            Ok(sample_result("pmd"))
        }));
        let err = queue
            .post(ScanJob::file(scanner, file_target("A.java")))
            .unwrap_err();
        assert!(matches!(err, ScanError::QueueClosed { .. }));
    }

    #[test]
    fn test_queued_jobs_survive_shutdown() {
        let queue = ScanJobQueue::new("draining-queue").unwrap();
        let scanner = Arc::new(GatedScanner::new("pmd"));

        let (tx, rx) = mpsc::channel();
        let mut job = ScanJob::file(scanner.clone(), file_target("A.java"));
        job.completion_tx = Some(tx);
        queue.post(job).unwrap();
        queue.shutdown();

        scanner.release();
        let outcome = rx.recv().unwrap();
        assert!(outcome.is_success());
        assert_eq!(scanner.calls(), 1);
    }

    #[test]
    fn test_events_are_broadcast() {
        let queue = ScanJobQueue::new("event-queue").unwrap();
        let mut events = queue.subscribe();
        let scanner: Arc<dyn Scanner> = Arc::new(FnScanner::new("pmd", |_: &ScanTarget| {
            Ok(sample_result("pmd"))
        }));

        let outcome = queue
            .post_and_wait(ScanJob::file(scanner, file_target("A.java")))
            .unwrap();

        match events.try_recv().unwrap() {
            QueueEvent::Queued { job_id, target } => {
                assert_eq!(job_id, outcome.job_id);
                assert_eq!(
                    target,
                    TargetInfo::File {
                        path: PathBuf::from("/work/app/src/A.java")
                    }
                );
            }
            other => panic!("Expected queued event, got {:?}", other),
        }
        assert!(matches!(events.try_recv().unwrap(), QueueEvent::Started { .. }));
        match events.try_recv().unwrap() {
            QueueEvent::Completed { total_findings, .. } => assert_eq!(total_findings, 3),
            other => panic!("Expected completed event, got {:?}", other),
        }
    }
}
