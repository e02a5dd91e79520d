//! Scan messages
//!
//! Typed jobs, outcomes and queue events instead of loosely shaped payloads, so the
//! worker, the sessions and the event subscribers agree at compile time.

use crate::{
    result::DefectResult,
    scanner::{ScanTarget, Scanner},
    session::Session,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::{
    fmt,
    path::PathBuf,
    sync::{mpsc, Arc, Weak},
    time::Duration,
};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One scanner invocation. Project jobs carry a weak link back to the session that
/// issued them; ad hoc file jobs have no owner and report only to their waiter.
pub struct ScanJob {
    pub(crate) id: JobId,
    pub(crate) target: ScanTarget,
    pub(crate) scanner: Arc<dyn Scanner>,
    pub(crate) owner: Option<Weak<Session>>,
    pub(crate) enqueued_at: DateTime<Utc>,
    pub(crate) completion_tx: Option<mpsc::Sender<JobOutcome>>,
}

impl ScanJob {
    pub fn project(scanner: Arc<dyn Scanner>, target: ScanTarget, owner: Weak<Session>) -> Self {
        Self {
            id: JobId::new(),
            target,
            scanner,
            owner: Some(owner),
            enqueued_at: Utc::now(),
            completion_tx: None,
        }
    }

    pub fn file(scanner: Arc<dyn Scanner>, target: ScanTarget) -> Self {
        Self {
            id: JobId::new(),
            target,
            scanner,
            owner: None,
            enqueued_at: Utc::now(),
            completion_tx: None,
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn target(&self) -> &ScanTarget {
        &self.target
    }

    pub fn enqueued_at(&self) -> DateTime<Utc> {
        self.enqueued_at
    }

    pub fn has_owner(&self) -> bool {
        self.owner.is_some()
    }
}

impl fmt::Debug for ScanJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScanJob")
            .field("id", &self.id)
            .field("target", &self.target.to_string())
            .field("scanner", &self.scanner.id())
            .field("owned", &self.owner.is_some())
            .field("enqueued_at", &self.enqueued_at)
            .finish()
    }
}

/// What a finished job reports. `result` is `None` exactly when `failure` is set.
#[derive(Debug)]
pub struct JobOutcome {
    pub job_id: JobId,
    pub scanner_id: String,
    pub target: String,
    pub result: Option<Arc<DefectResult>>,
    pub failure: Option<anyhow::Error>,
    pub duration: Duration,
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }
}

/// Serializes as `{"event": "completed", ...}` for hosts forwarding progress.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum QueueEvent {
    Queued {
        job_id: JobId,
        target: TargetInfo,
    },
    Started {
        job_id: JobId,
        target: TargetInfo,
    },
    Completed {
        job_id: JobId,
        total_findings: usize,
        duration_ms: u64,
    },
    Failed {
        job_id: JobId,
        error: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TargetInfo {
    Project { root: PathBuf },
    File { path: PathBuf },
}

impl From<&ScanTarget> for TargetInfo {
    fn from(target: &ScanTarget) -> Self {
        match target {
            ScanTarget::Project(project) => TargetInfo::Project {
                root: project.root().to_path_buf(),
            },
            ScanTarget::File { path, .. } => TargetInfo::File { path: path.clone() },
        }
    }
}

pub(crate) enum QueueMessage {
    Run(ScanJob),
    Shutdown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_event_serialization() {
        let job_id = JobId::new();
        let event = QueueEvent::Queued {
            job_id,
            target: TargetInfo::File {
                path: PathBuf::from("/work/app/src/A.java"),
            },
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "queued");
        assert_eq!(json["job_id"], job_id.to_string());
        assert_eq!(json["target"]["kind"], "file");
        assert_eq!(json["target"]["path"], "/work/app/src/A.java");

        let json = serde_json::to_value(QueueEvent::Completed {
            job_id,
            total_findings: 3,
            duration_ms: 12,
        })
        .unwrap();
        assert_eq!(json["event"], "completed");
        assert_eq!(json["total_findings"], 3);
    }
}
