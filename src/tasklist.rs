//! Task list integration
//!
//! Pushes the core findings of a session into a host task list, one list per file.
//! The pusher attaches itself as an observer to every session in scope, so a later
//! scan replaces the tasks without the host polling. Files that had tasks and no
//! longer appear in the newer result get an empty list, otherwise fixed defects
//! would linger in the host's view.

use crate::{
    finding::{Finding, Severity},
    observer::{ObserverId, ResultObserver},
    project::Project,
    registry::SessionRegistry,
    result::DefectResult,
    scan::ScanResult,
    session::{Session, SessionKey},
};
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeSet, HashMap},
    path::{Path, PathBuf},
    sync::{Arc, Mutex, Weak},
};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub file: PathBuf,
    pub line: usize,
    pub message: String,
    pub category: String,
    pub severity: Severity,
}

impl From<&Finding> for Task {
    fn from(finding: &Finding) -> Self {
        Self {
            file: finding.location.file.clone(),
            line: finding.location.line,
            message: finding.message.clone(),
            category: finding.category.clone(),
            severity: finding.severity,
        }
    }
}

/// Host side of the task list. `tasks` replaces everything previously set for `file`.
pub trait TaskSink: Send + Sync {
    fn set_tasks(&self, file: &Path, tasks: Vec<Task>);
}

#[derive(Default)]
struct Followed {
    session: Weak<Session>,
    files: BTreeSet<PathBuf>,
}

/// Every push takes `followed` and sends the result the session holds at that moment,
/// so a delayed notification can never put an older result back over a newer one.
struct TaskPublisher {
    sink: Arc<dyn TaskSink>,
    followed: Mutex<HashMap<SessionKey, Followed>>,
}

impl TaskPublisher {
    fn follow(&self, session: &Arc<Session>) {
        self.followed
            .lock()
            .unwrap()
            .entry(session.key().clone())
            .or_default()
            .session = Arc::downgrade(session);
    }

    fn push_current(&self, session: &Session) -> bool {
        let mut followed = self.followed.lock().unwrap();
        match session.result() {
            Some(result) => {
                self.push_locked(&mut followed, session.key(), &result);
                true
            }
            None => false,
        }
    }

    fn push_locked(
        &self,
        followed: &mut HashMap<SessionKey, Followed>,
        session: &SessionKey,
        result: &DefectResult,
    ) {
        let by_file = result.group_by_file(true);
        let files: BTreeSet<PathBuf> = by_file.keys().map(|f| f.to_path_buf()).collect();

        let entry = followed.entry(session.clone()).or_default();
        let previous = std::mem::replace(&mut entry.files, files.clone());
        let stale: Vec<PathBuf> = previous.difference(&files).cloned().collect();

        for file in &stale {
            self.sink.set_tasks(file, Vec::new());
        }
        for (file, findings) in by_file {
            let tasks = findings.into_iter().map(Task::from).collect();
            self.sink.set_tasks(file, tasks);
        }

        debug!(
            "Pushed tasks for {} files of {} ({} cleared)",
            files.len(),
            session,
            stale.len()
        );
    }

    fn forget(&self, session: &SessionKey) {
        let followed = self.followed.lock().unwrap().remove(session);
        for file in followed.map(|f| f.files).unwrap_or_default() {
            self.sink.set_tasks(&file, Vec::new());
        }
    }
}

impl ResultObserver for TaskPublisher {
    fn on_result_changed(
        &self,
        session: &SessionKey,
        _old: Option<Arc<DefectResult>>,
        new: Arc<DefectResult>,
    ) {
        let mut followed = self.followed.lock().unwrap();
        let current = match followed.get(session) {
            Some(entry) => entry
                .session
                .upgrade()
                .and_then(|followed_session| followed_session.result())
                .unwrap_or(new),
            None => {
                debug!("Dropping late result for unfollowed {}", session);
                return;
            }
        };
        self.push_locked(&mut followed, session, &current);
    }
}

pub struct TaskListPusher {
    provider: String,
    publisher: Arc<TaskPublisher>,
    attached: Mutex<Vec<(Arc<Session>, ObserverId)>>,
}

impl TaskListPusher {
    pub fn new(provider: impl Into<String>, sink: Arc<dyn TaskSink>) -> Self {
        Self {
            provider: provider.into(),
            publisher: Arc::new(TaskPublisher {
                sink,
                followed: Mutex::new(HashMap::new()),
            }),
            attached: Mutex::new(Vec::new()),
        }
    }

    /// Follows the sessions of `projects`, replacing any previous scope. Each session is
    /// observed before its current result is pushed, so no completion falls between
    /// the two. A session that never scanned is scanned first, blocking this call
    /// until it finishes. Returns the number of sessions now followed.
    pub fn set_scope(&self, registry: &SessionRegistry, projects: &[Project]) -> ScanResult<usize> {
        self.clear_scope();

        let mut attached = Vec::with_capacity(projects.len());
        for project in projects {
            let session = registry.get(project, &self.provider)?;
            self.publisher.follow(&session);
            let id = session.add_observer(Arc::clone(&self.publisher) as Arc<dyn ResultObserver>);
            attached.push((Arc::clone(&session), id));

            if session.result().is_none() {
                if let Err(e) = session.compute_result_and_wait() {
                    for (session, id) in attached {
                        session.remove_observer(id);
                        self.publisher.forget(session.key());
                    }
                    return Err(e);
                }
            }
            if !self.publisher.push_current(&session) {
                warn!("No result available for {}, nothing to push", session.key());
            }
        }

        let count = attached.len();
        *self.attached.lock().unwrap() = attached;
        info!("Task list following {} sessions of {}", count, self.provider);
        Ok(count)
    }

    /// Pushes the tasks of a single file from the owning project's current result.
    /// Does not attach to the session.
    pub fn push_file(&self, registry: &SessionRegistry, file: &Path) -> ScanResult<usize> {
        let project = registry.find_project(file)?;
        let session = registry.get(&project, &self.provider)?;

        let tasks: Vec<Task> = current_or_computed(&session)?
            .map(|result| {
                result
                    .findings_for_file(file, true)
                    .into_iter()
                    .map(Task::from)
                    .collect()
            })
            .unwrap_or_default();

        let count = tasks.len();
        self.publisher.sink.set_tasks(file, tasks);
        Ok(count)
    }

    /// Detaches from every followed session and clears the tasks pushed for them.
    pub fn clear_scope(&self) {
        let attached = std::mem::take(&mut *self.attached.lock().unwrap());
        if attached.is_empty() {
            return;
        }

        for (session, id) in &attached {
            session.remove_observer(*id);
            self.publisher.forget(session.key());
        }
        info!("Task list detached from {} sessions", attached.len());
    }

    pub fn scope_len(&self) -> usize {
        self.attached.lock().unwrap().len()
    }
}

fn current_or_computed(session: &Session) -> ScanResult<Option<Arc<DefectResult>>> {
    match session.result() {
        Some(result) => Ok(Some(result)),
        None => session.compute_result_and_wait(),
    }
}

impl Drop for TaskListPusher {
    fn drop(&mut self) {
        self.clear_scope();
    }
}
