//! Session registry
//!
//! Sole owner of session lifetimes. Consumers ask for the session of a project and
//! provider and get a shared handle; they never build sessions themselves. The first
//! request for a pair constructs the session while holding the map entry, so two
//! callers racing on a fresh project still end up with the same instance.
//!
//! The registry also owns the threads every session shares: the notification
//! dispatcher, the file worker for ad hoc single-file scans (kept apart so an editor
//! asking about one file never queues behind a project scan), and, in shared mode,
//! the single project worker.

use crate::{
    config::{CoordinatorConfig, QueueMode},
    observer::NotificationDispatcher,
    project::{Project, ProjectKey},
    result::DefectResult,
    scan::{ScanError, ScanJob, ScanJobQueue, ScanResult},
    scanner::{ScanTarget, Scanner},
    session::{Session, SessionKey},
};
use anyhow::anyhow;
use dashmap::{mapref::entry::Entry, DashMap};
use std::{path::Path, sync::Arc};
use tracing::{debug, info};

const PROJECT_WORKER: &str = "codedefects-project-scanner";
const FILE_WORKER: &str = "codedefects-file-scanner";

pub struct SessionRegistry {
    config: CoordinatorConfig,
    providers: DashMap<String, Arc<dyn Scanner>>,
    sessions: DashMap<SessionKey, Arc<Session>>,
    projects: DashMap<ProjectKey, Project>,
    project_queue: Option<Arc<ScanJobQueue>>,
    file_queue: Arc<ScanJobQueue>,
    dispatcher: NotificationDispatcher,
}

impl SessionRegistry {
    pub fn new(config: CoordinatorConfig) -> ScanResult<Self> {
        config
            .validate()
            .map_err(|reason| ScanError::InvalidConfig { reason })?;

        let history = config.queue.history_window;
        let project_queue = match config.queue.mode {
            QueueMode::Shared => Some(Arc::new(ScanJobQueue::with_history(
                PROJECT_WORKER,
                history,
            )?)),
            QueueMode::PerSession => None,
        };
        let file_queue = Arc::new(ScanJobQueue::with_history(FILE_WORKER, history)?);

        let thread_name = config.notifications.thread_name.clone();
        let dispatcher =
            NotificationDispatcher::new(&thread_name).map_err(|source| ScanError::WorkerSpawn {
                queue: thread_name,
                source,
            })?;

        info!("Session registry ready ({:?} project queue)", config.queue.mode);

        Ok(Self {
            config,
            providers: DashMap::new(),
            sessions: DashMap::new(),
            projects: DashMap::new(),
            project_queue,
            file_queue,
            dispatcher,
        })
    }

    /// Returns the previously registered scanner for the same id, if any. Existing
    /// sessions keep the scanner they were created with.
    pub fn register_provider(&self, scanner: Arc<dyn Scanner>) -> Option<Arc<dyn Scanner>> {
        let id = scanner.id().to_string();
        info!("Registering provider {}", id);
        self.providers.insert(id, scanner)
    }

    pub fn providers(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.providers.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Returns the session for `project` and `provider`, creating it on first use.
    pub fn get(&self, project: &Project, provider: &str) -> ScanResult<Arc<Session>> {
        let scanner = self.scanner(provider)?;
        let key = SessionKey::new(project.key(), provider);

        // The project entry stays locked until the session is in place, so a
        // concurrent release of the same project sees both or neither.
        let _project = self
            .projects
            .entry(project.key())
            .or_insert_with(|| project.clone());

        match self.sessions.entry(key) {
            Entry::Occupied(entry) => Ok(Arc::clone(entry.get())),
            Entry::Vacant(entry) => {
                let queue = self.queue_for(project, provider)?;
                let session = Session::new(
                    project.clone(),
                    scanner,
                    queue,
                    self.dispatcher.clone(),
                    &self.config.session,
                );
                entry.insert(Arc::clone(&session));
                info!("Opened session {}", session.key());
                Ok(session)
            }
        }
    }

    /// Existing session only; never creates one.
    pub fn lookup(&self, project: &ProjectKey, provider: &str) -> Option<Arc<Session>> {
        let key = SessionKey::new(project.clone(), provider);
        self.sessions.get(&key).map(|entry| Arc::clone(entry.value()))
    }

    pub fn sessions(&self) -> Vec<Arc<Session>> {
        self.sessions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    pub fn sessions_for(&self, project: &ProjectKey) -> Vec<Arc<Session>> {
        self.sessions
            .iter()
            .filter(|entry| entry.key().project() == project)
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    pub fn open_projects(&self) -> Vec<Project> {
        self.projects.iter().map(|e| e.value().clone()).collect()
    }

    /// Discards every session of the project, detaching their observers. Safe to call
    /// for a project that was never opened or is already released.
    pub fn release(&self, project: &Project) -> usize {
        let project_key = project.key();

        // Sessions are only created while their project entry is held, so holding it
        // here keeps a concurrent `get` from slipping a session in halfway.
        let entry = match self.projects.entry(project_key.clone()) {
            Entry::Occupied(entry) => entry,
            Entry::Vacant(_) => {
                debug!("No sessions to release for {}", project_key);
                return 0;
            }
        };

        let keys: Vec<SessionKey> = self
            .sessions
            .iter()
            .filter(|session| session.key().project() == &project_key)
            .map(|session| session.key().clone())
            .collect();

        let mut released = 0;
        for key in keys {
            if let Some((_, session)) = self.sessions.remove(&key) {
                session.release();
                released += 1;
            }
        }
        entry.remove();

        if released > 0 {
            info!("Released {} sessions of {}", released, project_key);
        } else {
            debug!("No sessions to release for {}", project_key);
        }
        released
    }

    /// The open project with the deepest root containing `file`.
    pub fn find_project(&self, file: &Path) -> ScanResult<Project> {
        self.projects
            .iter()
            .filter(|entry| entry.value().contains(file))
            .max_by_key(|entry| entry.value().root().components().count())
            .map(|entry| entry.value().clone())
            .ok_or_else(|| ScanError::NoProjectContext {
                path: file.to_path_buf(),
            })
    }

    /// Scans one file on the shared file worker and waits for it. Runs regardless of
    /// whether a project scan of the same session is in flight.
    pub fn analyze_file(
        &self,
        provider: &str,
        file: &Path,
        content: Option<String>,
    ) -> ScanResult<Arc<DefectResult>> {
        let scanner = self.scanner(provider)?;
        let project = self.find_project(file)?;

        let target = ScanTarget::File {
            project,
            path: file.to_path_buf(),
            content,
        };
        let outcome = self
            .file_queue
            .post_and_wait(ScanJob::file(scanner, target))?;

        match outcome.result {
            Some(result) => Ok(result),
            None => Err(ScanError::ScannerFailure {
                scanner: outcome.scanner_id,
                target: outcome.target,
                source: outcome
                    .failure
                    .unwrap_or_else(|| anyhow!("scan produced no result")),
            }),
        }
    }

    pub fn file_queue(&self) -> &ScanJobQueue {
        &self.file_queue
    }

    pub fn project_queue(&self) -> Option<&ScanJobQueue> {
        self.project_queue.as_deref()
    }

    /// Releases every open project and stops the shared workers. Queued jobs still
    /// drain; their results are dropped by the released sessions.
    pub fn shutdown(&self) {
        for project in self.open_projects() {
            self.release(&project);
        }
        for session in self.sessions() {
            session.release();
        }
        self.sessions.clear();

        if let Some(queue) = &self.project_queue {
            queue.shutdown();
        }
        self.file_queue.shutdown();
        info!("Session registry shut down");
    }

    fn scanner(&self, provider: &str) -> ScanResult<Arc<dyn Scanner>> {
        self.providers
            .get(provider)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| ScanError::UnknownProvider {
                provider: provider.to_string(),
            })
    }

    fn queue_for(&self, project: &Project, provider: &str) -> ScanResult<Arc<ScanJobQueue>> {
        match &self.project_queue {
            Some(queue) => Ok(Arc::clone(queue)),
            None => {
                let name = format!("scan-{}-{}", provider, project.name());
                Ok(Arc::new(ScanJobQueue::with_history(
                    name,
                    self.config.queue.history_window,
                )?))
            }
        }
    }
}
