//! Scanner contract
//!
//! Analysis engines (bug-pattern detectors, rule checkers) are opaque to the
//! coordinator: each one is a `Scanner` that turns a target into a `DefectResult`.
//! Engines are often not reentrant and hold large amounts of memory while running,
//! which is why the coordinator only ever calls them from a scan worker thread.

use crate::{project::Project, result::DefectResult};
use anyhow::Result;
use std::{
    fmt,
    path::PathBuf,
    sync::Arc,
};

#[derive(Debug, Clone)]
pub enum ScanTarget {
    Project(Project),
    File {
        project: Project,
        path: PathBuf,
        /// Unsaved editor content, when the file on disk is stale.
        content: Option<String>,
    },
}

impl ScanTarget {
    pub fn project(&self) -> &Project {
        match self {
            ScanTarget::Project(project) => project,
            ScanTarget::File { project, .. } => project,
        }
    }

    pub fn is_file(&self) -> bool {
        matches!(self, ScanTarget::File { .. })
    }
}

impl fmt::Display for ScanTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanTarget::Project(project) => write!(f, "project {}", project.name()),
            ScanTarget::File { path, .. } => write!(f, "file {}", path.display()),
        }
    }
}

pub trait Scanner: Send + Sync {
    /// Provider identity; sessions are keyed by project and this id.
    fn id(&self) -> &str;

    fn display_name(&self) -> &str {
        self.id()
    }

    fn scan(&self, target: &ScanTarget) -> Result<DefectResult>;
}

type ScanFn = dyn Fn(&ScanTarget) -> Result<DefectResult> + Send + Sync;

/// Adapts a closure to the `Scanner` trait, for engines that are a single call.
#[derive(Clone)]
pub struct FnScanner {
    id: String,
    scan_fn: Arc<ScanFn>,
}

impl FnScanner {
    pub fn new<F>(id: impl Into<String>, scan_fn: F) -> Self
    where
        F: Fn(&ScanTarget) -> Result<DefectResult> + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            scan_fn: Arc::new(scan_fn),
        }
    }
}

impl fmt::Debug for FnScanner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnScanner").field("id", &self.id).finish()
    }
}

impl Scanner for FnScanner {
    fn id(&self) -> &str {
        &self.id
    }

    fn scan(&self, target: &ScanTarget) -> Result<DefectResult> {
        (self.scan_fn)(target)
    }
}
