//! Code defects coordinator
//!
//! Integrates external static-analysis engines with a development environment and
//! keeps one analysis session per project and provider. Engines are heavy and often
//! not reentrant, so scans run on dedicated worker threads and each session allows at
//! most one scan in flight. Callers that need an answer now join the running scan
//! instead of starting another.
//!
//! Results are immutable snapshots shared by reference. Tree views, task lists and
//! toolbar toggles observe sessions independently, and a failed scan never replaces
//! a good result with an empty one.

pub mod config;
pub mod finding;
pub mod logging;
pub mod observer;
pub mod project;
pub mod registry;
pub mod result;
pub mod scan;
pub mod scanner;
pub mod session;
pub mod tasklist;

#[cfg(test)]
mod test_support;

pub use config::{CoordinatorConfig, QueueMode};
pub use finding::{Confidence, Finding, Location, Severity};
pub use observer::{ObserverId, ResultObserver};
pub use project::{Project, ProjectKey};
pub use registry::SessionRegistry;
pub use result::{DefectResult, GroupingMode, ScanMetadata};
pub use scan::{ScanError, ScanJobQueue, ScanResult};
pub use scanner::{FnScanner, ScanTarget, Scanner};
pub use session::{ComputeOutcome, Session, SessionKey};
pub use tasklist::{Task, TaskListPusher, TaskSink};
