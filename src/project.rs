//! Project identity
//!
//! The host owns projects; we only need a stable key and the root directory so a
//! file handed to us by an editor can be traced back to the project that owns it.

use serde::{Deserialize, Serialize};
use std::{
    fmt,
    path::{Path, PathBuf},
};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProjectKey(PathBuf);

impl ProjectKey {
    pub fn as_path(&self) -> &Path {
        &self.0
    }
}

impl fmt::Display for ProjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Project {
    name: String,
    root: PathBuf,
}

impl Project {
    pub fn new(name: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            root: root.into(),
        }
    }

    /// Uses the last path component as the display name.
    pub fn from_root(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let name = root
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| root.display().to_string());
        Self { name, root }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn key(&self) -> ProjectKey {
        ProjectKey(self.root.clone())
    }

    pub fn contains(&self, file: &Path) -> bool {
        file.starts_with(&self.root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_root_uses_directory_name() {
        let project = Project::from_root("/work/billing-service");
        assert_eq!(project.name(), "billing-service");
        assert_eq!(project.key().as_path(), Path::new("/work/billing-service"));
    }

    #[test]
    fn test_contains_is_component_wise() {
        let project = Project::new("app", "/work/app");
        assert!(project.contains(Path::new("/work/app/src/Main.java")));
        assert!(!project.contains(Path::new("/work/application/src/Main.java")));
        assert!(!project.contains(Path::new("/other/Main.java")));
    }

    #[test]
    fn test_keys_compare_by_root() {
        let a = Project::new("one", "/work/app");
        let b = Project::new("two", "/work/app");
        assert_eq!(a.key(), b.key());
        assert_eq!(a.key().to_string(), "/work/app");
    }
}
