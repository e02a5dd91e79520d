//! Defect results
//!
//! A `DefectResult` is the immutable snapshot produced by one completed scan. Sessions
//! hand it out as `Arc<DefectResult>` and swap the whole reference when a newer scan
//! finishes, so a consumer holding an older snapshot keeps a consistent view.
//!
//! Every grouping is computed on demand over the single stored finding list. Tree
//! presenters and task lists ask for different shapes of the same data and we never
//! keep per-shape copies that could drift apart.

use crate::finding::{Finding, Severity};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    path::{Path, PathBuf},
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanMetadata {
    pub provider: String,

    pub target: String,

    pub started_at: DateTime<Utc>,

    pub duration_ms: u64,

    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub scanned_files: Vec<PathBuf>,

    #[serde(skip_serializing_if = "HashMap::is_empty", default)]
    pub skipped_files: HashMap<PathBuf, String>,
}

impl ScanMetadata {
    pub fn new(provider: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            target: target.into(),
            started_at: Utc::now(),
            duration_ms: 0,
            scanned_files: Vec::new(),
            skipped_files: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefectResult {
    findings: Vec<Finding>,

    metadata: ScanMetadata,
}

impl DefectResult {
    pub fn new(findings: Vec<Finding>, metadata: ScanMetadata) -> Self {
        Self { findings, metadata }
    }

    pub fn empty(metadata: ScanMetadata) -> Self {
        Self::new(Vec::new(), metadata)
    }

    /// Combines partial results of one scan, e.g. several engines run back to back
    /// by a composite scanner. `metadata` describes the whole scan; part durations
    /// are added to it.
    pub fn merge(parts: Vec<DefectResult>, metadata: ScanMetadata) -> Self {
        let mut metadata = metadata;
        let mut findings = Vec::new();

        for part in parts {
            metadata.duration_ms += part.metadata.duration_ms;
            for file in part.metadata.scanned_files {
                if !metadata.scanned_files.contains(&file) {
                    metadata.scanned_files.push(file);
                }
            }
            metadata.skipped_files.extend(part.metadata.skipped_files);
            findings.extend(part.findings);
        }

        Self { findings, metadata }
    }

    pub fn findings(&self) -> &[Finding] {
        &self.findings
    }

    pub fn metadata(&self) -> &ScanMetadata {
        &self.metadata
    }

    pub fn is_empty(&self) -> bool {
        self.findings.is_empty()
    }

    pub fn filtered(&self, core_only: bool) -> impl Iterator<Item = &Finding> {
        self.findings
            .iter()
            .filter(move |finding| finding.matches_filter(core_only))
    }

    pub fn core_findings(&self) -> impl Iterator<Item = &Finding> {
        self.filtered(true)
    }

    pub fn count(&self, core_only: bool) -> usize {
        self.filtered(core_only).count()
    }

    pub fn group_by_type(&self, core_only: bool) -> BTreeMap<&str, Vec<&Finding>> {
        let mut groups: BTreeMap<&str, Vec<&Finding>> = BTreeMap::new();
        for finding in self.filtered(core_only) {
            groups
                .entry(finding.category.as_str())
                .or_default()
                .push(finding);
        }
        groups
    }

    pub fn group_by_file(&self, core_only: bool) -> BTreeMap<&Path, Vec<&Finding>> {
        let mut groups: BTreeMap<&Path, Vec<&Finding>> = BTreeMap::new();
        for finding in self.filtered(core_only) {
            groups.entry(finding.file()).or_default().push(finding);
        }
        groups
    }

    /// Most severe group first.
    pub fn group_by_severity(&self, core_only: bool) -> Vec<(Severity, Vec<&Finding>)> {
        let mut groups: BTreeMap<Severity, Vec<&Finding>> = BTreeMap::new();
        for finding in self.filtered(core_only) {
            groups.entry(finding.severity).or_default().push(finding);
        }
        groups.into_iter().rev().collect()
    }

    pub fn findings_for_file(&self, file: &Path, core_only: bool) -> Vec<&Finding> {
        self.filtered(core_only)
            .filter(|finding| finding.file() == file)
            .collect()
    }

    pub fn files(&self) -> Vec<&Path> {
        let mut files: Vec<&Path> = self.findings.iter().map(Finding::file).collect();
        files.sort();
        files.dedup();
        files
    }
}

/// How a presenter wants the findings partitioned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupingMode {
    Type,
    File,
    Severity,
}

#[derive(Debug, Clone)]
pub struct FindingGroup<'a> {
    pub label: String,
    pub findings: Vec<&'a Finding>,
}

impl GroupingMode {
    pub fn groups<'a>(&self, result: &'a DefectResult, core_only: bool) -> Vec<FindingGroup<'a>> {
        let groups: Vec<FindingGroup<'a>> = match self {
            GroupingMode::Type => result
                .group_by_type(core_only)
                .into_iter()
                .map(|(label, findings)| FindingGroup {
                    label: label.to_string(),
                    findings,
                })
                .collect(),
            GroupingMode::File => result
                .group_by_file(core_only)
                .into_iter()
                .map(|(file, findings)| FindingGroup {
                    label: file.display().to_string(),
                    findings,
                })
                .collect(),
            GroupingMode::Severity => result
                .group_by_severity(core_only)
                .into_iter()
                .map(|(severity, findings)| FindingGroup {
                    label: severity.to_string(),
                    findings,
                })
                .collect(),
        };

        groups
            .into_iter()
            .filter(|group| !group.findings.is_empty())
            .collect()
    }
}

impl fmt::Display for GroupingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GroupingMode::Type => "type",
            GroupingMode::File => "file",
            GroupingMode::Severity => "severity",
        };
        f.write_str(name)
    }
}
