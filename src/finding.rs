//! Finding model
//!
//! A finding is one defect reported by an analysis tool. Tools disagree on how they
//! grade their output, so severity and confidence are normalized into ordered enums
//! here and the tool keeps the final say on whether a finding is "core" (worth showing
//! by default) or low-value noise such as pure style complaints.
//!
//! Findings are plain values. They are only ever shared through an immutable
//! `DefectResult`, so nothing here needs interior mutability.

use serde::{Deserialize, Serialize};
use std::{
    fmt,
    path::{Path, PathBuf},
};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Informational,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Informational => "informational",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    fn weight(&self) -> u32 {
        match self {
            Self::Critical => 1000,
            Self::High => 100,
            Self::Medium => 10,
            Self::Low => 1,
            Self::Informational => 0,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl Confidence {
    fn multiplier(&self) -> u32 {
        match self {
            Self::High => 10,
            Self::Medium => 5,
            Self::Low => 1,
        }
    }
}

/// Source position of a finding. Lines are 1-based, columns are optional because
/// bytecode-level detectors usually only know the line.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    pub file: PathBuf,
    pub line: usize,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub column: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub end_line: Option<usize>,
}

impl Location {
    pub fn new(file: impl Into<PathBuf>, line: usize) -> Self {
        Self {
            file: file.into(),
            line,
            column: None,
            end_line: None,
        }
    }

    pub fn with_column(mut self, column: usize) -> Self {
        self.column = Some(column);
        self
    }

    pub fn with_end_line(mut self, end_line: usize) -> Self {
        self.end_line = Some(end_line);
        self
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file.display(), self.line)?;
        if let Some(column) = self.column {
            write!(f, ":{}", column)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub id: Uuid,

    pub scanner_id: String,

    pub category: String,

    pub severity: Severity,

    pub confidence: Confidence,

    pub location: Location,

    pub message: String,

    /// Scanner-supplied classification. `false` marks style-only or low-confidence
    /// output that the core filter hides.
    #[serde(default = "default_core")]
    pub core: bool,
}

fn default_core() -> bool {
    true
}

impl Finding {
    pub fn new(
        scanner_id: impl Into<String>,
        category: impl Into<String>,
        severity: Severity,
        location: Location,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            scanner_id: scanner_id.into(),
            category: category.into(),
            severity,
            confidence: Confidence::High,
            location,
            message: message.into(),
            core: true,
        }
    }

    pub fn with_confidence(mut self, confidence: Confidence) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn low_value(mut self) -> Self {
        self.core = false;
        self
    }

    pub fn file(&self) -> &Path {
        &self.location.file
    }

    pub fn is_core(&self) -> bool {
        self.core
    }

    pub fn matches_filter(&self, core_only: bool) -> bool {
        !core_only || self.core
    }

    pub fn priority_score(&self) -> u32 {
        self.severity.weight() * self.confidence.multiplier()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);
        assert!(Severity::Low > Severity::Informational);
    }

    #[test]
    fn test_confidence_ordering() {
        assert!(Confidence::High > Confidence::Medium);
        assert!(Confidence::Medium > Confidence::Low);
    }

    #[test]
    fn test_priority_score() {
        let critical = Finding::new(
            "pmd",
            "EmptyCatchBlock",
            Severity::Critical,
            Location::new("src/Main.java", 3),
            "empty catch",
        );
        let low = critical
            .clone()
            .with_confidence(Confidence::Low);
        let mut medium = critical.clone().with_confidence(Confidence::Medium);
        medium.severity = Severity::Medium;

        assert_eq!(critical.priority_score(), 10000);
        assert_eq!(low.priority_score(), 1000);
        assert_eq!(medium.priority_score(), 50);
    }

    #[test]
    fn test_core_filter() {
        let finding = Finding::new(
            "checkstyle",
            "LineLength",
            Severity::Low,
            Location::new("src/Main.java", 10),
            "line too long",
        );
        assert!(finding.matches_filter(true));

        let noisy = finding.low_value();
        assert!(!noisy.is_core());
        assert!(!noisy.matches_filter(true));
        assert!(noisy.matches_filter(false));
    }

    #[test]
    fn test_location_display() {
        let location = Location::new("src/Main.java", 12);
        assert_eq!(location.to_string(), "src/Main.java:12");

        let location = location.with_column(4).with_end_line(14);
        assert_eq!(location.to_string(), "src/Main.java:12:4");
        assert_eq!(location.end_line, Some(14));
    }

    #[test]
    fn test_core_defaults_when_missing() {
        let json = serde_json::json!({
            "id": Uuid::new_v4(),
            "scanner_id": "findbugs",
            "category": "NP_NULL_ON_SOME_PATH",
            "severity": "high",
            "confidence": "medium",
            "location": { "file": "src/A.java", "line": 7 },
            "message": "possible null dereference"
        });

        let finding: Finding = serde_json::from_value(json).unwrap();
        assert!(finding.core);
        assert_eq!(finding.location.column, None);
        assert_eq!(finding.severity, Severity::High);
    }
}
