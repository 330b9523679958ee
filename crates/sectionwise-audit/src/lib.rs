//! Sectionwise Audit Trail
//!
//! The audit trail lives inside the LMS as unpublished announcements, one per
//! mutating action. This crate owns the post format and the strict parser that
//! reads it back, plus the sort/filter/paginate pass the dashboard queries.
//! It performs no I/O: callers fetch and write posts through the LMS gateway.
//!
//! # Types
//!
//! - [`AuditRecord`] - An action about to be recorded
//! - [`AuditPost`] - A discussion post as read back from the LMS
//! - [`AuditEntry`] - A parsed audit entry with derived severity and category
//! - [`AuditQuery`] / [`AuditPage`] - Query parameters and one page of results
//!
//! # Example
//!
//! ```rust
//! use chrono::Utc;
//! use sectionwise_audit::{parse_post, AuditPost, AuditRecord, PostRenderer, Severity};
//!
//! let record = AuditRecord::new("Student Moved", "Moved Ada to Tutorial Group B")
//!     .with_justification("Timetable clash");
//! let renderer = PostRenderer::new(&record, Utc::now());
//!
//! let post = AuditPost {
//!     id: 1,
//!     title: renderer.title(),
//!     message: renderer.body(),
//!     author_name: Some("Operator".to_string()),
//!     posted_at: None,
//! };
//! let entry = parse_post(&post);
//! assert_eq!(entry.action, "Student Moved");
//! assert_eq!(entry.severity, Severity::Warning);
//! assert!(entry.well_formed);
//! ```

mod format;
mod parse;
mod query;

pub use format::{escape_html, PostRenderer};
pub use parse::{is_audit_title, parse_post, read_entries};
pub use query::{apply_query, AuditPage, AuditQuery, Pagination, SeveritySummary};

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Title prefix that marks a discussion post as an audit entry.
pub const TITLE_PREFIX: &str = "[Audit]";

// ============================================================================
// Error Types
// ============================================================================

/// Errors raised while interpreting audit query parameters.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuditError {
    /// Severity filter is not one of the known levels.
    #[error("unknown severity '{0}' (expected info, warning, critical or all)")]
    UnknownSeverity(String),

    /// Category filter is not one of the known categories.
    #[error(
        "unknown category '{0}' (expected create, allocation, move, override, enrollment, other or all)"
    )]
    UnknownCategory(String),
}

// ============================================================================
// Records
// ============================================================================

/// A mutating action about to be written to the audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    /// Short action name, e.g. "Student Moved".
    pub action: String,
    /// Human-readable description.
    pub details: String,
    /// Operator-supplied justification.
    pub justification: Option<String>,
    /// Structured context.
    pub metadata: Option<serde_json::Value>,
    /// Enumerated errors, for summary entries.
    #[serde(default)]
    pub errors: Vec<String>,
}

impl AuditRecord {
    /// Creates a record with an action and details.
    #[must_use]
    pub fn new(action: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            details: details.into(),
            justification: None,
            metadata: None,
            errors: Vec::new(),
        }
    }

    /// Sets the justification.
    #[must_use]
    pub fn with_justification(mut self, justification: impl Into<String>) -> Self {
        self.justification = Some(justification.into());
        self
    }

    /// Sets the structured metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Sets the enumerated errors.
    #[must_use]
    pub fn with_errors(mut self, errors: Vec<String>) -> Self {
        self.errors = errors;
        self
    }
}

/// A discussion post as read back from the LMS.
///
/// Kept local so this crate stays independent of the gateway crate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditPost {
    /// Post identifier.
    pub id: u64,
    /// Post title.
    pub title: String,
    /// Post body (HTML).
    pub message: String,
    /// Author display name.
    pub author_name: Option<String>,
    /// LMS-reported posting time.
    pub posted_at: Option<DateTime<Utc>>,
}

/// A parsed audit entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    /// Identifier of the underlying post.
    pub id: u64,
    /// When the action happened.
    pub timestamp: DateTime<Utc>,
    /// Display name of the actor.
    pub actor: String,
    /// Action name.
    pub action: String,
    /// Human-readable description.
    pub details: String,
    /// Operator-supplied justification.
    pub justification: Option<String>,
    /// Structured context.
    pub metadata: Option<serde_json::Value>,
    /// Enumerated errors.
    pub errors: Vec<String>,
    /// Severity derived from the action.
    pub severity: Severity,
    /// Category derived from the action.
    pub category: Category,
    /// The post body as stored.
    pub raw: String,
    /// `false` when any field fell back to its default.
    pub well_formed: bool,
}

// ============================================================================
// Classification
// ============================================================================

/// Severity of an audit entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Routine action.
    Info,
    /// Action that changed a student's placement or overrode a rule.
    Warning,
    /// Action that failed.
    Critical,
}

impl Severity {
    /// Derives the severity from an action name.
    #[must_use]
    pub fn from_action(action: &str) -> Self {
        let action = action.to_lowercase();
        if action.contains("failed") || action.contains("error") {
            Self::Critical
        } else if action.contains("moved") || action.contains("override") {
            Self::Warning
        } else {
            Self::Info
        }
    }

    /// Returns the lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = AuditError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "info" => Ok(Self::Info),
            "warning" => Ok(Self::Warning),
            "critical" => Ok(Self::Critical),
            _ => Err(AuditError::UnknownSeverity(s.to_string())),
        }
    }
}

/// Category of an audit entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// Section creation.
    Create,
    /// Bulk allocation.
    Allocation,
    /// Single-student move.
    Move,
    /// Overrides and promotions.
    Override,
    /// Other enrollment changes.
    Enrollment,
    /// Anything else.
    Other,
}

impl Category {
    /// Derives the category from an action name; the first matching rule wins.
    #[must_use]
    pub fn from_action(action: &str) -> Self {
        let action = action.to_lowercase();
        let has = |needles: &[&str]| needles.iter().any(|n| action.contains(n));

        if has(&["created", "section"]) {
            Self::Create
        } else if has(&["allocated", "allocation"]) {
            Self::Allocation
        } else if has(&["moved", "move"]) {
            Self::Move
        } else if has(&["override", "promoted"]) {
            Self::Override
        } else if has(&["enrolled", "enrollment"]) {
            Self::Enrollment
        } else {
            Self::Other
        }
    }

    /// Returns the lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Allocation => "allocation",
            Self::Move => "move",
            Self::Override => "override",
            Self::Enrollment => "enrollment",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = AuditError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "create" => Ok(Self::Create),
            "allocation" => Ok(Self::Allocation),
            "move" => Ok(Self::Move),
            "override" => Ok(Self::Override),
            "enrollment" => Ok(Self::Enrollment),
            "other" => Ok(Self::Other),
            _ => Err(AuditError::UnknownCategory(s.to_string())),
        }
    }
}
