//! Error types for Sectionwise course operations.
//!
//! This module defines the error hierarchy for configuration loading, LMS
//! access, allocation, student moves and promotion. Per-item variants (one
//! student, one facilitator) are collected into outcome reports by the bulk
//! paths; whole-operation variants abort before any side effect.

use std::path::PathBuf;

use sectionwise_lms::{EnrollmentId, LmsError, SectionId, UserId};

/// A specialized `Result` type for Sectionwise operations.
pub type Result<T> = std::result::Result<T, SectionwiseError>;

/// Errors that can occur while managing course sections.
#[derive(Debug, thiserror::Error)]
pub enum SectionwiseError {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Invalid JSON syntax in configuration file.
    #[error("Invalid JSON in config file '{path}': {message}\n\nSuggestion: Validate your sectionwise.json with a JSON linter")]
    ConfigParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Description of the parse error.
        message: String,
    },

    /// Endpoint, credential or course identifier is missing or malformed.
    #[error("Invalid configuration: {message}\n\nSuggestion: {suggestion}")]
    ConfigurationError {
        /// Description of the validation failure.
        message: String,
        /// Actionable suggestion for the user.
        suggestion: String,
    },

    /// A request to the service was malformed.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    // ========================================================================
    // LMS Errors
    // ========================================================================
    /// The LMS call itself failed.
    #[error("LMS unavailable during {operation}: {message}")]
    UpstreamUnavailable {
        /// What was being attempted.
        operation: String,
        /// HTTP status, when the LMS answered.
        status: Option<u16>,
        /// Underlying error message.
        message: String,
    },

    /// The LMS returned a record that does not fit the typed model.
    #[error("Malformed {kind} record from LMS: {message}")]
    MalformedRecord {
        /// Record kind.
        kind: String,
        /// What was wrong with it.
        message: String,
    },

    // ========================================================================
    // Allocation Errors
    // ========================================================================
    /// Allocation attempted with no facilitators.
    #[error("No facilitators in course\n\nSuggestion: Promote a staff member to facilitator before allocating")]
    NoFacilitators,

    /// A section with the same name (ignoring case) already exists.
    #[error("Section name \"{name}\" already exists in the course")]
    DuplicateSectionName {
        /// The colliding name.
        name: String,
    },

    /// The LMS refused to create a section.
    #[error("Failed to create section \"{name}\": {message}")]
    SectionCreateFailed {
        /// The requested name.
        name: String,
        /// Underlying error message.
        message: String,
    },

    // ========================================================================
    // Move Errors
    // ========================================================================
    /// No active Student enrollment in the source section.
    #[error("No active student enrollment for user {student} in {}", describe_section(.section))]
    EnrollmentNotFound {
        /// The student.
        student: UserId,
        /// The section the enrollment was expected in, if one was given.
        section: Option<SectionId>,
    },

    /// Creating the target enrollment failed; nothing was changed.
    #[error("Failed to enroll user {student} in section {section}: {message}")]
    CreateFailed {
        /// The student.
        student: UserId,
        /// The target section.
        section: SectionId,
        /// Underlying error message.
        message: String,
    },

    /// Deleting the original enrollment failed.
    #[error("Failed to remove enrollment {enrollment} of user {student}: {message} ({})", rollback_note(.compensated))]
    DeleteFailed {
        /// The student.
        student: UserId,
        /// The original enrollment that could not be deleted.
        enrollment: EnrollmentId,
        /// Whether the new enrollment was removed again.
        compensated: bool,
        /// Underlying error message.
        message: String,
    },

    // ========================================================================
    // General Errors
    // ========================================================================
    /// General I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

fn describe_section(section: &Option<SectionId>) -> String {
    section.map_or_else(|| "any section".to_string(), |id| format!("section {id}"))
}

const fn rollback_note(compensated: &bool) -> &'static str {
    if *compensated {
        "new enrollment rolled back"
    } else {
        "rollback also failed; student is enrolled twice"
    }
}

impl SectionwiseError {
    /// Creates a new `ConfigParseError` with the given path and message.
    #[must_use]
    pub fn config_parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::ConfigParseError {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a new `ConfigurationError` with the given message and suggestion.
    #[must_use]
    pub fn configuration(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::ConfigurationError {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Creates a new `InvalidRequest` error.
    #[must_use]
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    /// Maps a gateway error raised during `operation`.
    #[must_use]
    pub fn upstream(operation: impl Into<String>, err: LmsError) -> Self {
        match err {
            LmsError::Malformed { kind, message } => Self::MalformedRecord {
                kind: kind.to_string(),
                message,
            },
            LmsError::InvalidUrl(url) => Self::configuration(
                format!("endpoint '{url}' is not a valid http(s) URL"),
                "Set endpointUrl in sectionwise.json or SECTIONWISE_ENDPOINT to the LMS base URL",
            ),
            other => Self::UpstreamUnavailable {
                operation: operation.into(),
                status: other.status(),
                message: other.to_string(),
            },
        }
    }

    /// Creates a new `DuplicateSectionName` error.
    #[must_use]
    pub fn duplicate_section(name: impl Into<String>) -> Self {
        Self::DuplicateSectionName { name: name.into() }
    }

    /// Returns a stable snake_case tag for this error.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::ConfigParseError { .. } => "config_parse",
            Self::ConfigurationError { .. } => "configuration",
            Self::InvalidRequest(_) => "invalid_request",
            Self::UpstreamUnavailable { .. } => "upstream_unavailable",
            Self::MalformedRecord { .. } => "malformed_record",
            Self::NoFacilitators => "no_facilitators",
            Self::DuplicateSectionName { .. } => "duplicate_section_name",
            Self::SectionCreateFailed { .. } => "section_create_failed",
            Self::EnrollmentNotFound { .. } => "enrollment_not_found",
            Self::CreateFailed { .. } => "create_failed",
            Self::DeleteFailed { .. } => "delete_failed",
            Self::Io(_) => "io",
            Self::Json(_) => "json",
        }
    }

    /// Returns the identifier of the offending entity, if there is one.
    #[must_use]
    pub fn entity_id(&self) -> Option<String> {
        match self {
            Self::DuplicateSectionName { name } | Self::SectionCreateFailed { name, .. } => {
                Some(name.clone())
            }
            Self::EnrollmentNotFound { student, .. } | Self::CreateFailed { student, .. } => {
                Some(student.to_string())
            }
            Self::DeleteFailed { enrollment, .. } => Some(enrollment.to_string()),
            _ => None,
        }
    }

    /// Returns `true` if this error concerns one item of a bulk operation
    /// and must not abort its siblings.
    #[must_use]
    pub const fn is_per_item(&self) -> bool {
        matches!(
            self,
            Self::DuplicateSectionName { .. }
                | Self::SectionCreateFailed { .. }
                | Self::EnrollmentNotFound { .. }
                | Self::CreateFailed { .. }
                | Self::DeleteFailed { .. }
        )
    }

    /// Returns `true` if this error is raised before any LMS call is made.
    #[must_use]
    pub const fn is_precondition(&self) -> bool {
        matches!(
            self,
            Self::ConfigParseError { .. }
                | Self::ConfigurationError { .. }
                | Self::InvalidRequest(_)
                | Self::NoFacilitators
        )
    }
}
