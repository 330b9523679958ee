//! Sectionwise LMS Gateway
//!
//! Thin request/response mapping to a Canvas-style LMS REST surface.
//!
//! This crate owns the typed records the rest of Sectionwise works with
//! ([`Enrollment`], [`Section`], [`Post`]), the [`LmsGateway`] trait, and the
//! [`CanvasClient`] implementation. Wire payloads are validated at this
//! boundary: a record that cannot be mapped onto a typed variant is rejected
//! with [`LmsError::Malformed`] instead of leaking into the engine.

mod canvas;
mod gateway;
#[cfg(any(test, feature = "test-support"))]
pub mod memory;
mod wire;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use canvas::CanvasClient;
pub use gateway::LmsGateway;

// ============================================================================
// Errors
// ============================================================================

/// Errors returned by an [`LmsGateway`].
#[derive(Debug, Error)]
pub enum LmsError {
    /// The request never produced an HTTP response (DNS, TLS, timeout, ...).
    #[error("network error: {0}")]
    Network(String),

    /// The LMS answered with a non-success status.
    #[error("LMS returned HTTP {status}: {body}")]
    Http {
        /// HTTP status code.
        status: u16,
        /// Response body, as text.
        body: String,
    },

    /// The LMS returned a record that does not fit the typed model.
    #[error("malformed {kind} record: {message}")]
    Malformed {
        /// Record kind (e.g. "enrollment", "section").
        kind: &'static str,
        /// What was wrong with it.
        message: String,
    },

    /// The configured endpoint is not a usable URL.
    #[error("invalid LMS endpoint '{0}'")]
    InvalidUrl(String),
}

impl LmsError {
    /// Creates a new `Malformed` error.
    #[must_use]
    pub fn malformed(kind: &'static str, message: impl Into<String>) -> Self {
        Self::Malformed {
            kind,
            message: message.into(),
        }
    }

    /// Returns the HTTP status, if the LMS produced one.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Returns `true` if the LMS rejected the write because the enrollment
    /// already exists.
    #[must_use]
    pub fn is_duplicate_enrollment(&self) -> bool {
        match self {
            Self::Http { body, .. } => {
                let body = body.to_lowercase();
                body.contains("already enrolled") || body.contains("duplicate")
            }
            _ => false,
        }
    }
}

// ============================================================================
// Identifiers
// ============================================================================

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                Self(value)
            }
        }
    };
}

id_type!(
    /// LMS course identifier.
    CourseId
);
id_type!(
    /// LMS user identifier.
    UserId
);
id_type!(
    /// LMS section identifier.
    SectionId
);
id_type!(
    /// LMS enrollment record identifier.
    EnrollmentId
);
id_type!(
    /// LMS discussion topic identifier.
    PostId
);

// ============================================================================
// Records
// ============================================================================

/// Course role carried by an enrollment record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Enrolled learner.
    Student,
    /// Teacher; the role facilitators hold.
    Teacher,
    /// Teaching assistant.
    Ta,
    /// Course designer; LIC candidates hold this role.
    Designer,
    /// Read-only observer.
    Observer,
}

impl Role {
    /// Every role, in the order the LMS lists them.
    pub const ALL: [Self; 5] = [
        Self::Student,
        Self::Teacher,
        Self::Ta,
        Self::Designer,
        Self::Observer,
    ];

    /// Parses the LMS enrollment `type` (e.g. `"TeacherEnrollment"`).
    #[must_use]
    pub fn from_enrollment_type(value: &str) -> Option<Self> {
        match value {
            "StudentEnrollment" => Some(Self::Student),
            "TeacherEnrollment" => Some(Self::Teacher),
            "TaEnrollment" => Some(Self::Ta),
            "DesignerEnrollment" => Some(Self::Designer),
            "ObserverEnrollment" => Some(Self::Observer),
            _ => None,
        }
    }

    /// Returns the LMS enrollment `type` for this role.
    #[must_use]
    pub const fn enrollment_type(self) -> &'static str {
        match self {
            Self::Student => "StudentEnrollment",
            Self::Teacher => "TeacherEnrollment",
            Self::Ta => "TaEnrollment",
            Self::Designer => "DesignerEnrollment",
            Self::Observer => "ObserverEnrollment",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Student => write!(f, "Student"),
            Self::Teacher => write!(f, "Teacher"),
            Self::Ta => write!(f, "TA"),
            Self::Designer => write!(f, "Designer"),
            Self::Observer => write!(f, "Observer"),
        }
    }
}

/// Lifecycle state of an enrollment record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrollmentState {
    /// Enrollment is live.
    #[default]
    Active,
    /// Invited or still being created.
    Pending,
    /// Enrollment exists but grants no access.
    Inactive,
    /// Course concluded for this user.
    Completed,
    /// Removed or rejected.
    Deleted,
}

impl EnrollmentState {
    /// Parses the LMS `enrollment_state` value.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "active" => Some(Self::Active),
            "invited" | "creation_pending" => Some(Self::Pending),
            "inactive" => Some(Self::Inactive),
            "completed" => Some(Self::Completed),
            "deleted" | "rejected" => Some(Self::Deleted),
            _ => None,
        }
    }

    /// Returns the LMS `enrollment_state` value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Pending => "invited",
            Self::Inactive => "inactive",
            Self::Completed => "completed",
            Self::Deleted => "deleted",
        }
    }
}

/// A course.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Course {
    /// Course identifier.
    pub id: CourseId,
    /// Course name.
    pub name: String,
    /// Short course code, if the LMS has one.
    pub course_code: Option<String>,
}

/// Identity of an LMS user as embedded in enrollment records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// User identifier.
    pub id: UserId,
    /// Display name.
    pub name: String,
    /// Email address, when the LMS exposes it.
    pub email: Option<String>,
    /// Institutional login id.
    pub login_id: Option<String>,
}

impl User {
    /// Creates a user with only an id and a name.
    #[must_use]
    pub fn new(id: impl Into<UserId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            email: None,
            login_id: None,
        }
    }

    /// Sets the email address.
    #[must_use]
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// Sets the login id.
    #[must_use]
    pub fn with_login_id(mut self, login_id: impl Into<String>) -> Self {
        self.login_id = Some(login_id.into());
        self
    }
}

/// One enrollment record: a user holding a role in a course section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Enrollment {
    /// Enrollment record identifier.
    pub id: EnrollmentId,
    /// The enrolled user.
    pub user: User,
    /// Role granted by this record.
    pub role: Role,
    /// Lifecycle state.
    pub state: EnrollmentState,
    /// Section the enrollment belongs to.
    pub section_id: Option<SectionId>,
    /// When the enrollment was created.
    pub created_at: DateTime<Utc>,
}

impl Enrollment {
    /// Returns whether the enrollment is active.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state == EnrollmentState::Active
    }
}

/// A course section as the LMS reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Section {
    /// Section identifier.
    pub id: SectionId,
    /// Section name.
    pub name: String,
    /// External (SIS) identifier.
    pub sis_section_id: Option<String>,
    /// Creation time, when reported.
    pub created_at: Option<DateTime<Utc>>,
}

/// A discussion topic / announcement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    /// Topic identifier.
    pub id: PostId,
    /// Topic title.
    pub title: String,
    /// Topic body (HTML).
    pub message: String,
    /// Author display name.
    pub author_name: Option<String>,
    /// When the topic was posted.
    pub posted_at: Option<DateTime<Utc>>,
}

// ============================================================================
// Requests
// ============================================================================

/// Filter for [`LmsGateway::list_enrollments`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnrollmentQuery {
    /// Roles to include; empty means all roles.
    pub roles: Vec<Role>,
    /// Restrict to a single user.
    pub user_id: Option<UserId>,
}

impl EnrollmentQuery {
    /// Query for every role the classifier cares about.
    #[must_use]
    pub fn all_roles() -> Self {
        Self {
            roles: Role::ALL.to_vec(),
            user_id: None,
        }
    }

    /// Query for every enrollment held by one user.
    #[must_use]
    pub fn for_user(user_id: UserId) -> Self {
        Self {
            roles: Vec::new(),
            user_id: Some(user_id),
        }
    }

    /// Returns whether an enrollment passes this filter.
    #[must_use]
    pub fn matches(&self, enrollment: &Enrollment) -> bool {
        (self.roles.is_empty() || self.roles.contains(&enrollment.role))
            && self.user_id.map_or(true, |id| enrollment.user.id == id)
    }
}

/// Request to create a section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSection {
    /// Section name.
    pub name: String,
    /// External identifier marking provenance.
    pub sis_section_id: Option<String>,
}

/// Request to create an enrollment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEnrollment {
    /// User to enroll.
    pub user_id: UserId,
    /// Target section; `None` enrolls into the course default section.
    pub section_id: Option<SectionId>,
    /// Role to grant.
    pub role: Role,
    /// Initial state.
    pub state: EnrollmentState,
    /// Restrict the user's privileges to the target section.
    pub limit_privileges_to_section: bool,
    /// Send the LMS notification email.
    pub notify: bool,
}

impl NewEnrollment {
    /// Creates an active, silent enrollment request.
    #[must_use]
    pub const fn active(user_id: UserId, section_id: Option<SectionId>, role: Role) -> Self {
        Self {
            user_id,
            section_id,
            role,
            state: EnrollmentState::Active,
            limit_privileges_to_section: false,
            notify: false,
        }
    }

    /// Restricts privileges to the target section.
    #[must_use]
    pub const fn section_limited(mut self) -> Self {
        self.limit_privileges_to_section = true;
        self
    }
}

/// Request to create a discussion post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPost {
    /// Topic title.
    pub title: String,
    /// Topic body (HTML).
    pub body: String,
    /// Keep the post unpublished.
    pub private: bool,
}

/// Filter for [`LmsGateway::list_discussion_posts`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PostQuery {
    /// Only return announcements.
    pub only_announcements: bool,
}
