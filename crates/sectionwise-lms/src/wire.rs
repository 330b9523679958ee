//! Canvas wire payloads and their validation into typed records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    Course, CourseId, Enrollment, EnrollmentId, EnrollmentState, LmsError, NewEnrollment,
    NewPost, NewSection, Post, PostId, Role, Section, SectionId, User, UserId,
};

// ============================================================================
// Responses
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct WireCourse {
    pub id: u64,
    pub name: Option<String>,
    pub course_code: Option<String>,
}

impl TryFrom<WireCourse> for Course {
    type Error = LmsError;

    fn try_from(wire: WireCourse) -> Result<Self, Self::Error> {
        let name = wire
            .name
            .ok_or_else(|| LmsError::malformed("course", format!("course {} has no name", wire.id)))?;
        Ok(Self {
            id: CourseId(wire.id),
            name,
            course_code: wire.course_code,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct WireUser {
    pub id: u64,
    pub name: Option<String>,
    pub sortable_name: Option<String>,
    pub email: Option<String>,
    pub login_id: Option<String>,
}

impl TryFrom<WireUser> for User {
    type Error = LmsError;

    fn try_from(wire: WireUser) -> Result<Self, Self::Error> {
        let name = wire
            .name
            .or(wire.sortable_name)
            .ok_or_else(|| LmsError::malformed("user", format!("user {} has no name", wire.id)))?;
        Ok(Self {
            id: UserId(wire.id),
            name,
            email: wire.email.filter(|e| !e.trim().is_empty()),
            login_id: wire.login_id.filter(|l| !l.trim().is_empty()),
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct WireEnrollment {
    pub id: u64,
    pub user_id: u64,
    #[serde(rename = "type")]
    pub kind: String,
    pub enrollment_state: String,
    pub course_section_id: Option<u64>,
    pub created_at: Option<DateTime<Utc>>,
    pub user: Option<WireUser>,
}

impl TryFrom<WireEnrollment> for Enrollment {
    type Error = LmsError;

    fn try_from(wire: WireEnrollment) -> Result<Self, Self::Error> {
        let role = Role::from_enrollment_type(&wire.kind).ok_or_else(|| {
            LmsError::malformed(
                "enrollment",
                format!("enrollment {} has unknown type '{}'", wire.id, wire.kind),
            )
        })?;
        let state = EnrollmentState::parse(&wire.enrollment_state).ok_or_else(|| {
            LmsError::malformed(
                "enrollment",
                format!(
                    "enrollment {} has unknown state '{}'",
                    wire.id, wire.enrollment_state
                ),
            )
        })?;
        let created_at = wire.created_at.ok_or_else(|| {
            LmsError::malformed("enrollment", format!("enrollment {} has no created_at", wire.id))
        })?;
        let user: User = wire
            .user
            .ok_or_else(|| {
                LmsError::malformed("enrollment", format!("enrollment {} has no user", wire.id))
            })?
            .try_into()?;
        if user.id.0 != wire.user_id {
            return Err(LmsError::malformed(
                "enrollment",
                format!(
                    "enrollment {} names user {} but embeds user {}",
                    wire.id, wire.user_id, user.id
                ),
            ));
        }

        Ok(Self {
            id: EnrollmentId(wire.id),
            user,
            role,
            state,
            section_id: wire.course_section_id.map(SectionId),
            created_at,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct WireSection {
    pub id: u64,
    pub name: Option<String>,
    pub sis_section_id: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

impl TryFrom<WireSection> for Section {
    type Error = LmsError;

    fn try_from(wire: WireSection) -> Result<Self, Self::Error> {
        let name = wire
            .name
            .ok_or_else(|| LmsError::malformed("section", format!("section {} has no name", wire.id)))?;
        Ok(Self {
            id: SectionId(wire.id),
            name,
            sis_section_id: wire.sis_section_id,
            created_at: wire.created_at,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct WireAuthor {
    pub display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct WireTopic {
    pub id: u64,
    pub title: Option<String>,
    pub message: Option<String>,
    pub posted_at: Option<DateTime<Utc>>,
    pub author: Option<WireAuthor>,
}

impl From<WireTopic> for Post {
    fn from(wire: WireTopic) -> Self {
        Self {
            id: PostId(wire.id),
            title: wire.title.unwrap_or_default(),
            message: wire.message.unwrap_or_default(),
            author_name: wire.author.and_then(|a| a.display_name),
            posted_at: wire.posted_at,
        }
    }
}

/// Validates a list of wire records, rejecting the whole batch on the first
/// malformed record.
pub fn convert_all<W, T>(items: Vec<W>) -> Result<Vec<T>, LmsError>
where
    T: TryFrom<W, Error = LmsError>,
{
    items.into_iter().map(T::try_from).collect()
}

// ============================================================================
// Requests
// ============================================================================

#[derive(Debug, Serialize)]
pub struct CreateSectionBody<'a> {
    pub course_section: CreateSectionFields<'a>,
}

#[derive(Debug, Serialize)]
pub struct CreateSectionFields<'a> {
    pub name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sis_section_id: Option<&'a str>,
}

impl<'a> From<&'a NewSection> for CreateSectionBody<'a> {
    fn from(section: &'a NewSection) -> Self {
        Self {
            course_section: CreateSectionFields {
                name: &section.name,
                sis_section_id: section.sis_section_id.as_deref(),
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CreateEnrollmentBody {
    pub enrollment: CreateEnrollmentFields,
}

#[derive(Debug, Serialize)]
pub struct CreateEnrollmentFields {
    pub user_id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub course_section_id: Option<u64>,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub enrollment_state: &'static str,
    pub limit_privileges_to_course_section: bool,
    pub notify: bool,
}

impl From<&NewEnrollment> for CreateEnrollmentBody {
    fn from(enrollment: &NewEnrollment) -> Self {
        Self {
            enrollment: CreateEnrollmentFields {
                user_id: enrollment.user_id.0,
                course_section_id: enrollment.section_id.map(|id| id.0),
                kind: enrollment.role.enrollment_type(),
                enrollment_state: enrollment.state.as_str(),
                limit_privileges_to_course_section: enrollment.limit_privileges_to_section,
                notify: enrollment.notify,
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CreateTopicBody<'a> {
    pub title: &'a str,
    pub message: &'a str,
    pub is_announcement: bool,
    pub require_initial_post: bool,
    pub published: bool,
}

impl<'a> From<&'a NewPost> for CreateTopicBody<'a> {
    fn from(post: &'a NewPost) -> Self {
        Self {
            title: &post.title,
            message: &post.body,
            is_announcement: true,
            require_initial_post: false,
            published: !post.private,
        }
    }
}
