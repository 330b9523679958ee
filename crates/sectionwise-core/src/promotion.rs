//! Promotion of a staff member to facilitator.

use sectionwise_audit::AuditRecord;
use sectionwise_lms::{EnrollmentId, EnrollmentQuery, LmsGateway, NewEnrollment, Role, UserId};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, instrument};

use crate::error::{Result, SectionwiseError};
use crate::session::CourseSession;

/// Who to promote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "target", content = "userId")]
pub enum PromotionTarget {
    /// The user the credential belongs to.
    CurrentUser,
    /// A specific user.
    User(UserId),
}

impl From<Option<UserId>> for PromotionTarget {
    fn from(user: Option<UserId>) -> Self {
        user.map_or(Self::CurrentUser, Self::User)
    }
}

/// Result of a promotion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromotionOutcome {
    /// The promoted user.
    pub user_id: UserId,
    /// The user already held an active Teacher enrollment; nothing changed.
    pub already_has_role: bool,
    /// The new Teacher enrollment.
    pub enrollment_id: Option<EnrollmentId>,
}

impl<G: LmsGateway> CourseSession<G> {
    /// Grants a course-wide Teacher enrollment. Promoting someone who is
    /// already a teacher succeeds with `already_has_role` set.
    #[instrument(skip(self), fields(course = %self.course()))]
    pub async fn promote(&self, target: PromotionTarget) -> Result<PromotionOutcome> {
        let user_id = match target {
            PromotionTarget::User(id) => id,
            PromotionTarget::CurrentUser => {
                self.gateway()
                    .current_user()
                    .await
                    .map_err(|e| SectionwiseError::upstream("fetch current user", e))?
                    .id
            }
        };

        let existing = self
            .gateway()
            .list_enrollments(self.course(), &EnrollmentQuery::for_user(user_id))
            .await
            .map_err(|e| SectionwiseError::upstream("list user enrollments", e))?;
        if existing
            .iter()
            .any(|e| e.role == Role::Teacher && e.is_active())
        {
            info!(user = %user_id, "Already a facilitator");
            return Ok(already_promoted(user_id));
        }

        let request = NewEnrollment::active(user_id, None, Role::Teacher);
        let enrollment = match self.gateway().create_enrollment(self.course(), &request).await {
            Ok(enrollment) => enrollment,
            Err(e) if e.is_duplicate_enrollment() => {
                info!(user = %user_id, "LMS reports an existing enrollment");
                return Ok(already_promoted(user_id));
            }
            Err(e) => return Err(SectionwiseError::upstream("promote to facilitator", e)),
        };

        info!(user = %user_id, enrollment = %enrollment.id, "Promoted to facilitator");
        self.record(
            AuditRecord::new(
                "Facilitator Promoted",
                format!(
                    "{} ({user_id}) promoted to facilitator",
                    enrollment.user.name
                ),
            )
            .with_metadata(json!({
                "userId": user_id,
                "enrollmentId": enrollment.id,
                "role": Role::Teacher.enrollment_type(),
            })),
        )
        .await;

        Ok(PromotionOutcome {
            user_id,
            already_has_role: false,
            enrollment_id: Some(enrollment.id),
        })
    }
}

const fn already_promoted(user_id: UserId) -> PromotionOutcome {
    PromotionOutcome {
        user_id,
        already_has_role: true,
        enrollment_id: None,
    }
}
