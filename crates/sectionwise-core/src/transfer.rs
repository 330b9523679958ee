//! Moving one student between sections.
//!
//! The LMS has no transactions, so a move is create-then-delete: the student
//! is enrolled in the target section first and the old enrollment removed
//! afterwards. When the removal fails the new enrollment is removed again so
//! the student is not left in both sections.

use sectionwise_audit::AuditRecord;
use sectionwise_lms::{
    Enrollment, EnrollmentId, EnrollmentQuery, LmsGateway, NewEnrollment, Role, SectionId, UserId,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info, instrument, warn};

use crate::error::{Result, SectionwiseError};
use crate::session::CourseSession;

/// Justification written when the operator gives none.
pub const NO_JUSTIFICATION: &str = "No justification provided";

/// A request to move one student.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveRequest {
    /// The student.
    pub student_id: UserId,
    /// Current section. When `None`, the student's only active Student
    /// enrollment is moved, wherever it is.
    #[serde(default)]
    pub from_section_id: Option<SectionId>,
    /// Target section.
    pub to_section_id: SectionId,
    /// Why the student is moved.
    #[serde(default)]
    pub justification: Option<String>,
}

impl MoveRequest {
    /// Creates a request without justification.
    #[must_use]
    pub const fn new(student_id: UserId, from: Option<SectionId>, to: SectionId) -> Self {
        Self {
            student_id,
            from_section_id: from,
            to_section_id: to,
            justification: None,
        }
    }

    /// Adds a justification.
    #[must_use]
    pub fn with_justification(mut self, justification: impl Into<String>) -> Self {
        self.justification = Some(justification.into());
        self
    }

    fn justification_or_default(&self) -> String {
        self.justification
            .as_deref()
            .map(str::trim)
            .filter(|j| !j.is_empty())
            .unwrap_or(NO_JUSTIFICATION)
            .to_string()
    }
}

/// Enrollment ids of a completed move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveOutcome {
    /// The removed enrollment.
    pub old_enrollment_id: EnrollmentId,
    /// The enrollment in the target section.
    pub new_enrollment_id: EnrollmentId,
}

/// Who is moving the student.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MoveMode {
    /// An operator moving one student; each move is audited.
    Interactive,
    /// Part of an allocation; the allocation summary is the audit entry.
    Bulk,
}

impl<G: LmsGateway> CourseSession<G> {
    /// Moves one student and records a `Student Moved` audit entry.
    ///
    /// # Errors
    ///
    /// - `EnrollmentNotFound` if the student has no active Student enrollment
    ///   in the source section; nothing was changed.
    /// - `InvalidRequest` if no source was given and the student has more
    ///   than one active Student enrollment, or if the enrollment found is
    ///   already in the target section.
    /// - `CreateFailed` if the target enrollment could not be created;
    ///   nothing was changed.
    /// - `DeleteFailed` if the old enrollment could not be removed; the flag
    ///   `compensated` tells whether the new enrollment was rolled back.
    pub async fn move_student(&self, request: &MoveRequest) -> Result<MoveOutcome> {
        if request.from_section_id == Some(request.to_section_id) {
            return Err(SectionwiseError::invalid_request(
                "source and target section are the same",
            ));
        }
        self.transfer(request, MoveMode::Interactive).await
    }

    #[instrument(
        skip(self, request),
        fields(student = %request.student_id, to = %request.to_section_id)
    )]
    pub(crate) async fn transfer(&self, request: &MoveRequest, mode: MoveMode) -> Result<MoveOutcome> {
        let (source, result) = match self.find_original(request).await {
            Ok(original) => (
                original.section_id,
                self.create_then_delete(request, &original).await,
            ),
            Err(e) => (request.from_section_id, Err(e)),
        };

        if mode == MoveMode::Interactive {
            self.record(move_record(request, source, &result)).await;
        }
        result
    }

    /// The enrollment a move replaces.
    async fn find_original(&self, request: &MoveRequest) -> Result<Enrollment> {
        let student = request.student_id;
        let query = EnrollmentQuery {
            roles: vec![Role::Student],
            user_id: Some(student),
        };
        let mut candidates: Vec<Enrollment> = self
            .gateway()
            .list_enrollments(self.course(), &query)
            .await
            .map_err(|e| SectionwiseError::upstream("find student enrollment", e))?
            .into_iter()
            .filter(|e| e.is_active() && e.role == Role::Student)
            .filter(|e| request.from_section_id.map_or(true, |from| e.section_id == Some(from)))
            .collect();

        let original = match candidates.len() {
            0 => {
                return Err(SectionwiseError::EnrollmentNotFound {
                    student,
                    section: request.from_section_id,
                })
            }
            1 => candidates.remove(0),
            n => {
                return Err(SectionwiseError::invalid_request(format!(
                    "student {student} has {n} active enrollments; give the source section"
                )))
            }
        };

        if original.section_id == Some(request.to_section_id) {
            return Err(SectionwiseError::invalid_request(
                "student is already in the target section",
            ));
        }
        Ok(original)
    }

    async fn create_then_delete(&self, request: &MoveRequest, original: &Enrollment) -> Result<MoveOutcome> {
        let student = request.student_id;
        let created = self
            .gateway()
            .create_enrollment(
                self.course(),
                &NewEnrollment::active(student, Some(request.to_section_id), Role::Student),
            )
            .await
            .map_err(|e| SectionwiseError::CreateFailed {
                student,
                section: request.to_section_id,
                message: e.to_string(),
            })?;

        if let Err(delete_error) = self
            .gateway()
            .delete_enrollment(self.course(), original.id)
            .await
        {
            warn!(
                enrollment = %original.id,
                error = %delete_error,
                "Failed to remove original enrollment, rolling back"
            );
            let compensated = match self.gateway().delete_enrollment(self.course(), created.id).await {
                Ok(()) => true,
                Err(e) => {
                    error!(
                        enrollment = %created.id,
                        error = %e,
                        "Rollback failed; student is enrolled in both sections"
                    );
                    false
                }
            };
            return Err(SectionwiseError::DeleteFailed {
                student,
                enrollment: original.id,
                compensated,
                message: delete_error.to_string(),
            });
        }

        info!(old = %original.id, new = %created.id, "Student moved");
        Ok(MoveOutcome {
            old_enrollment_id: original.id,
            new_enrollment_id: created.id,
        })
    }
}

fn describe(section: Option<SectionId>) -> String {
    section.map_or_else(|| "unknown".to_string(), |id| id.to_string())
}

fn move_record(
    request: &MoveRequest,
    source: Option<SectionId>,
    result: &Result<MoveOutcome>,
) -> AuditRecord {
    let from = describe(source);
    let to = request.to_section_id;
    let justification = request.justification_or_default();

    match result {
        Ok(outcome) => AuditRecord::new(
            "Student Moved",
            format!("Student {} moved from section {from} to {to}", request.student_id),
        )
        .with_justification(justification)
        .with_metadata(json!({
            "studentId": request.student_id,
            "fromSectionId": source,
            "toSectionId": to,
            "oldEnrollmentId": outcome.old_enrollment_id,
            "newEnrollmentId": outcome.new_enrollment_id,
        })),
        Err(e) => AuditRecord::new(
            "Student Move Failed",
            format!(
                "Student {} could not be moved from section {from} to {to}",
                request.student_id
            ),
        )
        .with_justification(justification)
        .with_metadata(json!({
            "studentId": request.student_id,
            "fromSectionId": source,
            "toSectionId": to,
            "kind": e.kind(),
        }))
        .with_errors(vec![e.to_string()]),
    }
}
