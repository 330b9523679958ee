//! Allocation of unmanaged students into facilitator sections.
//!
//! Planning is pure: students outside tool-created sections are split into
//! contiguous slices of `ceil(n / f)`, one per facilitator, and each slice is
//! given a lettered section name. Committing walks the plan in order,
//! creating sections, moving students and granting facilitators. Failures of
//! one facilitator or one student never abort the others.

use sectionwise_audit::AuditRecord;
use sectionwise_lms::{LmsGateway, NewEnrollment, Role, SectionId, UserId};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, instrument, warn};

use crate::error::{Result, SectionwiseError};
use crate::roster::{Facilitator, Student, TOOL_SECTION_BASE};
use crate::session::{CourseSession, SectionNames};
use crate::transfer::{MoveMode, MoveRequest};

/// Naming scheme of allocated sections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionNaming {
    /// Text before the letter.
    pub base: String,
}

impl Default for SectionNaming {
    fn default() -> Self {
        Self {
            base: TOOL_SECTION_BASE.to_string(),
        }
    }
}

impl SectionNaming {
    /// Returns the letter for a 0-based index: `A`..`Z`, then `AA`, `AB`, ...
    #[must_use]
    pub fn letter(index: usize) -> String {
        let mut n = index + 1;
        let mut letters = Vec::new();
        while n > 0 {
            n -= 1;
            let offset = u8::try_from(n % 26).unwrap_or_default();
            letters.push(char::from(b'A' + offset));
            n /= 26;
        }
        letters.iter().rev().collect()
    }

    /// Returns the section name for a 0-based index.
    #[must_use]
    pub fn name(&self, index: usize) -> String {
        format!("{}{}", self.base, Self::letter(index))
    }
}

/// The facilitator a planned section belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedFacilitator {
    /// User id.
    pub id: UserId,
    /// Display name.
    pub name: String,
}

/// A student in a planned section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedStudent {
    /// User id.
    pub id: UserId,
    /// Display name.
    pub name: String,
    /// Section the student is in now.
    pub current_section: Option<SectionId>,
}

/// One section of a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedSection {
    /// Owning facilitator.
    pub facilitator: PlannedFacilitator,
    /// Name the section will be created with.
    pub section_name: String,
    /// Name followed by the facilitator.
    pub display_name: String,
    /// Students to move in.
    pub students: Vec<PlannedStudent>,
}

/// A proposed allocation. Nothing is written until it is committed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocationPlan {
    /// Students the plan covers.
    pub total_students: usize,
    /// Slice size, `ceil(students / facilitators)`.
    pub per_section: usize,
    /// Sections in commit order.
    pub sections: Vec<PlannedSection>,
}

impl AllocationPlan {
    /// Returns `true` if there is nothing to commit.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }
}

/// Splits the unmanaged students across the facilitators.
///
/// # Errors
///
/// Returns `SectionwiseError::NoFacilitators` when `facilitators` is empty,
/// even if there is nobody to allocate.
pub fn plan_allocation(
    students: &[Student],
    facilitators: &[Facilitator],
    naming: &SectionNaming,
) -> Result<AllocationPlan> {
    if facilitators.is_empty() {
        return Err(SectionwiseError::NoFacilitators);
    }

    let unmanaged: Vec<&Student> = students.iter().filter(|s| !s.managed).collect();
    if unmanaged.is_empty() {
        return Ok(AllocationPlan::default());
    }

    let per_section = unmanaged.len().div_ceil(facilitators.len());
    let sections = facilitators
        .iter()
        .zip(unmanaged.chunks(per_section))
        .enumerate()
        .map(|(index, (facilitator, slice))| {
            let section_name = naming.name(index);
            PlannedSection {
                facilitator: PlannedFacilitator {
                    id: facilitator.id,
                    name: facilitator.name.clone(),
                },
                display_name: format!("{section_name} - {}", facilitator.name),
                section_name,
                students: slice
                    .iter()
                    .map(|s| PlannedStudent {
                        id: s.id,
                        name: s.name.clone(),
                        current_section: s.section_id,
                    })
                    .collect(),
            }
        })
        .collect();

    Ok(AllocationPlan {
        total_students: unmanaged.len(),
        per_section,
        sections,
    })
}

/// How bad an allocation failure is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureLevel {
    /// Students were not allocated.
    Error,
    /// Students were allocated but a follow-up step failed.
    Warning,
}

/// One failure during commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocationFailure {
    /// Facilitator of the affected section.
    pub facilitator: PlannedFacilitator,
    /// Name of the affected section.
    pub section: String,
    /// Affected student, for per-student failures.
    pub student: Option<UserId>,
    /// Error tag.
    pub kind: String,
    /// Severity.
    pub level: FailureLevel,
    /// Human-readable message.
    pub message: String,
}

/// Result of committing a plan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocationOutcome {
    /// Students the plan covered.
    pub total_students: usize,
    /// Students moved into their new section.
    pub allocated: usize,
    /// Students left where they were.
    pub failed: usize,
    /// Sections created.
    pub sections_created: usize,
    /// Names of the created sections.
    pub created_sections: Vec<String>,
    /// Every failure, in commit order.
    pub errors: Vec<AllocationFailure>,
}

impl AllocationOutcome {
    /// Returns `true` if every student was allocated into at least one new
    /// section.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.failed == 0 && self.sections_created > 0
    }

    fn fail(
        &mut self,
        planned: &PlannedSection,
        student: Option<UserId>,
        level: FailureLevel,
        err: &SectionwiseError,
    ) {
        self.errors.push(AllocationFailure {
            facilitator: planned.facilitator.clone(),
            section: planned.section_name.clone(),
            student,
            kind: err.kind().to_string(),
            level,
            message: err.to_string(),
        });
    }

    fn audit_record(&self) -> AuditRecord {
        AuditRecord::new(
            "Auto-Allocation Completed",
            format!(
                "Auto-allocated {} students across {} sections",
                self.allocated, self.sections_created
            ),
        )
        .with_metadata(json!({
            "totalStudents": self.total_students,
            "allocated": self.allocated,
            "failed": self.failed,
            "sectionsCreated": self.sections_created,
            "createdSections": self.created_sections,
        }))
        .with_errors(
            self.errors
                .iter()
                .map(|e| match e.student {
                    Some(student) => format!("{}: student {student}: {}", e.section, e.message),
                    None => format!("{}: {}", e.section, e.message),
                })
                .collect(),
        )
    }
}

impl<G: LmsGateway> CourseSession<G> {
    /// Commits a plan, facilitator by facilitator.
    ///
    /// # Errors
    ///
    /// Only a failure to list the existing sections aborts the commit.
    /// Everything else is reported in the outcome.
    #[instrument(skip(self, plan), fields(course = %self.course(), sections = plan.sections.len()))]
    pub async fn commit_allocation(&self, plan: &AllocationPlan) -> Result<AllocationOutcome> {
        let mut outcome = AllocationOutcome {
            total_students: plan.total_students,
            ..AllocationOutcome::default()
        };
        if plan.is_empty() {
            return Ok(outcome);
        }

        let mut existing = SectionNames::from_sections(&self.list_sections().await?);

        for planned in &plan.sections {
            let section = match self
                .create_named_section(&planned.section_name, &mut existing)
                .await
            {
                Ok(section) => section,
                Err(e) => {
                    warn!(section = %planned.section_name, error = %e, "Skipping facilitator");
                    outcome.failed += planned.students.len();
                    outcome.fail(planned, None, FailureLevel::Error, &e);
                    continue;
                }
            };
            outcome.sections_created += 1;
            outcome.created_sections.push(section.name.clone());

            for student in &planned.students {
                let request = MoveRequest::new(student.id, student.current_section, section.id);
                match self.transfer(&request, MoveMode::Bulk).await {
                    Ok(_) => outcome.allocated += 1,
                    Err(e) => {
                        outcome.failed += 1;
                        outcome.fail(planned, Some(student.id), FailureLevel::Error, &e);
                    }
                }
            }

            let grant = NewEnrollment::active(planned.facilitator.id, Some(section.id), Role::Teacher)
                .section_limited();
            if let Err(e) = self.gateway().create_enrollment(self.course(), &grant).await {
                let e = SectionwiseError::upstream("grant facilitator", e);
                warn!(facilitator = %planned.facilitator.id, error = %e, "Facilitator not granted");
                outcome.fail(planned, None, FailureLevel::Warning, &e);
            }
        }

        info!(
            allocated = outcome.allocated,
            failed = outcome.failed,
            sections_created = outcome.sections_created,
            "Allocation committed"
        );
        self.record(outcome.audit_record()).await;
        Ok(outcome)
    }

    /// Syncs, plans with the default naming and commits in one go.
    pub async fn auto_allocate(&self) -> Result<AllocationOutcome> {
        let roster = self.sync().await?;
        let plan = plan_allocation(
            &roster.students,
            &roster.facilitators,
            &SectionNaming::default(),
        )?;
        self.commit_allocation(&plan).await
    }
}
