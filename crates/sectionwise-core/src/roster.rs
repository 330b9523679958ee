//! Roster classification.
//!
//! Turns the raw enrollment records of a course into students, facilitators,
//! LIC candidates and other staff, and decides which sections were created by
//! Sectionwise. Classification is a pure function of its inputs; the LMS is
//! the only source of truth and every pass starts from scratch.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use indexmap::IndexMap;
use sectionwise_lms::{Enrollment, EnrollmentId, Role, Section, SectionId, User, UserId};
use serde::{Deserialize, Serialize};

/// Name prefix of the sections Sectionwise creates.
pub const TOOL_SECTION_BASE: &str = "Tutorial Group ";

/// Who created a section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    /// Created by Sectionwise; its students count as managed.
    Tool,
    /// Created by anyone else (SIS import, manual).
    External,
}

/// Determines a section's provenance.
///
/// The SIS id prefix is checked first, then the generated name pattern:
/// the base name followed by uppercase letters (`A`, `Z`, `AA`, ...). Nothing else is consulted, so the result only changes when the
/// section itself changes.
#[must_use]
pub fn section_provenance(section: &Section, section_id_prefix: &str) -> Provenance {
    let by_sis_id = section
        .sis_section_id
        .as_deref()
        .is_some_and(|sis| sis.starts_with(section_id_prefix));
    if by_sis_id || is_tool_section_name(&section.name) {
        Provenance::Tool
    } else {
        Provenance::External
    }
}

fn is_tool_section_name(name: &str) -> bool {
    let Some(rest) = name.strip_prefix(TOOL_SECTION_BASE) else {
        return false;
    };
    !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_uppercase())
}

/// Tunables of a classification pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterSettings {
    /// SIS id prefix that marks tool-created sections.
    pub section_id_prefix: String,
    /// Domain used to synthesize missing email addresses.
    pub email_domain: String,
    /// Window in which an enrollment counts as new.
    pub new_enrollment_window: Duration,
    /// Students per facilitator.
    pub facilitator_capacity: usize,
}

impl Default for RosterSettings {
    fn default() -> Self {
        Self {
            section_id_prefix: "SM_".to_string(),
            email_domain: "acu.edu.au".to_string(),
            new_enrollment_window: Duration::days(7),
            facilitator_capacity: 25,
        }
    }
}

/// A learner, projected from one active Student enrollment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    /// User id.
    pub id: UserId,
    /// Display name.
    pub name: String,
    /// Email, synthesized when the LMS has none.
    pub email: String,
    /// When the enrollment was created.
    pub enrolled_at: DateTime<Utc>,
    /// Enrolled within the new-enrollment window.
    pub is_new: bool,
    /// Current section, if any.
    pub section_id: Option<SectionId>,
    /// The enrollment record this view was built from.
    pub enrollment_id: EnrollmentId,
    /// The current section is tool-created.
    pub managed: bool,
}

/// A user holding an active Teacher enrollment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Facilitator {
    /// User id.
    pub id: UserId,
    /// Display name.
    pub name: String,
    /// Email, synthesized when the LMS has none.
    pub email: String,
    /// Students this facilitator takes.
    pub capacity: usize,
    /// Every role the user holds, in first-seen order.
    pub roles: Vec<Role>,
    /// Holds more than one role.
    pub is_multi_role: bool,
    /// First Teacher enrollment of the user.
    pub enrollment_id: EnrollmentId,
}

/// A non-facilitator staff member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StaffMember {
    /// User id.
    pub id: UserId,
    /// Display name.
    pub name: String,
    /// Email, synthesized when the LMS has none.
    pub email: String,
    /// Every role the user holds, in first-seen order.
    pub roles: Vec<Role>,
    /// Holds a role that qualifies for promotion to facilitator.
    #[serde(rename = "canBePromotedToOF")]
    pub can_be_promoted: bool,
}

/// A course section as shown to the operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionView {
    /// Section id.
    pub id: SectionId,
    /// Section name.
    pub name: String,
    /// Name plus the teacher enrolled in it, when there is one.
    pub display_name: String,
    /// Who created the section.
    pub provenance: Provenance,
    /// Active Student enrollments in the section.
    pub student_count: usize,
    /// Shown on the dashboard.
    pub visible: bool,
    /// External identifier.
    pub sis_section_id: Option<String>,
}

/// Result of a classification pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Roster {
    /// One entry per student user.
    pub students: Vec<Student>,
    /// Teacher holders, in input order.
    pub facilitators: Vec<Facilitator>,
    /// Designer holders without a Teacher role.
    pub lic_candidates: Vec<StaffMember>,
    /// The first LIC candidate.
    pub lic: Option<StaffMember>,
    /// Everyone else.
    pub other_staff: Vec<StaffMember>,
    /// Every section with its provenance.
    pub sections: Vec<SectionView>,
}

impl Roster {
    /// Returns `true` if at least one facilitator was found.
    #[must_use]
    pub fn has_facilitators(&self) -> bool {
        !self.facilitators.is_empty()
    }

    /// Students outside tool-created sections, in roster order.
    pub fn unmanaged_students(&self) -> impl Iterator<Item = &Student> {
        self.students.iter().filter(|s| !s.managed)
    }

    /// Students enrolled within the new-enrollment window.
    pub fn new_students(&self) -> impl Iterator<Item = &Student> {
        self.students.iter().filter(|s| s.is_new)
    }

    /// Looks up a section by id.
    #[must_use]
    pub fn section(&self, id: SectionId) -> Option<&SectionView> {
        self.sections.iter().find(|s| s.id == id)
    }
}

struct UserGroup<'a> {
    user: &'a User,
    roles: Vec<Role>,
    enrollments: Vec<&'a Enrollment>,
}

impl UserGroup<'_> {
    fn holds(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }

    fn first(&self, role: Role) -> Option<&Enrollment> {
        self.enrollments.iter().copied().find(|e| e.role == role)
    }
}

/// Returns the user's email, falling back to `<login>@<domain>` and then to
/// `user-<id>@<domain>`.
#[must_use]
pub fn email_for(user: &User, email_domain: &str) -> String {
    if let Some(email) = user.email.as_deref().filter(|e| !e.trim().is_empty()) {
        return email.to_string();
    }
    user.login_id
        .as_deref()
        .filter(|l| !l.trim().is_empty())
        .map_or_else(
            || format!("user-{}@{email_domain}", user.id),
            |login| format!("{login}@{email_domain}"),
        )
}

/// Classifies the active enrollments of a course.
///
/// Inactive records are ignored. Never fails; a course without facilitators
/// yields an empty `facilitators` list.
#[must_use]
pub fn classify_roster(
    enrollments: &[Enrollment],
    sections: &[Section],
    settings: &RosterSettings,
    now: DateTime<Utc>,
) -> Roster {
    let provenance: HashMap<SectionId, Provenance> = sections
        .iter()
        .map(|s| (s.id, section_provenance(s, &settings.section_id_prefix)))
        .collect();
    let is_tool = |section: Option<SectionId>| {
        section.and_then(|id| provenance.get(&id).copied()) == Some(Provenance::Tool)
    };

    let mut groups: IndexMap<UserId, UserGroup<'_>> = IndexMap::new();
    for enrollment in enrollments.iter().filter(|e| e.is_active()) {
        let group = groups.entry(enrollment.user.id).or_insert_with(|| UserGroup {
            user: &enrollment.user,
            roles: Vec::new(),
            enrollments: Vec::new(),
        });
        if !group.roles.contains(&enrollment.role) {
            group.roles.push(enrollment.role);
        }
        group.enrollments.push(enrollment);
    }

    let mut roster = Roster::default();
    for group in groups.values() {
        let email = email_for(group.user, &settings.email_domain);

        if group.roles == [Role::Student] {
            let chosen = group
                .enrollments
                .iter()
                .copied()
                .find(|e| is_tool(e.section_id))
                .or_else(|| group.enrollments.first().copied());
            if let Some(enrollment) = chosen {
                roster.students.push(Student {
                    id: group.user.id,
                    name: group.user.name.clone(),
                    email,
                    enrolled_at: enrollment.created_at,
                    is_new: now.signed_duration_since(enrollment.created_at)
                        <= settings.new_enrollment_window,
                    section_id: enrollment.section_id,
                    enrollment_id: enrollment.id,
                    managed: is_tool(enrollment.section_id),
                });
            }
            continue;
        }

        if let Some(teacher) = group.first(Role::Teacher) {
            roster.facilitators.push(Facilitator {
                id: group.user.id,
                name: group.user.name.clone(),
                email,
                capacity: settings.facilitator_capacity,
                is_multi_role: group.roles.len() > 1,
                roles: group.roles.clone(),
                enrollment_id: teacher.id,
            });
            continue;
        }

        let member = StaffMember {
            id: group.user.id,
            name: group.user.name.clone(),
            email,
            roles: group.roles.clone(),
            can_be_promoted: group
                .roles
                .iter()
                .any(|r| matches!(r, Role::Teacher | Role::Ta | Role::Designer)),
        };
        if group.holds(Role::Designer) {
            roster.lic_candidates.push(member);
        } else {
            roster.other_staff.push(member);
        }
    }
    roster.lic = roster.lic_candidates.first().cloned();

    roster.sections = sections
        .iter()
        .map(|section| section_view(section, enrollments, &provenance))
        .collect();

    roster
}

fn section_view(
    section: &Section,
    enrollments: &[Enrollment],
    provenance: &HashMap<SectionId, Provenance>,
) -> SectionView {
    let in_section = || {
        enrollments
            .iter()
            .filter(|e| e.is_active() && e.section_id == Some(section.id))
    };
    let student_count = in_section().filter(|e| e.role == Role::Student).count();
    let display_name = in_section()
        .find(|e| e.role == Role::Teacher)
        .map_or_else(
            || section.name.clone(),
            |teacher| format!("{} - {}", section.name, teacher.user.name),
        );

    SectionView {
        id: section.id,
        name: section.name.clone(),
        display_name,
        provenance: provenance
            .get(&section.id)
            .copied()
            .unwrap_or(Provenance::External),
        student_count,
        visible: true,
        sis_section_id: section.sis_section_id.clone(),
    }
}
