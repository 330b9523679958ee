//! Course session.
//!
//! A [`CourseSession`] binds one LMS gateway to one course together with the
//! configuration that tunes classification. Every engine operation is a
//! method on the session; the allocation, transfer, audit and promotion
//! modules each contribute their own `impl` block.

use std::collections::HashSet;

use chrono::{DateTime, SecondsFormat, Utc};
use sectionwise_audit::AuditRecord;
use sectionwise_lms::{
    CanvasClient, Course, CourseId, EnrollmentQuery, LmsGateway, NewSection, Section,
};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, instrument};

use crate::config::Config;
use crate::error::{Result, SectionwiseError};
use crate::roster::{
    classify_roster, Facilitator, Provenance, Roster, RosterSettings, SectionView, StaffMember,
    Student,
};

/// An LMS gateway bound to a course.
pub struct CourseSession<G> {
    gateway: G,
    course: CourseId,
    config: Config,
    settings: RosterSettings,
}

impl CourseSession<CanvasClient> {
    /// Opens a session against the Canvas endpoint named in `config`.
    ///
    /// # Errors
    ///
    /// Returns `SectionwiseError::ConfigurationError` if the endpoint,
    /// credential or course is missing or unusable. No network call is made.
    pub fn connect(config: Config) -> Result<Self> {
        let connection = config.connection()?;
        let client = CanvasClient::new(&connection.endpoint_url, connection.credential.expose())
            .map_err(|e| SectionwiseError::upstream("connect", e))?;
        Ok(Self::new(client, connection.course_id, config))
    }
}

impl<G: LmsGateway> CourseSession<G> {
    /// Creates a session for `course` over an existing gateway.
    #[must_use]
    pub fn new(gateway: G, course: CourseId, config: Config) -> Self {
        let settings = config.roster_settings();
        Self {
            gateway,
            course,
            config,
            settings,
        }
    }

    /// Returns the gateway.
    pub const fn gateway(&self) -> &G {
        &self.gateway
    }

    /// Returns the course this session manages.
    pub const fn course(&self) -> CourseId {
        self.course
    }

    /// Returns the configuration.
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the classifier settings.
    pub const fn settings(&self) -> &RosterSettings {
        &self.settings
    }

    /// Fetches the course, checking that endpoint and credential work.
    #[instrument(skip(self), fields(course = %self.course))]
    pub async fn test_connection(&self) -> Result<Course> {
        let course = self
            .gateway
            .get_course(self.course)
            .await
            .map_err(|e| SectionwiseError::upstream("fetch course", e))?;
        info!(name = %course.name, "Connected to course");
        Ok(course)
    }

    /// Fetches enrollments and sections and classifies them.
    #[instrument(skip(self), fields(course = %self.course))]
    pub async fn sync(&self) -> Result<Roster> {
        let query = EnrollmentQuery::all_roles();
        let (enrollments, sections) = tokio::try_join!(
            async {
                self.gateway
                    .list_enrollments(self.course, &query)
                    .await
                    .map_err(|e| SectionwiseError::upstream("list enrollments", e))
            },
            self.list_sections(),
        )?;

        let roster = classify_roster(&enrollments, &sections, &self.settings, Utc::now());
        debug!(
            students = roster.students.len(),
            facilitators = roster.facilitators.len(),
            sections = roster.sections.len(),
            "Roster synced"
        );
        Ok(roster)
    }

    /// Builds the dashboard overview of the course.
    #[instrument(skip(self), fields(course = %self.course))]
    pub async fn overview(&self) -> Result<CourseOverview> {
        let (course, roster) = tokio::try_join!(self.test_connection(), self.sync())?;
        Ok(CourseOverview::build(
            course,
            roster,
            &self.config,
            Utc::now(),
        ))
    }

    /// Creates a named section after checking for a duplicate name.
    #[instrument(skip(self), fields(course = %self.course))]
    pub async fn create_section(&self, name: &str) -> Result<Section> {
        let name = name.trim();
        if name.is_empty() {
            return Err(SectionwiseError::invalid_request("section name is required"));
        }

        let mut existing = SectionNames::from_sections(&self.list_sections().await?);
        let section = self.create_named_section(name, &mut existing).await?;

        self.record(
            AuditRecord::new(
                "Section Created",
                format!("Section \"{}\" created", section.name),
            )
            .with_metadata(json!({
                "sectionId": section.id,
                "sectionName": section.name,
                "sisSectionId": section.sis_section_id,
            })),
        )
        .await;
        Ok(section)
    }

    pub(crate) async fn list_sections(&self) -> Result<Vec<Section>> {
        self.gateway
            .list_sections(self.course)
            .await
            .map_err(|e| SectionwiseError::upstream("list sections", e))
    }

    /// Creates `name` unless it collides with `existing`, which is updated
    /// on success.
    pub(crate) async fn create_named_section(
        &self,
        name: &str,
        existing: &mut SectionNames,
    ) -> Result<Section> {
        if existing.contains(name) {
            return Err(SectionwiseError::duplicate_section(name));
        }

        let request = NewSection {
            name: name.to_string(),
            sis_section_id: Some(sis_section_id(
                &self.settings.section_id_prefix,
                name,
                Utc::now(),
            )),
        };
        let section = self
            .gateway
            .create_section(self.course, &request)
            .await
            .map_err(|e| SectionwiseError::SectionCreateFailed {
                name: name.to_string(),
                message: e.to_string(),
            })?;
        existing.insert(&section.name);
        info!(section = %section.id, name = %section.name, "Section created");
        Ok(section)
    }
}

/// Case-insensitive set of section names.
#[derive(Debug, Default)]
pub(crate) struct SectionNames(HashSet<String>);

impl SectionNames {
    pub(crate) fn from_sections(sections: &[Section]) -> Self {
        Self(sections.iter().map(|s| s.name.to_lowercase()).collect())
    }

    pub(crate) fn contains(&self, name: &str) -> bool {
        self.0.contains(&name.to_lowercase())
    }

    pub(crate) fn insert(&mut self, name: &str) {
        self.0.insert(name.to_lowercase());
    }
}

/// Builds the SIS id of a tool-created section: `<prefix><millis>_<name>`
/// with every non-alphanumeric character of the name replaced by `_`.
#[must_use]
pub fn sis_section_id(prefix: &str, name: &str, at: DateTime<Utc>) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("{prefix}{}_{sanitized}", at.timestamp_millis())
}

// ============================================================================
// Overview
// ============================================================================

/// Course headline numbers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OverviewStats {
    /// Students in the course.
    pub total_students: usize,
    /// Sections not created by Sectionwise.
    pub external_sections: usize,
    /// Sections created by Sectionwise.
    pub tool_sections: usize,
    /// Students outside tool-created sections.
    pub unassigned_students: usize,
    /// Facilitators detected.
    pub facilitators: usize,
    /// Students enrolled within the new-enrollment window.
    pub new_enrollments: usize,
    /// Sections needed at the configured capacity; 0 without facilitators.
    pub recommended_sections: usize,
    /// Informational census date.
    pub census_date: String,
}

/// A section with its facilitator ratio.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionSummary {
    /// The section.
    #[serde(flatten)]
    pub section: SectionView,
    /// Facilitator to student ratio, `1:n`.
    pub ratio: String,
}

/// Everything the dashboard shows about a course.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseOverview {
    /// The course.
    pub course: Course,
    /// Headline numbers.
    pub stats: OverviewStats,
    /// Every section.
    pub sections: Vec<SectionSummary>,
    /// Every student.
    pub students: Vec<Student>,
    /// Students outside tool-created sections.
    pub unassigned: Vec<Student>,
    /// Facilitators.
    pub facilitators: Vec<Facilitator>,
    /// LIC, if one was found.
    pub lic: Option<StaffMember>,
    /// Other staff.
    pub other_staff: Vec<StaffMember>,
    /// When the roster was fetched.
    pub synced_at: DateTime<Utc>,
}

impl CourseOverview {
    /// Derives the overview from a classified roster.
    #[must_use]
    pub fn build(course: Course, roster: Roster, config: &Config, now: DateTime<Utc>) -> Self {
        let total_students = roster.students.len();
        let tool_sections = roster
            .sections
            .iter()
            .filter(|s| s.provenance == Provenance::Tool)
            .count();
        let unassigned: Vec<Student> = roster.unmanaged_students().cloned().collect();
        let recommended_sections = if roster.has_facilitators() {
            total_students.div_ceil(config.facilitator_capacity.max(1))
        } else {
            0
        };

        let stats = OverviewStats {
            total_students,
            external_sections: roster.sections.len() - tool_sections,
            tool_sections,
            unassigned_students: unassigned.len(),
            facilitators: roster.facilitators.len(),
            new_enrollments: roster.new_students().count(),
            recommended_sections,
            census_date: (now + config.census_offset())
                .to_rfc3339_opts(SecondsFormat::Secs, true),
        };

        let sections = roster
            .sections
            .into_iter()
            .map(|section| SectionSummary {
                ratio: format!("1:{}", section.student_count),
                section,
            })
            .collect();

        Self {
            course,
            stats,
            sections,
            students: roster.students,
            unassigned,
            facilitators: roster.facilitators,
            lic: roster.lic,
            other_staff: roster.other_staff,
            synced_at: now,
        }
    }
}
