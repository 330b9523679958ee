//! Configuration types for Sectionwise.
//!
//! The configuration names the LMS endpoint, the operator's bearer credential
//! and the target course, plus the tunables of roster classification and
//! allocation. It is loaded from `sectionwise.json` and threaded explicitly
//! through [`CourseSession`](crate::CourseSession); nothing is global.

use std::fmt;
use std::path::Path;

use chrono::Duration;
use sectionwise_lms::CourseId;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SectionwiseError};
use crate::roster::RosterSettings;

/// The default config file name.
const CONFIG_FILE_NAME: &str = "sectionwise.json";

/// Default number of students a facilitator takes.
const fn default_facilitator_capacity() -> usize {
    25
}

/// Default window, in days, in which an enrollment counts as new.
const fn default_new_enrollment_window_days() -> u32 {
    7
}

/// Default domain for synthesized email addresses.
fn default_email_domain() -> String {
    "acu.edu.au".to_string()
}

/// Default SIS id prefix marking tool-created sections.
fn default_section_id_prefix() -> String {
    "SM_".to_string()
}

/// Default offset, in days, of the informational census date.
const fn default_census_offset_days() -> u32 {
    14
}

/// A bearer credential. Never printed.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    /// Wraps a credential.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the credential.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

/// Main configuration for Sectionwise.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// LMS base URL, e.g. `https://canvas.example.edu`.
    #[serde(default)]
    pub endpoint_url: Option<String>,

    /// Bearer token used verbatim for every LMS call.
    #[serde(default, skip_serializing)]
    pub credential: Option<Secret>,

    /// Target course.
    #[serde(default)]
    pub course_id: Option<u64>,

    /// Students per facilitator used for recommendations.
    #[serde(default = "default_facilitator_capacity")]
    pub facilitator_capacity: usize,

    /// Days within which an enrollment counts as new.
    #[serde(default = "default_new_enrollment_window_days")]
    pub new_enrollment_window_days: u32,

    /// Domain used to synthesize missing email addresses.
    #[serde(default = "default_email_domain")]
    pub email_domain: String,

    /// SIS id prefix that marks tool-created sections.
    #[serde(default = "default_section_id_prefix")]
    pub section_id_prefix: String,

    /// Days from now to the informational census date.
    #[serde(default = "default_census_offset_days")]
    pub census_offset_days: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint_url: None,
            credential: None,
            course_id: None,
            facilitator_capacity: default_facilitator_capacity(),
            new_enrollment_window_days: default_new_enrollment_window_days(),
            email_domain: default_email_domain(),
            section_id_prefix: default_section_id_prefix(),
            census_offset_days: default_census_offset_days(),
        }
    }
}

/// Validated connection parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    /// LMS base URL.
    pub endpoint_url: String,
    /// Bearer token.
    pub credential: Secret,
    /// Target course.
    pub course_id: CourseId,
}

impl Config {
    /// Loads configuration from the current working directory.
    ///
    /// Looks for `sectionwise.json` in the current directory; if it does not
    /// exist, returns the default configuration.
    pub fn load() -> Result<Self> {
        let current_dir = std::env::current_dir().map_err(|e| {
            SectionwiseError::config_parse(
                "<current directory>",
                format!("cannot determine current directory: {e}"),
            )
        })?;
        Self::load_from_dir(&current_dir)
    }

    /// Loads configuration from `sectionwise.json` in a specific directory.
    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        Self::load_from_file(&dir.join(CONFIG_FILE_NAME))
    }

    /// Loads configuration from a specific file path.
    ///
    /// A missing file yields the default configuration. Connection fields may
    /// still be absent afterwards; [`Config::connection`] checks them.
    ///
    /// # Errors
    ///
    /// Returns `SectionwiseError::ConfigParseError` if the file exists but
    /// cannot be read or parsed, and `SectionwiseError::ConfigurationError`
    /// if a tunable is out of range.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let config = Self::default();
                config.validate()?;
                return Ok(config);
            }
            Err(e) => {
                return Err(SectionwiseError::config_parse(
                    path,
                    format!("failed to read file: {e}"),
                ));
            }
        };

        let config: Self = serde_json::from_str(&contents)
            .map_err(|e| SectionwiseError::config_parse(path, e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Applies command-line or environment overrides.
    #[must_use]
    pub fn with_overrides(
        mut self,
        endpoint_url: Option<String>,
        credential: Option<String>,
        course_id: Option<u64>,
    ) -> Self {
        if let Some(endpoint_url) = endpoint_url {
            self.endpoint_url = Some(endpoint_url);
        }
        if let Some(credential) = credential {
            self.credential = Some(Secret::new(credential));
        }
        if let Some(course_id) = course_id {
            self.course_id = Some(course_id);
        }
        self
    }

    /// Validates the tunables.
    ///
    /// # Errors
    ///
    /// Returns `SectionwiseError::ConfigurationError` if any check fails.
    pub fn validate(&self) -> Result<()> {
        if self.facilitator_capacity == 0 {
            return Err(SectionwiseError::configuration(
                "facilitatorCapacity must be greater than 0",
                "Set facilitatorCapacity to at least 1 in your sectionwise.json",
            ));
        }

        if self.email_domain.trim().is_empty() {
            return Err(SectionwiseError::configuration(
                "emailDomain must not be empty",
                "Set emailDomain to your institution's domain in your sectionwise.json",
            ));
        }

        if self.section_id_prefix.trim().is_empty() {
            return Err(SectionwiseError::configuration(
                "sectionIdPrefix must not be empty",
                "Remove sectionIdPrefix from your sectionwise.json to use the default 'SM_'",
            ));
        }

        Ok(())
    }

    /// Checks that endpoint, credential and course are present and usable.
    ///
    /// Fails fast, before any network call.
    pub fn connection(&self) -> Result<Connection> {
        let endpoint_url = self
            .endpoint_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .ok_or_else(|| {
                SectionwiseError::configuration(
                    "endpointUrl is required",
                    "Set endpointUrl in sectionwise.json, SECTIONWISE_ENDPOINT, or pass --endpoint",
                )
            })?;
        if !(endpoint_url.starts_with("https://") || endpoint_url.starts_with("http://")) {
            return Err(SectionwiseError::configuration(
                format!("endpointUrl '{endpoint_url}' must start with http:// or https://"),
                "Use the LMS base URL, e.g. https://canvas.example.edu",
            ));
        }

        let credential = self
            .credential
            .clone()
            .filter(|secret| !secret.expose().trim().is_empty())
            .ok_or_else(|| {
                SectionwiseError::configuration(
                    "credential is required",
                    "Set SECTIONWISE_TOKEN or pass --token with an LMS access token",
                )
            })?;

        let course_id = self.course_id.filter(|id| *id > 0).ok_or_else(|| {
            SectionwiseError::configuration(
                "courseId is required",
                "Set courseId in sectionwise.json, SECTIONWISE_COURSE_ID, or pass --course",
            )
        })?;

        Ok(Connection {
            endpoint_url: endpoint_url.to_string(),
            credential,
            course_id: CourseId(course_id),
        })
    }

    /// Returns the classifier settings derived from this configuration.
    #[must_use]
    pub fn roster_settings(&self) -> RosterSettings {
        RosterSettings {
            section_id_prefix: self.section_id_prefix.clone(),
            email_domain: self.email_domain.clone(),
            new_enrollment_window: Duration::days(i64::from(self.new_enrollment_window_days)),
            facilitator_capacity: self.facilitator_capacity,
        }
    }

    /// Returns the census offset as a duration.
    #[must_use]
    pub fn census_offset(&self) -> Duration {
        Duration::days(i64::from(self.census_offset_days))
    }
}
