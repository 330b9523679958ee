//! Canvas REST client.
//!
//! This module provides the [`CanvasClient`] struct, the production
//! [`LmsGateway`] implementation. It authenticates with the operator's bearer
//! token, follows `Link: rel="next"` pagination, and validates every payload
//! through the wire types before handing records to callers.

use std::time::Duration;

use reqwest::header::{HeaderMap, LINK};
use reqwest::{Method, RequestBuilder, Response, Url};
use serde::de::DeserializeOwned;
use tracing::{debug, instrument, warn};

use crate::wire::{
    convert_all, CreateEnrollmentBody, CreateSectionBody, CreateTopicBody, WireCourse,
    WireEnrollment, WireSection, WireTopic, WireUser,
};
use crate::{
    Course, CourseId, Enrollment, EnrollmentId, EnrollmentQuery, LmsError, LmsGateway,
    NewEnrollment, NewPost, NewSection, Post, PostQuery, Section, User,
};

const USER_AGENT: &str = concat!("sectionwise/", env!("CARGO_PKG_VERSION"));

/// Request timeout for a single LMS call.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Page size requested from list endpoints.
const PAGE_SIZE: u32 = 100;

/// Upper bound on followed pages, guarding against a cyclic `Link` header.
const MAX_PAGES: usize = 200;

/// Canvas REST API client.
///
/// # Example
///
/// ```no_run
/// use sectionwise_lms::{CanvasClient, CourseId, LmsGateway};
///
/// # async fn example() -> Result<(), sectionwise_lms::LmsError> {
/// let client = CanvasClient::new("https://canvas.example.edu", "token")?;
/// let course = client.get_course(CourseId(1234)).await?;
/// println!("Connected to {}", course.name);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct CanvasClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl CanvasClient {
    /// Creates a client for the Canvas instance at `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns [`LmsError::InvalidUrl`] if `endpoint` is not an absolute
    /// http(s) URL, or [`LmsError::Network`] if the HTTP client cannot be
    /// built.
    pub fn new(endpoint: &str, token: impl Into<String>) -> Result<Self, LmsError> {
        let parsed = Url::parse(endpoint).map_err(|_| LmsError::InvalidUrl(endpoint.to_string()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(LmsError::InvalidUrl(endpoint.to_string()));
        }

        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| LmsError::Network(e.to_string()))?;

        debug!(endpoint = %endpoint, "Canvas client configured");

        Ok(Self {
            http,
            base_url: endpoint.trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }

    /// Returns the configured base URL without a trailing slash.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/api/v1{path}", self.base_url)
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        self.http
            .request(method, url)
            .bearer_auth(&self.token)
            .header("Accept", "application/json")
    }

    /// Sends a request and fails on any non-success status.
    async fn send(request: RequestBuilder) -> Result<Response, LmsError> {
        let response = request
            .send()
            .await
            .map_err(|e| LmsError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "LMS request failed");
            return Err(LmsError::Http {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response)
    }

    async fn decode<T: DeserializeOwned>(response: Response, kind: &'static str) -> Result<T, LmsError> {
        response
            .json::<T>()
            .await
            .map_err(|e| LmsError::malformed(kind, e.to_string()))
    }

    async fn get_one<T: DeserializeOwned>(&self, path: &str, kind: &'static str) -> Result<T, LmsError> {
        let response = Self::send(self.request(Method::GET, &self.api_url(path))).await?;
        Self::decode(response, kind).await
    }

    /// Fetches every page of a list endpoint.
    async fn get_all<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
        kind: &'static str,
    ) -> Result<Vec<T>, LmsError> {
        let mut items = Vec::new();
        let first = self
            .request(Method::GET, &self.api_url(path))
            .query(&[("per_page", PAGE_SIZE.to_string())])
            .query(query);
        let mut response = Self::send(first).await?;

        for page in 1..=MAX_PAGES {
            let next = next_page_url(response.headers());
            let mut batch: Vec<T> = Self::decode(response, kind).await?;
            debug!(path = %path, page, count = batch.len(), "Fetched page");
            items.append(&mut batch);

            let Some(next) = next else {
                return Ok(items);
            };
            response = Self::send(self.request(Method::GET, &next)).await?;
        }

        warn!(path = %path, max_pages = MAX_PAGES, "Stopped following pagination links");
        Ok(items)
    }
}

/// Extracts the `rel="next"` target from a `Link` header.
fn next_page_url(headers: &HeaderMap) -> Option<String> {
    let link = headers.get(LINK)?.to_str().ok()?;
    link.split(',').find_map(|part| {
        let mut pieces = part.split(';');
        let target = pieces.next()?.trim();
        let is_next = pieces.any(|p| {
            let p = p.trim();
            p == r#"rel="next""# || p == "rel=next"
        });
        if !is_next {
            return None;
        }
        target
            .strip_prefix('<')
            .and_then(|t| t.strip_suffix('>'))
            .map(ToString::to_string)
    })
}

impl LmsGateway for CanvasClient {
    #[instrument(skip(self))]
    async fn get_course(&self, course: CourseId) -> Result<Course, LmsError> {
        let wire: WireCourse = self.get_one(&format!("/courses/{course}"), "course").await?;
        wire.try_into()
    }

    #[instrument(skip(self))]
    async fn current_user(&self) -> Result<User, LmsError> {
        let wire: WireUser = self.get_one("/users/self", "user").await?;
        wire.try_into()
    }

    #[instrument(skip(self))]
    async fn list_enrollments(
        &self,
        course: CourseId,
        query: &EnrollmentQuery,
    ) -> Result<Vec<Enrollment>, LmsError> {
        let mut params: Vec<(&str, String)> = query
            .roles
            .iter()
            .map(|role| ("type[]", role.enrollment_type().to_string()))
            .collect();
        if let Some(user_id) = query.user_id {
            params.push(("user_id", user_id.to_string()));
        }

        let wire: Vec<WireEnrollment> = self
            .get_all(&format!("/courses/{course}/enrollments"), &params, "enrollment")
            .await?;
        convert_all(wire)
    }

    #[instrument(skip(self))]
    async fn list_sections(&self, course: CourseId) -> Result<Vec<Section>, LmsError> {
        let wire: Vec<WireSection> = self
            .get_all(&format!("/courses/{course}/sections"), &[], "section")
            .await?;
        convert_all(wire)
    }

    #[instrument(skip(self), fields(name = %section.name))]
    async fn create_section(
        &self,
        course: CourseId,
        section: &NewSection,
    ) -> Result<Section, LmsError> {
        let request = self
            .request(Method::POST, &self.api_url(&format!("/courses/{course}/sections")))
            .json(&CreateSectionBody::from(section));
        let wire: WireSection = Self::decode(Self::send(request).await?, "section").await?;
        wire.try_into()
    }

    #[instrument(skip(self), fields(user = %enrollment.user_id, role = %enrollment.role))]
    async fn create_enrollment(
        &self,
        course: CourseId,
        enrollment: &NewEnrollment,
    ) -> Result<Enrollment, LmsError> {
        let request = self
            .request(
                Method::POST,
                &self.api_url(&format!("/courses/{course}/enrollments")),
            )
            .json(&CreateEnrollmentBody::from(enrollment));
        let wire: WireEnrollment = Self::decode(Self::send(request).await?, "enrollment").await?;
        wire.try_into()
    }

    #[instrument(skip(self))]
    async fn delete_enrollment(
        &self,
        course: CourseId,
        enrollment: EnrollmentId,
    ) -> Result<(), LmsError> {
        let request = self
            .request(
                Method::DELETE,
                &self.api_url(&format!("/courses/{course}/enrollments/{enrollment}")),
            )
            .query(&[("task", "delete")]);
        Self::send(request).await?;
        Ok(())
    }

    #[instrument(skip(self, post), fields(title = %post.title))]
    async fn create_discussion_post(&self, course: CourseId, post: &NewPost) -> Result<Post, LmsError> {
        let request = self
            .request(
                Method::POST,
                &self.api_url(&format!("/courses/{course}/discussion_topics")),
            )
            .json(&CreateTopicBody::from(post));
        let wire: WireTopic = Self::decode(Self::send(request).await?, "discussion topic").await?;
        Ok(wire.into())
    }

    #[instrument(skip(self))]
    async fn list_discussion_posts(
        &self,
        course: CourseId,
        query: PostQuery,
    ) -> Result<Vec<Post>, LmsError> {
        let params = if query.only_announcements {
            vec![("only_announcements", "true".to_string())]
        } else {
            Vec::new()
        };
        let wire: Vec<WireTopic> = self
            .get_all(
                &format!("/courses/{course}/discussion_topics"),
                &params,
                "discussion topic",
            )
            .await?;
        Ok(wire.into_iter().map(Post::from).collect())
    }
}
