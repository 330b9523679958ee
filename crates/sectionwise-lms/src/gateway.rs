//! The LMS gateway seam.

use std::future::Future;

use crate::{
    Course, CourseId, Enrollment, EnrollmentId, EnrollmentQuery, LmsError, NewEnrollment,
    NewPost, NewSection, Post, PostQuery, Section, User,
};

/// Request/response access to the LMS REST surface.
///
/// Every call is a suspension point and callers must not assume atomicity
/// across two calls. Implementations perform no business logic and no
/// retries.
pub trait LmsGateway: Send + Sync {
    /// Fetches a course.
    fn get_course(&self, course: CourseId)
        -> impl Future<Output = Result<Course, LmsError>> + Send;

    /// Fetches the user the credential belongs to.
    fn current_user(&self) -> impl Future<Output = Result<User, LmsError>> + Send;

    /// Lists enrollment records matching `query`.
    fn list_enrollments(
        &self,
        course: CourseId,
        query: &EnrollmentQuery,
    ) -> impl Future<Output = Result<Vec<Enrollment>, LmsError>> + Send;

    /// Lists every section of the course.
    fn list_sections(
        &self,
        course: CourseId,
    ) -> impl Future<Output = Result<Vec<Section>, LmsError>> + Send;

    /// Creates a section.
    fn create_section(
        &self,
        course: CourseId,
        section: &NewSection,
    ) -> impl Future<Output = Result<Section, LmsError>> + Send;

    /// Creates an enrollment record.
    fn create_enrollment(
        &self,
        course: CourseId,
        enrollment: &NewEnrollment,
    ) -> impl Future<Output = Result<Enrollment, LmsError>> + Send;

    /// Deletes an enrollment record.
    fn delete_enrollment(
        &self,
        course: CourseId,
        enrollment: EnrollmentId,
    ) -> impl Future<Output = Result<(), LmsError>> + Send;

    /// Creates a discussion post.
    fn create_discussion_post(
        &self,
        course: CourseId,
        post: &NewPost,
    ) -> impl Future<Output = Result<Post, LmsError>> + Send;

    /// Lists discussion posts.
    fn list_discussion_posts(
        &self,
        course: CourseId,
        query: PostQuery,
    ) -> impl Future<Output = Result<Vec<Post>, LmsError>> + Send;
}
