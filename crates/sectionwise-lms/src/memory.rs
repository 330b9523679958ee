//! In-memory LMS for tests.
//!
//! [`MemoryLms`] keeps a single course in a mutex-guarded state, journals
//! every write it receives, and lets tests inject failures per user, per
//! enrollment, or per section name. It mirrors the LMS behaviors the engine
//! depends on: duplicate active enrollments are rejected, deleted
//! enrollments disappear from listings, and posts are stamped at creation.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};

use crate::{
    Course, CourseId, Enrollment, EnrollmentId, EnrollmentQuery, EnrollmentState, LmsError,
    LmsGateway, NewEnrollment, NewPost, NewSection, Post, PostId, PostQuery, Role, Section,
    SectionId, User, UserId,
};

/// A write the in-memory LMS received, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    /// `create_section` with the requested name.
    CreateSection(String),
    /// `create_enrollment` for a user, section, and role.
    CreateEnrollment {
        /// Enrolled user.
        user: UserId,
        /// Target section.
        section: Option<SectionId>,
        /// Granted role.
        role: Role,
    },
    /// `delete_enrollment` for a record.
    DeleteEnrollment(EnrollmentId),
    /// `create_discussion_post` with the post title.
    CreatePost(String),
}

#[derive(Debug)]
struct Injected {
    status: u16,
    body: String,
}

impl Injected {
    fn to_error(&self) -> LmsError {
        LmsError::Http {
            status: self.status,
            body: self.body.clone(),
        }
    }
}

#[derive(Debug)]
struct State {
    course: Course,
    me: User,
    sections: Vec<Section>,
    enrollments: Vec<Enrollment>,
    posts: Vec<Post>,
    calls: Vec<Call>,
    next_id: u64,
    enrollment_failures: HashMap<UserId, Injected>,
    delete_failures: HashSet<EnrollmentId>,
    section_failures: HashSet<String>,
    fail_post_writes: bool,
    fail_post_reads: bool,
    fail_enrollment_reads: bool,
}

impl State {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn check_course(&self, course: CourseId) -> Result<(), LmsError> {
        if course == self.course.id {
            Ok(())
        } else {
            Err(LmsError::Http {
                status: 404,
                body: format!("course {course} not found"),
            })
        }
    }
}

/// In-memory [`LmsGateway`] holding one course.
#[derive(Debug)]
pub struct MemoryLms {
    state: Mutex<State>,
}

impl MemoryLms {
    /// Creates an empty course whose credential belongs to `me`.
    #[must_use]
    pub fn new(course: Course, me: User) -> Self {
        Self {
            state: Mutex::new(State {
                course,
                me,
                sections: Vec::new(),
                enrollments: Vec::new(),
                posts: Vec::new(),
                calls: Vec::new(),
                next_id: 1000,
                enrollment_failures: HashMap::new(),
                delete_failures: HashSet::new(),
                section_failures: HashSet::new(),
                fail_post_writes: false,
                fail_post_reads: false,
                fail_enrollment_reads: false,
            }),
        }
    }

    /// Creates course `id` named "Test Course", operated by user 1.
    #[must_use]
    pub fn with_course(id: u64) -> Self {
        Self::new(
            Course {
                id: CourseId(id),
                name: "Test Course".to_string(),
                course_code: Some("TEST101".to_string()),
            },
            User::new(1_u64, "Operator").with_email("operator@example.edu"),
        )
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ========================================================================
    // Seeding
    // ========================================================================

    /// Adds a section without journaling it.
    pub fn seed_section(&self, name: &str, sis_section_id: Option<&str>) -> SectionId {
        let mut state = self.lock();
        let id = SectionId(state.next_id());
        state.sections.push(Section {
            id,
            name: name.to_string(),
            sis_section_id: sis_section_id.map(ToString::to_string),
            created_at: Some(Utc::now()),
        });
        id
    }

    /// Adds an active enrollment created 30 days ago.
    pub fn seed_enrollment(&self, user: User, role: Role, section: Option<SectionId>) -> EnrollmentId {
        self.seed_enrollment_at(
            user,
            role,
            section,
            EnrollmentState::Active,
            Utc::now() - chrono::Duration::days(30),
        )
    }

    /// Adds an enrollment with an explicit state and creation time.
    pub fn seed_enrollment_at(
        &self,
        user: User,
        role: Role,
        section: Option<SectionId>,
        state: EnrollmentState,
        created_at: DateTime<Utc>,
    ) -> EnrollmentId {
        let mut guard = self.lock();
        let id = EnrollmentId(guard.next_id());
        guard.enrollments.push(Enrollment {
            id,
            user,
            role,
            state,
            section_id: section,
            created_at,
        });
        id
    }

    /// Adds a discussion post without journaling it.
    pub fn seed_post(&self, title: &str, message: &str, posted_at: Option<DateTime<Utc>>) -> PostId {
        let mut state = self.lock();
        let id = PostId(state.next_id());
        let author = state.me.name.clone();
        state.posts.push(Post {
            id,
            title: title.to_string(),
            message: message.to_string(),
            author_name: Some(author),
            posted_at,
        });
        id
    }

    // ========================================================================
    // Failure injection
    // ========================================================================

    /// Makes `create_enrollment` fail for `user` with the given response.
    pub fn fail_enrollment_for(&self, user: UserId, status: u16, body: &str) {
        self.lock().enrollment_failures.insert(
            user,
            Injected {
                status,
                body: body.to_string(),
            },
        );
    }

    /// Makes `delete_enrollment` fail for `enrollment`.
    pub fn fail_delete_of(&self, enrollment: EnrollmentId) {
        self.lock().delete_failures.insert(enrollment);
    }

    /// Makes `create_section` fail for sections named `name`.
    pub fn fail_section_named(&self, name: &str) {
        self.lock().section_failures.insert(name.to_string());
    }

    /// Makes every `create_discussion_post` fail.
    pub fn fail_post_writes(&self) {
        self.lock().fail_post_writes = true;
    }

    /// Makes every `list_discussion_posts` fail.
    pub fn fail_post_reads(&self) {
        self.lock().fail_post_reads = true;
    }

    /// Makes every `list_enrollments` fail.
    pub fn fail_enrollment_reads(&self) {
        self.lock().fail_enrollment_reads = true;
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    /// Returns the write journal.
    #[must_use]
    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    /// Returns every live enrollment.
    #[must_use]
    pub fn enrollments(&self) -> Vec<Enrollment> {
        self.lock().enrollments.clone()
    }

    /// Returns the live enrollments of one user.
    #[must_use]
    pub fn enrollments_of(&self, user: UserId) -> Vec<Enrollment> {
        self.lock()
            .enrollments
            .iter()
            .filter(|e| e.user.id == user)
            .cloned()
            .collect()
    }

    /// Returns every section.
    #[must_use]
    pub fn sections(&self) -> Vec<Section> {
        self.lock().sections.clone()
    }

    /// Returns every post.
    #[must_use]
    pub fn posts(&self) -> Vec<Post> {
        self.lock().posts.clone()
    }
}

fn unavailable(what: &str) -> LmsError {
    LmsError::Http {
        status: 503,
        body: format!("{what} unavailable"),
    }
}

impl LmsGateway for MemoryLms {
    async fn get_course(&self, course: CourseId) -> Result<Course, LmsError> {
        let state = self.lock();
        state.check_course(course)?;
        Ok(state.course.clone())
    }

    async fn current_user(&self) -> Result<User, LmsError> {
        Ok(self.lock().me.clone())
    }

    async fn list_enrollments(
        &self,
        course: CourseId,
        query: &EnrollmentQuery,
    ) -> Result<Vec<Enrollment>, LmsError> {
        let state = self.lock();
        state.check_course(course)?;
        if state.fail_enrollment_reads {
            return Err(unavailable("enrollments"));
        }
        Ok(state
            .enrollments
            .iter()
            .filter(|e| query.matches(e))
            .cloned()
            .collect())
    }

    async fn list_sections(&self, course: CourseId) -> Result<Vec<Section>, LmsError> {
        let state = self.lock();
        state.check_course(course)?;
        Ok(state.sections.clone())
    }

    async fn create_section(
        &self,
        course: CourseId,
        section: &NewSection,
    ) -> Result<Section, LmsError> {
        let mut state = self.lock();
        state.check_course(course)?;
        state.calls.push(Call::CreateSection(section.name.clone()));
        if state.section_failures.contains(&section.name) {
            return Err(LmsError::Http {
                status: 500,
                body: format!("could not create section {}", section.name),
            });
        }

        let created = Section {
            id: SectionId(state.next_id()),
            name: section.name.clone(),
            sis_section_id: section.sis_section_id.clone(),
            created_at: Some(Utc::now()),
        };
        state.sections.push(created.clone());
        Ok(created)
    }

    async fn create_enrollment(
        &self,
        course: CourseId,
        enrollment: &NewEnrollment,
    ) -> Result<Enrollment, LmsError> {
        let mut state = self.lock();
        state.check_course(course)?;
        state.calls.push(Call::CreateEnrollment {
            user: enrollment.user_id,
            section: enrollment.section_id,
            role: enrollment.role,
        });
        if let Some(injected) = state.enrollment_failures.get(&enrollment.user_id) {
            return Err(injected.to_error());
        }

        let duplicate = state.enrollments.iter().any(|e| {
            e.user.id == enrollment.user_id
                && e.section_id == enrollment.section_id
                && e.role == enrollment.role
                && e.is_active()
        });
        if duplicate {
            return Err(LmsError::Http {
                status: 400,
                body: r#"{"errors":[{"message":"User is already enrolled in this section"}]}"#
                    .to_string(),
            });
        }

        let user = state
            .enrollments
            .iter()
            .map(|e| &e.user)
            .chain(std::iter::once(&state.me))
            .find(|u| u.id == enrollment.user_id)
            .cloned()
            .ok_or_else(|| LmsError::Http {
                status: 404,
                body: format!("user {} not found", enrollment.user_id),
            })?;

        let created = Enrollment {
            id: EnrollmentId(state.next_id()),
            user,
            role: enrollment.role,
            state: enrollment.state,
            section_id: enrollment.section_id,
            created_at: Utc::now(),
        };
        state.enrollments.push(created.clone());
        Ok(created)
    }

    async fn delete_enrollment(
        &self,
        course: CourseId,
        enrollment: EnrollmentId,
    ) -> Result<(), LmsError> {
        let mut state = self.lock();
        state.check_course(course)?;
        state.calls.push(Call::DeleteEnrollment(enrollment));
        if state.delete_failures.contains(&enrollment) {
            return Err(LmsError::Http {
                status: 500,
                body: "internal error".to_string(),
            });
        }

        let before = state.enrollments.len();
        state.enrollments.retain(|e| e.id != enrollment);
        if state.enrollments.len() == before {
            return Err(LmsError::Http {
                status: 404,
                body: format!("enrollment {enrollment} not found"),
            });
        }
        Ok(())
    }

    async fn create_discussion_post(&self, course: CourseId, post: &NewPost) -> Result<Post, LmsError> {
        let mut state = self.lock();
        state.check_course(course)?;
        state.calls.push(Call::CreatePost(post.title.clone()));
        if state.fail_post_writes {
            return Err(unavailable("discussion topics"));
        }

        let created = Post {
            id: PostId(state.next_id()),
            title: post.title.clone(),
            message: post.body.clone(),
            author_name: Some(state.me.name.clone()),
            posted_at: Some(Utc::now()),
        };
        state.posts.push(created.clone());
        Ok(created)
    }

    async fn list_discussion_posts(
        &self,
        course: CourseId,
        _query: PostQuery,
    ) -> Result<Vec<Post>, LmsError> {
        let state = self.lock();
        state.check_course(course)?;
        if state.fail_post_reads {
            return Err(unavailable("discussion topics"));
        }
        Ok(state.posts.iter().rev().cloned().collect())
    }
}
