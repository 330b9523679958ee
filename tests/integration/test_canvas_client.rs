//! Integration tests for the Canvas gateway.
//!
//! These tests drive the real `CanvasClient` over HTTP against a fake Canvas
//! server, covering authentication, pagination, payload validation and
//! error mapping.

mod common;

use common::{spawn, Canvas, COURSE_ID, TOKEN};
use sectionwise_lms::{
    CanvasClient, CourseId, EnrollmentId, EnrollmentQuery, LmsError, LmsGateway, NewEnrollment,
    NewPost, NewSection, PostQuery, Role, UserId,
};
use serde_json::json;

fn client(base_url: &str) -> CanvasClient {
    CanvasClient::new(base_url, TOKEN).expect("valid endpoint")
}

// ============================================================================
// Authentication and course lookup
// ============================================================================

#[tokio::test]
async fn test_get_course_with_valid_token() {
    let fake = spawn(Canvas::default()).await;

    let course = client(&fake.base_url)
        .get_course(CourseId(COURSE_ID))
        .await
        .expect("course");

    assert_eq!(course.name, "Foundations of Nursing");
    assert_eq!(course.course_code.as_deref(), Some("NRSG100"));
}

#[tokio::test]
async fn test_wrong_token_maps_to_http_error() {
    let fake = spawn(Canvas::default()).await;
    let client = CanvasClient::new(&fake.base_url, "wrong").expect("valid endpoint");

    let err = client.get_course(CourseId(COURSE_ID)).await.unwrap_err();

    assert!(matches!(err, LmsError::Http { status: 401, .. }));
}

#[tokio::test]
async fn test_unknown_course_is_not_found() {
    let fake = spawn(Canvas::default()).await;
    let err = client(&fake.base_url).get_course(CourseId(7)).await.unwrap_err();
    assert_eq!(err.status(), Some(404));
}

#[tokio::test]
async fn test_unreachable_endpoint_is_network_error() {
    let port = std::net::TcpListener::bind("127.0.0.1:0")
        .expect("Failed to bind to port")
        .local_addr()
        .expect("Failed to get local addr")
        .port();
    let client =
        CanvasClient::new(&format!("http://127.0.0.1:{port}"), TOKEN).expect("valid endpoint");
    let err = client.current_user().await.unwrap_err();
    assert!(matches!(err, LmsError::Network(_)));
}

#[tokio::test]
async fn test_current_user() {
    let fake = spawn(Canvas::default()).await;
    let me = client(&fake.base_url).current_user().await.expect("user");
    assert_eq!(me.id, UserId(1));
    assert_eq!(me.login_id.as_deref(), Some("s1"));
}

// ============================================================================
// Pagination and validation
// ============================================================================

#[tokio::test]
async fn test_enrollment_pages_are_followed() {
    let mut canvas = Canvas::default();
    for user in 100..105 {
        canvas.enroll(user, &format!("Student {user}"), "StudentEnrollment", None);
    }
    canvas.enroll(10, "Grace", "TeacherEnrollment", None);
    let fake = spawn(canvas).await;

    let enrollments = client(&fake.base_url)
        .list_enrollments(CourseId(COURSE_ID), &EnrollmentQuery::all_roles())
        .await
        .expect("enrollments");

    assert_eq!(enrollments.len(), 6);
    assert_eq!(enrollments[5].role, Role::Teacher);
    let pages = fake
        .state()
        .requests
        .iter()
        .filter(|r| r.ends_with("/enrollments"))
        .count();
    assert_eq!(pages, 3);
}

#[tokio::test]
async fn test_enrollment_query_by_user() {
    let mut canvas = Canvas::default();
    canvas.enroll(100, "Ada", "StudentEnrollment", None);
    canvas.enroll(101, "Alan", "StudentEnrollment", None);
    canvas.enroll(100, "Ada", "TaEnrollment", None);
    let fake = spawn(canvas).await;

    let enrollments = client(&fake.base_url)
        .list_enrollments(CourseId(COURSE_ID), &EnrollmentQuery::for_user(UserId(100)))
        .await
        .expect("enrollments");

    assert_eq!(enrollments.len(), 2);
    assert!(enrollments.iter().all(|e| e.user.id == UserId(100)));
}

#[tokio::test]
async fn test_malformed_enrollment_rejects_the_batch() {
    let mut canvas = Canvas::default();
    canvas.enroll(100, "Ada", "StudentEnrollment", None);
    canvas.push_raw_enrollment(json!({
        "id": 77,
        "user_id": 101,
        "type": "StudentEnrollment",
        "enrollment_state": "frozen",
        "created_at": "2026-03-01T09:30:00Z",
        "user": {"id": 101, "name": "Test Student"}
    }));
    let fake = spawn(canvas).await;

    let err = client(&fake.base_url)
        .list_enrollments(CourseId(COURSE_ID), &EnrollmentQuery::all_roles())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        LmsError::Malformed { kind: "enrollment", ref message } if message.contains("frozen")
    ));
}

// ============================================================================
// Writes
// ============================================================================

#[tokio::test]
async fn test_section_and_enrollment_writes() {
    let mut canvas = Canvas::default();
    canvas.enroll(100, "Ada", "StudentEnrollment", None);
    let fake = spawn(canvas).await;
    let client = client(&fake.base_url);
    let course = CourseId(COURSE_ID);

    let section = client
        .create_section(
            course,
            &NewSection {
                name: "Tutorial Group A".to_string(),
                sis_section_id: Some("SM_1_Tutorial_Group_A".to_string()),
            },
        )
        .await
        .expect("section");
    assert_eq!(section.sis_section_id.as_deref(), Some("SM_1_Tutorial_Group_A"));

    let enrollment = client
        .create_enrollment(
            course,
            &NewEnrollment::active(UserId(100), Some(section.id), Role::Teacher).section_limited(),
        )
        .await
        .expect("enrollment");
    assert_eq!(enrollment.role, Role::Teacher);
    assert_eq!(enrollment.section_id, Some(section.id));
    {
        let state = fake.state();
        let stored = state.enrollments.last().expect("stored");
        assert_eq!(stored["limit_privileges_to_course_section"], true);
    }

    client
        .delete_enrollment(course, enrollment.id)
        .await
        .expect("delete");
    assert!(fake
        .state()
        .requests
        .iter()
        .any(|r| r == &format!("DELETE /courses/{COURSE_ID}/enrollments/{}?task=delete", enrollment.id)));

    let err = client
        .delete_enrollment(course, EnrollmentId(999_999))
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(404));
}

#[tokio::test]
async fn test_rejected_enrollment_keeps_body() {
    let mut canvas = Canvas::default();
    canvas.enroll(100, "Ada", "TaEnrollment", None);
    canvas.reject_enrollments.insert(
        100,
        (400, r#"{"errors":[{"message":"User is already enrolled"}]}"#.to_string()),
    );
    let fake = spawn(canvas).await;

    let err = client(&fake.base_url)
        .create_enrollment(
            CourseId(COURSE_ID),
            &NewEnrollment::active(UserId(100), None, Role::Teacher),
        )
        .await
        .unwrap_err();

    assert!(err.is_duplicate_enrollment());
    assert_eq!(err.status(), Some(400));
}

#[tokio::test]
async fn test_posts_are_unpublished_announcements() {
    let fake = spawn(Canvas::default()).await;
    let client = client(&fake.base_url);
    let course = CourseId(COURSE_ID);

    let post = client
        .create_discussion_post(
            course,
            &NewPost {
                title: "[Audit] Section Created - 2026-03-02T10:15:30.000Z".to_string(),
                body: "<p><strong>Details:</strong> x</p>".to_string(),
                private: true,
            },
        )
        .await
        .expect("post");
    assert_eq!(post.author_name.as_deref(), Some("Operator"));

    {
        let state = fake.state();
        assert_eq!(state.topics[0]["is_announcement"], true);
        assert_eq!(state.topics[0]["published"], false);
    }

    let posts = client
        .list_discussion_posts(course, PostQuery { only_announcements: true })
        .await
        .expect("posts");
    assert_eq!(posts.len(), 1);
    assert!(posts[0].posted_at.is_some());
}
