//! End-to-end tests of course operations over the Canvas gateway.
//!
//! Each test opens a `CourseSession` on a real `CanvasClient` pointed at the
//! fake Canvas server and checks both the returned outcome and what was
//! actually written upstream.

mod common;

use common::{spawn, Canvas, FakeCanvas, COURSE_ID, TOKEN};
use sectionwise_audit::{AuditQuery, Category, Severity};
use sectionwise_core::{
    Config, CourseSession, MoveRequest, PromotionTarget, Provenance, SectionwiseError,
};
use sectionwise_lms::{CanvasClient, SectionId, UserId};

fn session(fake: &FakeCanvas) -> CourseSession<CanvasClient> {
    let config = Config::default().with_overrides(
        Some(fake.base_url.clone()),
        Some(TOKEN.to_string()),
        Some(COURSE_ID),
    );
    CourseSession::connect(config).expect("session")
}

/// Six students in an external section, two teachers, a designer.
fn nursing_course() -> (Canvas, u64) {
    let mut canvas = Canvas::default();
    let online = canvas.add_section("NRSG100 Online", None);
    for user in 100..106 {
        canvas.enroll(user, &format!("Student {user}"), "StudentEnrollment", Some(online));
    }
    canvas.enroll(10, "Grace Hopper", "TeacherEnrollment", None);
    canvas.enroll(11, "Alan Turing", "TeacherEnrollment", None);
    canvas.enroll(20, "Barbara Liskov", "DesignerEnrollment", None);
    (canvas, online)
}

// ============================================================================
// Connection and overview
// ============================================================================

#[tokio::test]
async fn test_connect_rejects_missing_token_before_any_request() {
    let fake = spawn(Canvas::default()).await;
    let config = Config::default().with_overrides(Some(fake.base_url.clone()), None, Some(COURSE_ID));

    let err = CourseSession::connect(config).err().expect("missing credential");

    assert!(matches!(err, SectionwiseError::ConfigurationError { .. }));
    assert!(fake.state().requests.is_empty());
}

#[tokio::test]
async fn test_overview_over_http() {
    let (canvas, online) = nursing_course();
    let fake = spawn(canvas).await;

    let overview = session(&fake).overview().await.expect("overview");

    assert_eq!(overview.course.name, "Foundations of Nursing");
    assert_eq!(overview.stats.total_students, 6);
    assert_eq!(overview.stats.unassigned_students, 6);
    assert_eq!(overview.stats.facilitators, 2);
    assert_eq!(overview.stats.external_sections, 1);
    assert_eq!(overview.stats.tool_sections, 0);
    assert_eq!(overview.lic.as_ref().map(|l| l.name.as_str()), Some("Barbara Liskov"));
    assert_eq!(overview.sections[0].section.id, SectionId(online));
    assert_eq!(overview.sections[0].section.provenance, Provenance::External);
}

#[tokio::test]
async fn test_sync_surfaces_malformed_enrollment() {
    let (mut canvas, _) = nursing_course();
    canvas.push_raw_enrollment(serde_json::json!({
        "id": 99,
        "user_id": 300,
        "type": "StudentEnrollment",
        "enrollment_state": "active",
        "user": {"id": 300, "name": "Late Student"}
    }));
    let fake = spawn(canvas).await;

    let err = session(&fake).sync().await.unwrap_err();

    assert_eq!(err.kind(), "malformed_record");
}

// ============================================================================
// Allocation
// ============================================================================

#[tokio::test]
async fn test_auto_allocate_with_name_collision() {
    let (mut canvas, online) = nursing_course();
    canvas.add_section("Tutorial Group B", None);
    let fake = spawn(canvas).await;

    let outcome = session(&fake).auto_allocate().await.expect("outcome");

    assert_eq!(outcome.total_students, 6);
    assert_eq!(outcome.allocated, 3);
    assert_eq!(outcome.failed, 3);
    assert_eq!(outcome.created_sections, vec!["Tutorial Group A".to_string()]);
    assert_eq!(outcome.errors.len(), 1);
    assert_eq!(outcome.errors[0].kind, "duplicate_section_name");
    assert_eq!(outcome.errors[0].facilitator.name, "Alan Turing");

    let state = fake.state();
    let created = state
        .sections
        .iter()
        .find(|s| s["name"] == "Tutorial Group A")
        .expect("section created");
    let created_id = created["id"].as_u64();
    let sis = created["sis_section_id"].as_str().unwrap_or_default();
    assert!(sis.starts_with("SM_"));
    assert!(sis.ends_with("_Tutorial_Group_A"));

    let placements: Vec<Option<u64>> = (100..106)
        .flat_map(|user| state.sections_of(user, "StudentEnrollment"))
        .collect();
    assert_eq!(placements.iter().filter(|s| **s == created_id).count(), 3);
    assert_eq!(placements.iter().filter(|s| **s == Some(online)).count(), 3);

    let grants: Vec<&serde_json::Value> = state
        .enrollments
        .iter()
        .filter(|e| e["user_id"] == 10 && e["course_section_id"].as_u64() == created_id)
        .collect();
    assert_eq!(grants.len(), 1);
    assert_eq!(grants[0]["type"], "TeacherEnrollment");
    assert_eq!(grants[0]["limit_privileges_to_course_section"], true);

    assert_eq!(state.topics.len(), 1);
    let title = state.topics[0]["title"].as_str().unwrap_or_default();
    assert!(title.starts_with("[Audit] Auto-Allocation Completed - "));
}

#[tokio::test]
async fn test_second_auto_allocate_has_nothing_to_do() {
    let (canvas, _) = nursing_course();
    let fake = spawn(canvas).await;
    let session = session(&fake);

    let first = session.auto_allocate().await.expect("first");
    assert_eq!(first.allocated, 6);
    assert_eq!(first.sections_created, 2);
    let topics = fake.state().topics.len();

    let second = session.auto_allocate().await.expect("second");
    assert_eq!(second.total_students, 0);
    assert_eq!(second.allocated, 0);
    assert_eq!(fake.state().topics.len(), topics);
}

// ============================================================================
// Moves
// ============================================================================

#[tokio::test]
async fn test_move_student_replaces_enrollment() {
    let (mut canvas, online) = nursing_course();
    let target = canvas.add_section("Tutorial Group A", Some("SM_1_Tutorial_Group_A"));
    let fake = spawn(canvas).await;

    let request = MoveRequest::new(UserId(100), Some(SectionId(online)), SectionId(target))
        .with_justification("Timetable clash");
    let outcome = session(&fake).move_student(&request).await.expect("moved");

    let state = fake.state();
    assert_eq!(state.sections_of(100, "StudentEnrollment"), vec![Some(target)]);
    assert!(state.requests.iter().any(|r| r
        == &format!(
            "DELETE /courses/{COURSE_ID}/enrollments/{}?task=delete",
            outcome.old_enrollment_id
        )));
    let title = state.topics[0]["title"].as_str().unwrap_or_default();
    assert!(title.starts_with("[Audit] Student Moved - "));
    let body = state.topics[0]["message"].as_str().unwrap_or_default();
    assert!(body.contains("Timetable clash"));
}

#[tokio::test]
async fn test_move_without_source_finds_the_current_section() {
    let (mut canvas, online) = nursing_course();
    let target = canvas.add_section("Tutorial Group A", Some("SM_1_Tutorial_Group_A"));
    let fake = spawn(canvas).await;

    let request = MoveRequest::new(UserId(101), None, SectionId(target));
    session(&fake).move_student(&request).await.expect("moved");

    let state = fake.state();
    assert_eq!(state.sections_of(101, "StudentEnrollment"), vec![Some(target)]);
    let body = state.topics[0]["message"].as_str().unwrap_or_default();
    assert!(body.contains(&format!("from section {online} to {target}")));
}

#[tokio::test]
async fn test_move_compensates_when_delete_fails() {
    let mut canvas = Canvas::default();
    let online = canvas.add_section("NRSG100 Online", None);
    let target = canvas.add_section("Tutorial Group A", None);
    let original = canvas.enroll(100, "Ada", "StudentEnrollment", Some(online));
    canvas.fail_deletes.insert(original);
    let fake = spawn(canvas).await;

    let request = MoveRequest::new(UserId(100), Some(SectionId(online)), SectionId(target));
    let err = session(&fake).move_student(&request).await.unwrap_err();

    assert!(matches!(
        err,
        SectionwiseError::DeleteFailed {
            compensated: true,
            ..
        }
    ));

    let state = fake.state();
    assert_eq!(state.sections_of(100, "StudentEnrollment"), vec![Some(online)]);
    let deletes = state
        .requests
        .iter()
        .filter(|r| r.starts_with("DELETE "))
        .count();
    assert_eq!(deletes, 2);
    let title = state.topics[0]["title"].as_str().unwrap_or_default();
    assert!(title.starts_with("[Audit] Student Move Failed - "));
}

// ============================================================================
// Promotion
// ============================================================================

#[tokio::test]
async fn test_promote_current_user() {
    let fake = spawn(Canvas::default()).await;

    let outcome = session(&fake)
        .promote(PromotionTarget::CurrentUser)
        .await
        .expect("promoted");

    assert_eq!(outcome.user_id, UserId(1));
    assert!(!outcome.already_has_role);
    assert_eq!(fake.state().sections_of(1, "TeacherEnrollment"), vec![None]);
}

#[tokio::test]
async fn test_promote_duplicate_rejection_is_already_promoted() {
    let mut canvas = Canvas::default();
    canvas.enroll(30, "Tim", "TaEnrollment", None);
    canvas.reject_enrollments.insert(
        30,
        (400, r#"{"message":"User is already enrolled"}"#.to_string()),
    );
    let fake = spawn(canvas).await;

    let outcome = session(&fake)
        .promote(PromotionTarget::User(UserId(30)))
        .await
        .expect("treated as promoted");

    assert!(outcome.already_has_role);
    assert!(fake.state().topics.is_empty());
}

#[tokio::test]
async fn test_promote_other_rejection_is_upstream_error() {
    let mut canvas = Canvas::default();
    canvas.enroll(30, "Tim", "TaEnrollment", None);
    canvas
        .reject_enrollments
        .insert(30, (403, "unauthorized".to_string()));
    let fake = spawn(canvas).await;

    let err = session(&fake)
        .promote(PromotionTarget::User(UserId(30)))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), "upstream_unavailable");
}

// ============================================================================
// Audit
// ============================================================================

#[tokio::test]
async fn test_audit_log_reads_back_recorded_actions() {
    let (canvas, _) = nursing_course();
    let fake = spawn(canvas).await;
    let session = session(&fake);

    session.create_section("Evening Group").await.expect("section");
    session.auto_allocate().await.expect("allocated");

    let page = session
        .audit_log(&AuditQuery::default())
        .await
        .expect("audit page");

    assert_eq!(page.pagination.total, 2);
    assert_eq!(page.entries[0].action, "Auto-Allocation Completed");
    assert_eq!(page.entries[1].action, "Section Created");
    assert_eq!(page.entries[1].actor, "Operator");
    assert_eq!(page.entries[1].category, Category::Create);
    assert!(page.entries.iter().all(|e| e.well_formed));
    assert_eq!(page.summary.info, 2);

    let filtered = session
        .audit_log(&AuditQuery {
            severity: Some(Severity::Critical),
            ..AuditQuery::default()
        })
        .await
        .expect("filtered");
    assert!(filtered.entries.is_empty());
    assert_eq!(filtered.summary.info, 2);
}
