//! Integration tests for the dashboard HTTP API.
//!
//! These tests run the API server on a real socket and talk to it with an
//! HTTP client, covering the allocation workflow, error bodies, CORS and
//! concurrent requests.

mod common;

use std::time::Duration;

use common::{spawn, Canvas, COURSE_ID, TOKEN};
use reqwest::{Client, StatusCode};
use sectionwise_core::{create_router, Config, CourseSession};
use sectionwise_lms::memory::MemoryLms;
use sectionwise_lms::{CourseId, LmsGateway, Role, User};
use serde_json::{json, Value};

/// Spawns the API server on an ephemeral port and returns its base URL.
async fn spawn_api<G: LmsGateway + 'static>(session: CourseSession<G>) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind");
    let base_url = format!("http://{}", listener.local_addr().expect("Failed to get local addr"));

    let router = create_router(session);
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("Server failed");
    });

    base_url
}

fn http() -> Client {
    Client::builder()
        .timeout(Duration::from_secs(5))
        .build()
        .expect("Failed to build client")
}

/// Eight students in one external section, two facilitators.
fn memory_course() -> MemoryLms {
    let lms = MemoryLms::with_course(7);
    let online = lms.seed_section("Online", None);
    for i in 0..8_u64 {
        lms.seed_enrollment(User::new(200 + i, format!("Student {i}")), Role::Student, Some(online));
    }
    lms.seed_enrollment(User::new(10_u64, "Grace"), Role::Teacher, None);
    lms.seed_enrollment(User::new(11_u64, "Alan"), Role::Teacher, None);
    lms
}

async fn get_json(client: &Client, url: &str) -> (StatusCode, Value) {
    let response = client.get(url).send().await.expect("request failed");
    let status = response.status();
    (status, response.json().await.expect("response should be JSON"))
}

async fn post_json(client: &Client, url: &str, body: &Value) -> (StatusCode, Value) {
    let response = client.post(url).json(body).send().await.expect("request failed");
    let status = response.status();
    (status, response.json().await.expect("response should be JSON"))
}

// ============================================================================
// Workflow
// ============================================================================

#[tokio::test]
async fn test_plan_commit_then_overview() {
    let base = spawn_api(CourseSession::new(memory_course(), CourseId(7), Config::default())).await;
    let client = http();

    let (status, plan) = post_json(&client, &format!("{base}/api/allocation/plan"), &json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(plan["totalStudents"], 8);
    assert_eq!(plan["perSection"], 4);
    assert_eq!(plan["sections"][1]["displayName"], "Tutorial Group B - Alan");

    let (status, outcome) = post_json(&client, &format!("{base}/api/allocation/commit"), &plan).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(outcome["allocated"], 8);
    assert_eq!(outcome["failed"], 0);
    assert_eq!(outcome["createdSections"], json!(["Tutorial Group A", "Tutorial Group B"]));

    let (status, overview) = get_json(&client, &format!("{base}/api/course")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(overview["stats"]["unassignedStudents"], 0);
    assert_eq!(overview["stats"]["toolSections"], 2);
    let ratios: Vec<&str> = overview["sections"]
        .as_array()
        .expect("sections")
        .iter()
        .filter(|s| s["provenance"] == "tool")
        .filter_map(|s| s["ratio"].as_str())
        .collect();
    assert_eq!(ratios, vec!["1:4", "1:4"]);

    let (status, audit) = get_json(&client, &format!("{base}/api/audit?category=allocation")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(audit["pagination"]["total"], 1);
    assert_eq!(audit["entries"][0]["action"], "Auto-Allocation Completed");
    assert_eq!(audit["entries"][0]["metadata"]["allocated"], 8);
}

#[tokio::test]
async fn test_move_with_justification_shows_in_audit() {
    let lms = MemoryLms::with_course(7);
    let from = lms.seed_section("Online", None);
    let to = lms.seed_section("Tutorial Group A", Some("SM_1_Tutorial_Group_A"));
    lms.seed_enrollment(User::new(200_u64, "Ada"), Role::Student, Some(from));
    let base = spawn_api(CourseSession::new(lms, CourseId(7), Config::default())).await;
    let client = http();

    let (status, _) = post_json(
        &client,
        &format!("{base}/api/students/move"),
        &json!({
            "studentId": 200,
            "fromSectionId": from.0,
            "toSectionId": to.0,
            "justification": "Clinical placement clash"
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, audit) = get_json(&client, &format!("{base}/api/audit?severity=warning")).await;
    assert_eq!(audit["pagination"]["total"], 1);
    assert_eq!(audit["entries"][0]["action"], "Student Moved");
    assert_eq!(audit["entries"][0]["justification"], "Clinical placement clash");
    assert_eq!(audit["entries"][0]["category"], "move");
}

// ============================================================================
// Errors
// ============================================================================

#[tokio::test]
async fn test_error_bodies() {
    let lms = MemoryLms::with_course(7);
    lms.seed_section("Tutorial Group A", None);
    lms.seed_enrollment(User::new(200_u64, "Ada"), Role::Student, None);
    let base = spawn_api(CourseSession::new(lms, CourseId(7), Config::default())).await;
    let client = http();

    let (status, body) = post_json(
        &client,
        &format!("{base}/api/sections"),
        &json!({"name": "  tutorial group a "}),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["kind"], "duplicate_section_name");

    let (status, body) = post_json(&client, &format!("{base}/api/sections"), &json!({"name": "   "})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "invalid_request");

    let (status, body) = post_json(&client, &format!("{base}/api/allocation/auto"), &json!({})).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["kind"], "no_facilitators");
    assert!(body.get("entityId").is_none());

    let (status, body) = get_json(&client, &format!("{base}/api/audit?category=nonsense")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "invalid_request");
}

#[tokio::test]
async fn test_unknown_route_is_not_found() {
    let base = spawn_api(CourseSession::new(MemoryLms::with_course(7), CourseId(7), Config::default())).await;
    let response = http()
        .get(format!("{base}/api/nowhere"))
        .send()
        .await
        .expect("request failed");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// ============================================================================
// Transport
// ============================================================================

#[tokio::test]
async fn test_cors_allows_any_origin() {
    let base = spawn_api(CourseSession::new(MemoryLms::with_course(7), CourseId(7), Config::default())).await;

    let response = http()
        .get(format!("{base}/api/course"))
        .header("Origin", "http://localhost:5173")
        .send()
        .await
        .expect("request failed");

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get("access-control-allow-origin")
            .and_then(|v| v.to_str().ok()),
        Some("*")
    );
}

#[tokio::test]
async fn test_concurrent_overview_requests() {
    let base = spawn_api(CourseSession::new(memory_course(), CourseId(7), Config::default())).await;
    let client = http();

    let requests = (0..10).map(|_| {
        let client = client.clone();
        let url = format!("{base}/api/course");
        tokio::spawn(async move { get_json(&client, &url).await })
    });

    for handle in requests.collect::<Vec<_>>() {
        let (status, body) = handle.await.expect("task panicked");
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["stats"]["totalStudents"], 8);
    }
}

#[tokio::test]
async fn test_dashboard_over_canvas() {
    let mut canvas = Canvas::default();
    let online = canvas.add_section("NRSG100 Online", None);
    for user in 100..104 {
        canvas.enroll(user, &format!("Student {user}"), "StudentEnrollment", Some(online));
    }
    let fake = spawn(canvas).await;
    let config = Config::default().with_overrides(
        Some(fake.base_url.clone()),
        Some(TOKEN.to_string()),
        Some(COURSE_ID),
    );
    let base = spawn_api(CourseSession::connect(config).expect("session")).await;
    let client = http();

    let (status, body) = post_json(&client, &format!("{base}/api/setup"), &json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["course"]["name"], "Foundations of Nursing");

    let (status, body) = post_json(&client, &format!("{base}/api/staff/promote"), &json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["userId"], 1);

    let (status, outcome) = post_json(&client, &format!("{base}/api/allocation/auto"), &json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(outcome["allocated"], 4);
    assert_eq!(outcome["createdSections"], json!(["Tutorial Group A"]));

    let (_, audit) = get_json(&client, &format!("{base}/api/audit")).await;
    let actions: Vec<&str> = audit["entries"]
        .as_array()
        .expect("entries")
        .iter()
        .filter_map(|e| e["action"].as_str())
        .collect();
    assert_eq!(actions, vec!["Auto-Allocation Completed", "Facilitator Promoted"]);
}
