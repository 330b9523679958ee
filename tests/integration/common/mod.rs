//! A fake Canvas REST server for integration tests.
//!
//! Serves the handful of endpoints the gateway uses from in-memory JSON
//! records, checks the bearer token, pages enrollment lists two at a time
//! through `Link` headers, and can be told to fail specific writes.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use axum::{
    extract::{Path, RawQuery, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get},
    Json, Router,
};
use chrono::{Duration, Utc};
use serde_json::{json, Value};
use tokio::net::TcpListener;

/// Token the fake accepts.
pub const TOKEN: &str = "test-token";

/// Course the fake serves.
pub const COURSE_ID: u64 = 42;

/// Enrollment records per page.
const PAGE_SIZE: usize = 2;

/// In-memory Canvas state.
#[derive(Debug, Default)]
pub struct Canvas {
    base_url: String,
    next_id: u64,
    users: HashMap<u64, Value>,
    pub enrollments: Vec<Value>,
    pub sections: Vec<Value>,
    pub topics: Vec<Value>,
    pub requests: Vec<String>,
    pub fail_deletes: HashSet<u64>,
    pub reject_enrollments: HashMap<u64, (u16, String)>,
}

impl Canvas {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        5000 + self.next_id
    }

    /// Adds a user without enrolling them.
    pub fn add_user(&mut self, id: u64, name: &str) {
        self.users.insert(
            id,
            json!({"id": id, "name": name, "login_id": format!("s{id}")}),
        );
    }

    /// Adds a section.
    pub fn add_section(&mut self, name: &str, sis: Option<&str>) -> u64 {
        let id = self.next_id();
        self.sections.push(json!({
            "id": id,
            "name": name,
            "sis_section_id": sis,
            "created_at": Utc::now() - Duration::days(60),
        }));
        id
    }

    /// Enrolls a (possibly new) user.
    pub fn enroll(&mut self, user: u64, name: &str, kind: &str, section: Option<u64>) -> u64 {
        if !self.users.contains_key(&user) {
            self.add_user(user, name);
        }
        let id = self.next_id();
        let record = self.enrollment_record(id, user, kind, section);
        self.enrollments.push(record);
        id
    }

    /// Adds a raw enrollment record, for malformed payloads.
    pub fn push_raw_enrollment(&mut self, record: Value) {
        self.enrollments.push(record);
    }

    fn enrollment_record(&self, id: u64, user: u64, kind: &str, section: Option<u64>) -> Value {
        json!({
            "id": id,
            "user_id": user,
            "type": kind,
            "enrollment_state": "active",
            "course_section_id": section,
            "created_at": Utc::now() - Duration::days(30),
            "user": self.users.get(&user).cloned().unwrap_or(Value::Null),
        })
    }

    /// Section ids of a user's enrollments of a given type.
    pub fn sections_of(&self, user: u64, kind: &str) -> Vec<Option<u64>> {
        self.enrollments
            .iter()
            .filter(|e| e["user_id"] == user && e["type"] == kind)
            .map(|e| e["course_section_id"].as_u64())
            .collect()
    }
}

/// Handle to a running fake.
#[derive(Clone)]
pub struct FakeCanvas {
    /// Base URL, without trailing slash.
    pub base_url: String,
    state: Arc<Mutex<Canvas>>,
}

impl FakeCanvas {
    /// Locks the fake's state.
    pub fn state(&self) -> MutexGuard<'_, Canvas> {
        self.state.lock().expect("fake canvas poisoned")
    }
}

type Shared = Arc<Mutex<Canvas>>;

/// Starts the fake on an ephemeral port.
pub async fn spawn(mut canvas: Canvas) -> FakeCanvas {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind");
    let base_url = format!("http://{}", listener.local_addr().expect("no local addr"));
    canvas.base_url.clone_from(&base_url);
    canvas.add_user(1, "Operator");

    let state = Arc::new(Mutex::new(canvas));
    let router = Router::new()
        .route("/api/v1/users/self", get(current_user))
        .route("/api/v1/courses/:course", get(get_course))
        .route(
            "/api/v1/courses/:course/enrollments",
            get(list_enrollments).post(create_enrollment),
        )
        .route(
            "/api/v1/courses/:course/enrollments/:id",
            delete(delete_enrollment),
        )
        .route(
            "/api/v1/courses/:course/sections",
            get(list_sections).post(create_section),
        )
        .route(
            "/api/v1/courses/:course/discussion_topics",
            get(list_topics).post(create_topic),
        )
        .with_state(Arc::clone(&state));

    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("Server failed");
    });

    FakeCanvas { base_url, state }
}

fn lock(state: &Shared) -> MutexGuard<'_, Canvas> {
    state.lock().expect("fake canvas poisoned")
}

fn check(state: &Shared, headers: &HeaderMap, line: String) -> Result<(), Response> {
    lock(state).requests.push(line);
    let expected = format!("Bearer {TOKEN}");
    let authorized = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == expected);
    if authorized {
        Ok(())
    } else {
        Err((
            StatusCode::UNAUTHORIZED,
            Json(json!({"errors": [{"message": "Invalid access token."}]})),
        )
            .into_response())
    }
}

fn check_course(course: u64) -> Result<(), Response> {
    if course == COURSE_ID {
        Ok(())
    } else {
        Err((StatusCode::NOT_FOUND, Json(json!({"errors": [{"message": "not found"}]}))).into_response())
    }
}

fn query_pairs(raw: Option<&str>) -> Vec<(String, String)> {
    raw.unwrap_or_default()
        .split('&')
        .filter(|p| !p.is_empty())
        .filter_map(|p| {
            let (k, v) = p.split_once('=')?;
            Some((k.replace("%5B%5D", "[]"), v.to_string()))
        })
        .collect()
}

async fn current_user(State(state): State<Shared>, headers: HeaderMap) -> Response {
    if let Err(r) = check(&state, &headers, "GET /users/self".to_string()) {
        return r;
    }
    let user = lock(&state).users.get(&1).cloned().unwrap_or(Value::Null);
    Json(user).into_response()
}

async fn get_course(State(state): State<Shared>, Path(course): Path<u64>, headers: HeaderMap) -> Response {
    if let Err(r) = check(&state, &headers, format!("GET /courses/{course}")) {
        return r;
    }
    if let Err(r) = check_course(course) {
        return r;
    }
    Json(json!({"id": course, "name": "Foundations of Nursing", "course_code": "NRSG100"})).into_response()
}

async fn list_enrollments(
    State(state): State<Shared>,
    Path(course): Path<u64>,
    RawQuery(raw): RawQuery,
    headers: HeaderMap,
) -> Response {
    if let Err(r) = check(&state, &headers, format!("GET /courses/{course}/enrollments")) {
        return r;
    }
    if let Err(r) = check_course(course) {
        return r;
    }

    let pairs = query_pairs(raw.as_deref());
    let page: usize = pairs
        .iter()
        .find(|(k, _)| k == "page")
        .and_then(|(_, v)| v.parse().ok())
        .unwrap_or(1);
    let user: Option<u64> = pairs
        .iter()
        .find(|(k, _)| k == "user_id")
        .and_then(|(_, v)| v.parse().ok());
    let types: Vec<String> = pairs
        .iter()
        .filter(|(k, _)| k == "type[]")
        .map(|(_, v)| v.clone())
        .collect();

    let canvas = lock(&state);
    let matching: Vec<Value> = canvas
        .enrollments
        .iter()
        .filter(|e| user.map_or(true, |u| e["user_id"] == u))
        .filter(|e| types.is_empty() || types.iter().any(|t| e["type"] == t.as_str()))
        .cloned()
        .collect();

    let start = (page - 1) * PAGE_SIZE;
    let batch: Vec<Value> = matching.iter().skip(start).take(PAGE_SIZE).cloned().collect();

    let mut headers = HeaderMap::new();
    if start + PAGE_SIZE < matching.len() {
        let rest: Vec<String> = pairs
            .iter()
            .filter(|(k, _)| k != "page")
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        let next = format!(
            "<{}/api/v1/courses/{course}/enrollments?{}&page={}>; rel=\"next\"",
            canvas.base_url,
            rest.join("&"),
            page + 1
        );
        headers.insert(header::LINK, next.parse().expect("valid header"));
    }
    (headers, Json(batch)).into_response()
}

async fn create_enrollment(
    State(state): State<Shared>,
    Path(course): Path<u64>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if let Err(r) = check(&state, &headers, format!("POST /courses/{course}/enrollments")) {
        return r;
    }
    let fields = &body["enrollment"];
    let Some(user) = fields["user_id"].as_u64() else {
        return (StatusCode::BAD_REQUEST, "user_id required").into_response();
    };

    let mut canvas = lock(&state);
    if let Some((status, message)) = canvas.reject_enrollments.get(&user).cloned() {
        let status = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_REQUEST);
        return (status, message).into_response();
    }
    if !canvas.users.contains_key(&user) {
        return (StatusCode::NOT_FOUND, "user not found").into_response();
    }

    let id = canvas.next_id();
    let kind = fields["type"].as_str().unwrap_or("StudentEnrollment").to_string();
    let mut record = canvas.enrollment_record(id, user, &kind, fields["course_section_id"].as_u64());
    record["created_at"] = json!(Utc::now());
    record["limit_privileges_to_course_section"] = fields["limit_privileges_to_course_section"].clone();
    canvas.enrollments.push(record.clone());
    Json(record).into_response()
}

async fn delete_enrollment(
    State(state): State<Shared>,
    Path((course, id)): Path<(u64, u64)>,
    RawQuery(raw): RawQuery,
    headers: HeaderMap,
) -> Response {
    let task = raw.unwrap_or_default();
    if let Err(r) = check(&state, &headers, format!("DELETE /courses/{course}/enrollments/{id}?{task}")) {
        return r;
    }
    let mut canvas = lock(&state);
    if canvas.fail_deletes.contains(&id) {
        return (StatusCode::INTERNAL_SERVER_ERROR, "delete failed").into_response();
    }
    let Some(index) = canvas.enrollments.iter().position(|e| e["id"] == id) else {
        return (StatusCode::NOT_FOUND, "no such enrollment").into_response();
    };
    let record = canvas.enrollments.remove(index);
    Json(record).into_response()
}

async fn list_sections(State(state): State<Shared>, Path(course): Path<u64>, headers: HeaderMap) -> Response {
    if let Err(r) = check(&state, &headers, format!("GET /courses/{course}/sections")) {
        return r;
    }
    Json(lock(&state).sections.clone()).into_response()
}

async fn create_section(
    State(state): State<Shared>,
    Path(course): Path<u64>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if let Err(r) = check(&state, &headers, format!("POST /courses/{course}/sections")) {
        return r;
    }
    let fields = &body["course_section"];
    let mut canvas = lock(&state);
    let id = canvas.next_id();
    let record = json!({
        "id": id,
        "name": fields["name"],
        "sis_section_id": fields["sis_section_id"],
        "created_at": Utc::now(),
    });
    canvas.sections.push(record.clone());
    Json(record).into_response()
}

async fn list_topics(
    State(state): State<Shared>,
    Path(course): Path<u64>,
    RawQuery(raw): RawQuery,
    headers: HeaderMap,
) -> Response {
    if let Err(r) = check(&state, &headers, format!("GET /courses/{course}/discussion_topics")) {
        return r;
    }
    let only_announcements = query_pairs(raw.as_deref())
        .iter()
        .any(|(k, v)| k == "only_announcements" && v == "true");
    let canvas = lock(&state);
    let topics: Vec<Value> = canvas
        .topics
        .iter()
        .rev()
        .filter(|t| !only_announcements || t["is_announcement"] == true)
        .cloned()
        .collect();
    Json(topics).into_response()
}

async fn create_topic(
    State(state): State<Shared>,
    Path(course): Path<u64>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if let Err(r) = check(&state, &headers, format!("POST /courses/{course}/discussion_topics")) {
        return r;
    }
    let mut canvas = lock(&state);
    let id = canvas.next_id();
    let record = json!({
        "id": id,
        "title": body["title"],
        "message": body["message"],
        "is_announcement": body["is_announcement"],
        "published": body["published"],
        "posted_at": Utc::now(),
        "author": {"display_name": "Operator"},
    });
    canvas.topics.push(record.clone());
    Json(record).into_response()
}
