//! HTTP API endpoints for the Sectionwise dashboard.
//!
//! # Endpoints
//!
//! - `POST /api/setup` - Test the LMS connection
//! - `GET /api/course` - Course overview
//! - `POST /api/sections` - Create a section
//! - `POST /api/allocation/plan` - Propose an allocation
//! - `POST /api/allocation/commit` - Commit a proposed allocation
//! - `POST /api/allocation/auto` - Sync, plan and commit in one go
//! - `POST /api/students/move` - Move one student
//! - `POST /api/staff/promote` - Promote a staff member to facilitator
//! - `GET /api/audit` - Query the audit log
//!
//! # Example
//!
//! ```no_run
//! use sectionwise_core::{create_router, Config, CourseSession};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let session = CourseSession::connect(Config::load()?)?;
//! let router = create_router(session);
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
//! axum::serve(listener, router).await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use sectionwise_audit::{AuditError, AuditPage, AuditQuery};
use sectionwise_lms::{Course, LmsGateway, Section, UserId};
use serde::{Deserialize, Serialize};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};

use crate::allocation::{plan_allocation, AllocationOutcome, AllocationPlan, SectionNaming};
use crate::error::SectionwiseError;
use crate::promotion::{PromotionOutcome, PromotionTarget};
use crate::session::{CourseOverview, CourseSession};
use crate::transfer::{MoveOutcome, MoveRequest};

// ============================================================================
// Request/Response Types
// ============================================================================

/// Response body for the setup endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupResponse {
    /// Whether the LMS answered.
    pub connected: bool,
    /// The configured course.
    pub course: Course,
}

/// Request body for the create section endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateSectionRequest {
    /// Name of the new section.
    pub name: String,
}

/// Request body for the promote endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromoteRequest {
    /// User to promote; the credential's own user when absent.
    #[serde(default)]
    pub user_id: Option<UserId>,
}

/// Query parameters of the audit endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuditParams {
    /// 1-based page.
    pub page: Option<usize>,
    /// Page size.
    pub limit: Option<usize>,
    /// Severity filter, or `all`.
    pub severity: Option<String>,
    /// Category filter, or `all`.
    pub category: Option<String>,
}

/// Error response body returned on failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    /// Description of the error.
    pub error: String,
    /// Stable error tag.
    pub kind: String,
    /// Offending entity, when there is one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
}

// ============================================================================
// API Error Type
// ============================================================================

/// Internal error type for API handlers.
#[derive(Debug)]
enum ApiError {
    /// An engine operation failed.
    Operation(SectionwiseError),
    /// A query parameter could not be parsed.
    BadQuery(AuditError),
}

impl From<SectionwiseError> for ApiError {
    fn from(err: SectionwiseError) -> Self {
        Self::Operation(err)
    }
}

impl From<AuditError> for ApiError {
    fn from(err: AuditError) -> Self {
        Self::BadQuery(err)
    }
}

/// Maps an engine error onto an HTTP status.
const fn status_for(err: &SectionwiseError) -> StatusCode {
    match err {
        SectionwiseError::ConfigParseError { .. }
        | SectionwiseError::ConfigurationError { .. }
        | SectionwiseError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        SectionwiseError::NoFacilitators => StatusCode::UNPROCESSABLE_ENTITY,
        SectionwiseError::DuplicateSectionName { .. } => StatusCode::CONFLICT,
        SectionwiseError::EnrollmentNotFound { .. } => StatusCode::NOT_FOUND,
        SectionwiseError::UpstreamUnavailable { .. }
        | SectionwiseError::MalformedRecord { .. }
        | SectionwiseError::SectionCreateFailed { .. }
        | SectionwiseError::CreateFailed { .. }
        | SectionwiseError::DeleteFailed { .. } => StatusCode::BAD_GATEWAY,
        SectionwiseError::Io(_) | SectionwiseError::Json(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            Self::Operation(err) => {
                let status = status_for(&err);
                if status.is_server_error() {
                    warn!(kind = err.kind(), error = %err, "Request failed");
                } else {
                    info!(kind = err.kind(), error = %err, "Request rejected");
                }
                (
                    status,
                    ErrorResponse {
                        error: err.to_string(),
                        kind: err.kind().to_string(),
                        entity_id: err.entity_id(),
                    },
                )
            }
            Self::BadQuery(err) => (
                StatusCode::BAD_REQUEST,
                ErrorResponse {
                    error: err.to_string(),
                    kind: "invalid_request".to_string(),
                    entity_id: None,
                },
            ),
        };

        (status, Json(body)).into_response()
    }
}

type Shared<G> = State<Arc<CourseSession<G>>>;

// ============================================================================
// Router Setup
// ============================================================================

/// Creates the HTTP router with all API endpoints.
///
/// # Returns
///
/// An axum `Router` configured with:
/// - All API routes under `/api`
/// - CORS middleware for the dashboard
/// - Tracing middleware for request logging
pub fn create_router<G: LmsGateway + 'static>(session: CourseSession<G>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/setup", post(handle_setup::<G>))
        .route("/course", get(handle_course::<G>))
        .route("/sections", post(handle_create_section::<G>))
        .route("/allocation/plan", post(handle_plan::<G>))
        .route("/allocation/commit", post(handle_commit::<G>))
        .route("/allocation/auto", post(handle_auto_allocate::<G>))
        .route("/students/move", post(handle_move::<G>))
        .route("/staff/promote", post(handle_promote::<G>))
        .route("/audit", get(handle_audit::<G>));

    Router::new()
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(Arc::new(session))
}

// ============================================================================
// Handlers
// ============================================================================

/// Handler for `POST /api/setup`.
async fn handle_setup<G: LmsGateway>(
    State(session): Shared<G>,
) -> Result<Json<SetupResponse>, ApiError> {
    let course = session.test_connection().await?;
    Ok(Json(SetupResponse {
        connected: true,
        course,
    }))
}

/// Handler for `GET /api/course`.
async fn handle_course<G: LmsGateway>(
    State(session): Shared<G>,
) -> Result<Json<CourseOverview>, ApiError> {
    Ok(Json(session.overview().await?))
}

/// Handler for `POST /api/sections`.
async fn handle_create_section<G: LmsGateway>(
    State(session): Shared<G>,
    Json(request): Json<CreateSectionRequest>,
) -> Result<(StatusCode, Json<Section>), ApiError> {
    let section = session.create_section(&request.name).await?;
    Ok((StatusCode::CREATED, Json(section)))
}

/// Handler for `POST /api/allocation/plan`.
async fn handle_plan<G: LmsGateway>(
    State(session): Shared<G>,
) -> Result<Json<AllocationPlan>, ApiError> {
    let roster = session.sync().await?;
    let plan = plan_allocation(
        &roster.students,
        &roster.facilitators,
        &SectionNaming::default(),
    )?;
    info!(
        students = plan.total_students,
        sections = plan.sections.len(),
        "Allocation planned"
    );
    Ok(Json(plan))
}

/// Handler for `POST /api/allocation/commit`.
///
/// Runs to completion in the request task.
async fn handle_commit<G: LmsGateway>(
    State(session): Shared<G>,
    Json(plan): Json<AllocationPlan>,
) -> Result<Json<AllocationOutcome>, ApiError> {
    Ok(Json(session.commit_allocation(&plan).await?))
}

/// Handler for `POST /api/allocation/auto`.
async fn handle_auto_allocate<G: LmsGateway>(
    State(session): Shared<G>,
) -> Result<Json<AllocationOutcome>, ApiError> {
    Ok(Json(session.auto_allocate().await?))
}

/// Handler for `POST /api/students/move`.
async fn handle_move<G: LmsGateway>(
    State(session): Shared<G>,
    Json(request): Json<MoveRequest>,
) -> Result<Json<MoveOutcome>, ApiError> {
    Ok(Json(session.move_student(&request).await?))
}

/// Handler for `POST /api/staff/promote`.
async fn handle_promote<G: LmsGateway>(
    State(session): Shared<G>,
    Json(request): Json<PromoteRequest>,
) -> Result<Json<PromotionOutcome>, ApiError> {
    let target = PromotionTarget::from(request.user_id);
    Ok(Json(session.promote(target).await?))
}

/// Handler for `GET /api/audit`.
async fn handle_audit<G: LmsGateway>(
    State(session): Shared<G>,
    Query(params): Query<AuditParams>,
) -> Result<Json<AuditPage>, ApiError> {
    let query = AuditQuery::from_params(
        params.page,
        params.limit,
        params.severity.as_deref(),
        params.category.as_deref(),
    )?;
    Ok(Json(session.audit_log(&query).await?))
}
