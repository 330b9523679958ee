//! Sectionwise Core
//!
//! Roster classification, allocation of students into facilitator sections,
//! safe single-student moves, role promotion, and the HTTP API the dashboard
//! talks to.

pub mod allocation;
pub mod api;
pub mod audit;
pub mod config;
pub mod error;
pub mod promotion;
pub mod roster;
pub mod session;
pub mod transfer;

pub use allocation::{
    plan_allocation, AllocationFailure, AllocationOutcome, AllocationPlan, FailureLevel,
    PlannedFacilitator, PlannedSection, PlannedStudent, SectionNaming,
};
pub use api::{
    create_router, AuditParams, CreateSectionRequest, ErrorResponse, PromoteRequest,
    SetupResponse,
};
pub use config::{Config, Connection, Secret};
pub use error::{Result, SectionwiseError};
pub use promotion::{PromotionOutcome, PromotionTarget};
pub use roster::{
    classify_roster, email_for, section_provenance, Facilitator, Provenance, Roster,
    RosterSettings, SectionView, StaffMember, Student, TOOL_SECTION_BASE,
};
pub use session::{sis_section_id, CourseOverview, CourseSession, OverviewStats, SectionSummary};
pub use transfer::{MoveOutcome, MoveRequest, NO_JUSTIFICATION};
