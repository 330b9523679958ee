//! Sectionwise CLI
//!
//! Main entry point for managing tutorial sections of an LMS course, either
//! through one-shot commands or by serving the dashboard HTTP API.

use std::net::SocketAddr;
use std::path::Path;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use sectionwise_audit::AuditQuery;
use sectionwise_core::{
    create_router, plan_allocation, AllocationOutcome, AllocationPlan, Config, CourseOverview,
    CourseSession, FailureLevel, MoveRequest, PromotionTarget, SectionNaming,
};
use sectionwise_lms::{CanvasClient, SectionId, UserId};
use serde::Serialize;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

/// Default port for the HTTP API server.
const DEFAULT_PORT: u16 = 3000;

/// Sectionwise - Tutorial Section Manager
///
/// Balances students across facilitator-led tutorial sections in a
/// Canvas-style LMS and keeps an audit trail of every change.
#[derive(Parser, Debug)]
#[command(name = "sectionwise")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file (default: sectionwise.json in current directory)
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<String>,

    /// LMS base URL
    #[arg(long, value_name = "URL", env = "SECTIONWISE_ENDPOINT", global = true)]
    endpoint: Option<String>,

    /// LMS access token
    #[arg(long, env = "SECTIONWISE_TOKEN", hide_env_values = true, global = true)]
    token: Option<String>,

    /// Course to manage
    #[arg(long = "course", value_name = "ID", env = "SECTIONWISE_COURSE_ID", global = true)]
    course_id: Option<u64>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Enable verbose output (sets log level to debug)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the dashboard HTTP API
    Serve {
        /// Port for the HTTP API server
        #[arg(short, long, default_value_t = DEFAULT_PORT)]
        port: u16,
    },

    /// Show the course overview
    Overview,

    /// Propose an allocation without changing anything
    Plan,

    /// Allocate every unassigned student into facilitator sections
    Allocate,

    /// Move one student to another section
    Move {
        /// The student's user id
        #[arg(value_name = "STUDENT")]
        student: u64,

        /// Current section (omit to move the student's only enrollment)
        #[arg(long, value_name = "SECTION")]
        from: Option<u64>,

        /// Target section
        #[arg(long, value_name = "SECTION")]
        to: u64,

        /// Why the student is moved
        #[arg(short, long)]
        justification: Option<String>,
    },

    /// Promote a staff member to facilitator
    Promote {
        /// User to promote (default: the token's own user)
        #[arg(long, value_name = "USER")]
        user: Option<u64>,
    },

    /// Show the audit log
    Audit {
        /// Page number
        #[arg(long, default_value_t = 1)]
        page: usize,

        /// Entries per page
        #[arg(long, default_value_t = 50)]
        limit: usize,

        /// Severity filter: info, warning, critical or all
        #[arg(long)]
        severity: Option<String>,

        /// Category filter: create, allocation, move, override, enrollment, other or all
        #[arg(long)]
        category: Option<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    // Parse CLI arguments
    let args = Args::parse();

    // Initialize tracing subscriber with appropriate filter
    // Priority: RUST_LOG env var > --verbose flag > default (info)
    let filter = if args.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    tracing::debug!(config = ?args.config, "Config file");

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::from(1)
        }
    }
}

/// Loads the configuration, opens the session and dispatches the command.
async fn run(args: Args) -> anyhow::Result<()> {
    let config = load_config(args.config.as_deref())?.with_overrides(
        args.endpoint,
        args.token,
        args.course_id,
    );
    config.validate()?;

    let session = CourseSession::connect(config)?;
    let json = args.json;

    match args.command {
        Command::Serve { port } => serve(session, port).await,
        Command::Overview => {
            let overview = session.overview().await?;
            output(json, &overview, print_overview)
        }
        Command::Plan => {
            let roster = session.sync().await?;
            let plan = plan_allocation(
                &roster.students,
                &roster.facilitators,
                &SectionNaming::default(),
            )?;
            output(json, &plan, print_plan)
        }
        Command::Allocate => {
            let outcome = session.auto_allocate().await?;
            output(json, &outcome, print_outcome)?;
            if outcome.failed > 0 {
                anyhow::bail!("{} of {} students were not allocated", outcome.failed, outcome.total_students);
            }
            Ok(())
        }
        Command::Move {
            student,
            from,
            to,
            justification,
        } => {
            let mut request = MoveRequest::new(UserId(student), from.map(SectionId), SectionId(to));
            if let Some(justification) = justification {
                request = request.with_justification(justification);
            }
            let outcome = session.move_student(&request).await?;
            output(json, &outcome, |o| {
                println!(
                    "Moved student {student}: enrollment {} replaced by {}",
                    o.old_enrollment_id, o.new_enrollment_id
                );
            })
        }
        Command::Promote { user } => {
            let outcome = session
                .promote(PromotionTarget::from(user.map(UserId)))
                .await?;
            output(json, &outcome, |o| {
                if o.already_has_role {
                    println!("User {} is already a facilitator", o.user_id);
                } else {
                    println!("User {} promoted to facilitator", o.user_id);
                }
            })
        }
        Command::Audit {
            page,
            limit,
            severity,
            category,
        } => {
            let query = AuditQuery::from_params(
                Some(page),
                Some(limit),
                severity.as_deref(),
                category.as_deref(),
            )?;
            let page = session.audit_log(&query).await?;
            output(json, &page, |p| {
                println!(
                    "Audit log: page {}/{} ({} entries; {} info, {} warning, {} critical)",
                    p.pagination.page,
                    p.pagination.total_pages.max(1),
                    p.pagination.total,
                    p.summary.info,
                    p.summary.warning,
                    p.summary.critical
                );
                for entry in &p.entries {
                    println!(
                        "  {} [{}] {} - {} ({})",
                        entry.timestamp.format("%Y-%m-%d %H:%M"),
                        entry.severity,
                        entry.action,
                        entry.details,
                        entry.actor
                    );
                }
            })
        }
    }
}

/// Serves the HTTP API until Ctrl+C.
async fn serve(session: CourseSession<CanvasClient>, port: u16) -> anyhow::Result<()> {
    let course = session.test_connection().await?;
    println!("Connected to course: {} ({})", course.name, course.id);

    let addr: SocketAddr = ([127, 0, 0, 1], port).into();
    let listener = TcpListener::bind(addr).await.map_err(|e| {
        anyhow::anyhow!("Failed to bind to {addr}: {e}\n\nSuggestion: Try a different port with --port")
    })?;

    println!("HTTP API server running on http://{addr}");
    println!("Press Ctrl+C to stop");

    axum::serve(listener, create_router(session))
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            }
        })
        .await?;

    println!("Server stopped");
    Ok(())
}

/// Loads configuration from file or defaults.
fn load_config(config_path: Option<&str>) -> anyhow::Result<Config> {
    match config_path {
        Some(path_str) => {
            let path = Path::new(path_str);
            if !path.exists() {
                anyhow::bail!(
                    "Config file not found: '{}'\n\nSuggestion: Check the path or remove the --config flag to use defaults",
                    path.display()
                );
            }
            Config::load_from_file(path).map_err(|e| anyhow::anyhow!("{e}"))
        }
        None => Config::load().map_err(|e| anyhow::anyhow!("{e}")),
    }
}

/// Prints `value` as JSON or through the human-readable printer.
fn output<T: Serialize>(json: bool, value: &T, print: impl FnOnce(&T)) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        print(value);
    }
    Ok(())
}

fn print_overview(overview: &CourseOverview) {
    let stats = &overview.stats;
    println!("Course: {} ({})", overview.course.name, overview.course.id);
    println!("  Students: {}", stats.total_students);
    println!("  Unassigned students: {}", stats.unassigned_students);
    println!("  New enrollments: {}", stats.new_enrollments);
    println!("  Facilitators: {}", stats.facilitators);
    println!(
        "  Sections: {} tool, {} external",
        stats.tool_sections, stats.external_sections
    );
    println!("  Recommended sections: {}", stats.recommended_sections);
    println!("  Census date: {}", stats.census_date);
    if let Some(lic) = &overview.lic {
        println!("  LIC: {}", lic.name);
    }

    println!();
    println!("Sections:");
    for summary in &overview.sections {
        println!(
            "  {:>8}  {} [{:?}] {}",
            summary.section.id, summary.section.display_name, summary.section.provenance, summary.ratio
        );
    }
    if overview.facilitators.is_empty() {
        println!();
        println!("No facilitators found. Promote a staff member with `sectionwise promote`.");
    }
}

fn print_plan(plan: &AllocationPlan) {
    if plan.is_empty() {
        println!("Nothing to allocate: every student is in a managed section");
        return;
    }
    println!(
        "Allocation plan: {} students, up to {} per section",
        plan.total_students, plan.per_section
    );
    for section in &plan.sections {
        println!("  {} ({} students)", section.display_name, section.students.len());
    }
}

fn print_outcome(outcome: &AllocationOutcome) {
    println!(
        "Allocated {} of {} students across {} new sections",
        outcome.allocated, outcome.total_students, outcome.sections_created
    );
    for name in &outcome.created_sections {
        println!("  Created: {name}");
    }
    for failure in &outcome.errors {
        let level = match failure.level {
            FailureLevel::Error => "ERROR",
            FailureLevel::Warning => "WARN",
        };
        println!("  {level} {} ({}): {}", failure.section, failure.facilitator.name, failure.message);
    }
}
