//! The judge-facing HTTP boundary for a podium scoring instance.
//!
//! Transport only: every decision lives in `podium_common`. Typed rejection
//! outcomes map onto the wire codes judge devices expect; resource faults map
//! uniformly onto 503.

#[macro_use]
extern crate rocket;

use clap::Parser;
use podium_common::competition::Competition;
use podium_common::{
    AveragingMode, CompetitionParams, RegisterOutcome, ServiceError, VoteOutcome,
};
use rocket::http::Status;
use rocket::serde::json::{json, Json, Value};
use rocket::State;
use rocket_prometheus::PrometheusMetrics;
use serde::Deserialize;
use std::path::PathBuf;
use tracing::error;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the competition database
    #[arg(env = "PODIUM_DB")]
    db: PathBuf,

    /// Create a fresh competition at the path instead of opening one
    #[arg(long, env = "PODIUM_CREATE")]
    create: bool,

    /// Description for a newly created competition
    #[arg(long, default_value = "unconfigured", env = "PODIUM_DESCRIPTION")]
    description: String,

    /// Judge count for a newly created competition
    #[arg(long, default_value_t = 6, env = "PODIUM_JUDGES")]
    judges: u32,

    /// Competitor count for a newly created competition
    #[arg(long, default_value_t = 50, env = "PODIUM_COMPETITORS")]
    competitors: u32,

    /// Round count for a newly created competition
    #[arg(long, default_value_t = 3, env = "PODIUM_ROUNDS")]
    rounds: u32,

    /// Averaging rule for a newly created competition
    #[arg(long, value_enum, default_value = "full-mean", env = "PODIUM_MODE")]
    mode: AveragingMode,

    /// Vote ceiling for a newly created competition
    #[arg(long, default_value_t = 100.0, env = "PODIUM_MAX_VOTE")]
    max_vote: f64,
}

type ApiResponse = (Status, Value);

/// Every resource fault looks the same from outside; retrying is the
/// caller's business.
fn unavailable(fault: &ServiceError) -> ApiResponse {
    error!("service fault: {fault}");
    (
        Status::ServiceUnavailable,
        json!({"error": "service unavailable"}),
    )
}

#[get("/state")]
fn state(competition: &State<Competition>) -> ApiResponse {
    match competition.state_summary() {
        Ok(summary) => (Status::Ok, json!(summary)),
        Err(fault) => unavailable(&fault),
    }
}

#[derive(Debug, Deserialize)]
struct RegisterRequest {
    judge: i64,
    token: Option<String>,
}

#[post("/register", format = "json", data = "<request>")]
fn register(request: Json<RegisterRequest>, competition: &State<Competition>) -> ApiResponse {
    // a missing token never reaches the registry
    let Some(token) = request.token.as_deref() else {
        return (Status::BadRequest, json!({"error": "token is required"}));
    };
    let slot = u32::try_from(request.judge).unwrap_or(0);

    match competition.announce(slot, token) {
        Ok((RegisterOutcome::Accepted, summary)) => (Status::Ok, json!(summary)),
        Ok((RegisterOutcome::SlotOutOfRange { max_slot }, _)) => (
            Status::NotFound,
            json!({"error": "judge not in range", "max": max_slot}),
        ),
        Ok((RegisterOutcome::Conflict, _)) => {
            (Status::Forbidden, json!({"error": "judge in use"}))
        }
        Err(fault) => unavailable(&fault),
    }
}

#[derive(Debug, Deserialize)]
struct VoteRequest {
    trial: i64,
    competitor: i64,
    judge: i64,
    token: Option<String>,
    vote: f64,
}

#[post("/vote", format = "json", data = "<request>")]
fn vote(request: Json<VoteRequest>, competition: &State<Competition>) -> ApiResponse {
    let Some(token) = request.token.as_deref() else {
        return (Status::BadRequest, json!({"error": "token is required"}));
    };
    // Negative indices can never match anything valid; fold them onto the
    // nearest out-of-range value so the engine rejects them as usual.
    let round = u32::try_from(request.trial).unwrap_or(u32::MAX);
    let competitor = u32::try_from(request.competitor).unwrap_or(u32::MAX);
    let slot = u32::try_from(request.judge).unwrap_or(0);

    match competition.submit_vote(round, competitor, slot, token, request.vote) {
        Ok(VoteOutcome::Accepted) => (Status::Ok, json!({})),
        Ok(outcome) => {
            let status = match outcome {
                VoteOutcome::RejectedState => Status::InternalServerError,
                _ => Status::Forbidden,
            };
            (status, json!({"code": outcome.code(), "error": reason(outcome)}))
        }
        Err(fault) => unavailable(&fault),
    }
}

fn reason(outcome: VoteOutcome) -> &'static str {
    match outcome {
        VoteOutcome::Accepted => "accepted",
        VoteOutcome::RejectedState => "competition not running",
        VoteOutcome::RejectedRound => "round not accepted",
        VoteOutcome::RejectedCompetitor => "competitor not valid",
        VoteOutcome::RejectedValue => "vote not valid",
        VoteOutcome::RejectedIdentity => "judge not matching registered token",
        VoteOutcome::RejectedDuplicate => "duplicate",
    }
}

#[catch(404)]
fn not_found() -> Value {
    json!("The requested resource could not be found.")
}

#[launch]
fn rocket() -> _ {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let result = if cli.create {
        Competition::create(
            &cli.db,
            &CompetitionParams {
                description: cli.description.clone(),
                judges: cli.judges,
                competitors: cli.competitors,
                rounds: cli.rounds,
                mode: cli.mode,
                max_vote: cli.max_vote,
                ..CompetitionParams::default()
            },
        )
    } else {
        Competition::open(&cli.db)
    };
    let competition = match result {
        Ok(competition) => competition,
        Err(fault) => {
            error!("could not open {}: {fault}", cli.db.display());
            std::process::exit(1);
        }
    };

    let prometheus = PrometheusMetrics::new();
    rocket::build()
        .attach(prometheus.clone())
        .manage(competition)
        .mount("/", routes![state, register, vote])
        .mount("/metrics", prometheus)
        .register("/", catchers![not_found])
}
