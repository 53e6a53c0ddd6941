//! The scoring backend of a live competition-judging platform.
//!
//! Judges submit numeric votes for competitors across a sequence of rounds.
//! Votes are aggregated into scores with a configurable averaging rule,
//! adjusted by per-competitor per-round credits, and exposed as progressive
//! and final results. Everything consistency-sensitive runs under a single
//! reentrant, timeout-bound guard owned by [`competition::Competition`].

pub mod competition;
pub mod db_util;
pub mod events;
pub mod registry;
pub mod scoring;

use chrono::NaiveDate;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// The persisted vote relation has one column per judge slot.
pub const MAX_JUDGE_SLOTS: u32 = 6;
/// The persisted credit relation has one column per round.
pub const MAX_ROUNDS: u32 = 10;
/// Bounded wait on the instance guard before the call fails closed.
pub const GUARD_TIMEOUT: Duration = Duration::from_secs(20);
/// Highest vote value accepted when the configuration does not say otherwise.
pub const DEFAULT_MAX_VOTE: f64 = 100.0;

/// How a round score is derived from the individual judge votes.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
pub enum AveragingMode {
    /// Plain arithmetic mean of all votes.
    FullMean,
    /// Mean after discarding one lowest and one highest vote.
    TrimmedMean,
}

/// Lifecycle of a competition instance.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompetitionState {
    Configure,
    Running,
    Completed,
}

impl CompetitionState {
    /// Human-readable label for status displays.
    pub fn label(self) -> &'static str {
        match self {
            CompetitionState::Configure => "not started",
            CompetitionState::Running => "running",
            CompetitionState::Completed => "completed",
        }
    }
}

/// The single instance-wide configuration row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Config {
    pub description: String,
    pub date: NaiveDate,
    pub judges: u32,
    pub competitors: u32,
    pub rounds: u32,
    pub current_round: u32,
    pub mode: AveragingMode,
    pub state: CompetitionState,
    pub id: String,
    pub max_vote: f64,
}

/// Everything needed to create a fresh competition.
#[derive(Debug, Clone, PartialEq)]
pub struct CompetitionParams {
    pub description: String,
    pub date: NaiveDate,
    pub judges: u32,
    pub competitors: u32,
    pub rounds: u32,
    pub mode: AveragingMode,
    pub max_vote: f64,
}

impl Default for CompetitionParams {
    fn default() -> Self {
        CompetitionParams {
            description: "unconfigured".to_string(),
            date: chrono::Utc::now().date_naive(),
            judges: 6,
            competitors: 5,
            rounds: 3,
            mode: AveragingMode::FullMean,
            max_vote: DEFAULT_MAX_VOTE,
        }
    }
}

/// Outcome of a judge registration attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RegisterOutcome {
    /// Slot bound (or rebound) to the caller's token.
    Accepted,
    /// Requested slot is outside `[1, judges]`; reports the valid maximum.
    SlotOutOfRange { max_slot: u32 },
    /// Slot is held by a different token. The existing binding stands.
    Conflict,
}

/// Outcome of a vote submission, checked in this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum VoteOutcome {
    Accepted,
    RejectedState,
    RejectedRound,
    RejectedCompetitor,
    RejectedValue,
    RejectedIdentity,
    RejectedDuplicate,
}

impl VoteOutcome {
    pub fn is_accepted(self) -> bool {
        self == VoteOutcome::Accepted
    }

    /// Stable wire code for rejections, `None` for [`VoteOutcome::Accepted`].
    pub fn code(self) -> Option<u8> {
        match self {
            VoteOutcome::Accepted => None,
            VoteOutcome::RejectedState => Some(0),
            VoteOutcome::RejectedRound => Some(1),
            VoteOutcome::RejectedCompetitor => Some(2),
            VoteOutcome::RejectedValue => Some(3),
            VoteOutcome::RejectedIdentity => Some(4),
            VoteOutcome::RejectedDuplicate => Some(5),
        }
    }
}

/// Per-competitor credit record: nickname plus one additive bonus per round.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreditInfo {
    pub nickname: String,
    /// One entry per round slot, defaulting to `0.0`.
    pub credits: Vec<f64>,
}

/// A merge request for one competitor's credit record. Rounds omitted from
/// the map are left untouched, not zeroed.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CreditEdit {
    pub nickname: Option<String>,
    pub rounds: std::collections::BTreeMap<u32, f64>,
}

/// Operator broadcast shown on judge devices, polled via the state summary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessageSummary {
    pub text: String,
    pub index: u64,
}

/// What "announce presence" returns alongside the registration outcome.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateSummary {
    pub current_round: u32,
    pub round_count: u32,
    pub competitor_count: u32,
    pub max_vote: f64,
    pub description: String,
    pub date: NaiveDate,
    pub id: String,
    pub state: CompetitionState,
    pub state_label: String,
    pub message: Option<MessageSummary>,
}

/// Ledger change notifications, queued to observers outside the guard.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum CompetitionEvent {
    VoteRecorded {
        round: u32,
        competitor: u32,
        slot: u32,
        value: f64,
    },
    VotesCleared {
        round: u32,
        competitor: u32,
    },
}

/// Resource faults. Validation rejections are never raised through this type;
/// they come back as [`VoteOutcome`] / [`RegisterOutcome`] values.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// The instance guard could not be acquired within [`GUARD_TIMEOUT`].
    #[error("instance busy: guard acquisition timed out")]
    Busy,
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),
    /// The file's schema version has no forward migration path.
    #[error("unsupported schema version {found}, expected {expected}")]
    SchemaMismatch { found: i32, expected: i32 },
    /// Refusing to create over an existing database.
    #[error("a database already exists at the target location")]
    AlreadyExists,
    /// The configuration row is missing from an otherwise valid file.
    #[error("configuration row missing")]
    MissingConfig,
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, ServiceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test_log::test]
    fn test_rejection_codes_are_stable() {
        // judge devices key their error handling off these
        assert_eq!(VoteOutcome::Accepted.code(), None);
        assert_eq!(VoteOutcome::RejectedState.code(), Some(0));
        assert_eq!(VoteOutcome::RejectedRound.code(), Some(1));
        assert_eq!(VoteOutcome::RejectedCompetitor.code(), Some(2));
        assert_eq!(VoteOutcome::RejectedValue.code(), Some(3));
        assert_eq!(VoteOutcome::RejectedIdentity.code(), Some(4));
        assert_eq!(VoteOutcome::RejectedDuplicate.code(), Some(5));
    }

    #[test_log::test]
    fn test_summary_wire_shape() {
        let summary = StateSummary {
            current_round: 1,
            round_count: 3,
            competitor_count: 50,
            max_vote: 10.0,
            description: "regional finals".to_string(),
            date: NaiveDate::from_ymd_opt(2024, 6, 15).unwrap(),
            id: "deadbeef".to_string(),
            state: CompetitionState::Running,
            state_label: CompetitionState::Running.label().to_string(),
            message: Some(MessageSummary {
                text: "rain delay".to_string(),
                index: 2,
            }),
        };
        let wire = serde_json::to_value(&summary).unwrap();
        assert_eq!(wire["current_round"], 1);
        assert_eq!(wire["date"], "2024-06-15");
        assert_eq!(wire["state"], "Running");
        assert_eq!(wire["state_label"], "running");
        assert_eq!(wire["message"]["index"], 2);
    }
}
