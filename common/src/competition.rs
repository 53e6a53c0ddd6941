//! The competition instance: one authoritative handle over storage, identity
//! bindings, the trial lifecycle, and vote ingestion.

use crate::db_util::{self, config as config_db, credits as credits_db, votes as votes_db};
use crate::events::EventHub;
use crate::registry::JudgeRegistry;
use crate::scoring::{self, CompetitorView};
use crate::{
    CompetitionEvent, CompetitionParams, CompetitionState, Config, CreditEdit, CreditInfo,
    MessageSummary, RegisterOutcome, Result, ServiceError, StateSummary, VoteOutcome,
    GUARD_TIMEOUT, MAX_JUDGE_SLOTS, MAX_ROUNDS,
};
use chrono::{DateTime, Utc};
use crossbeam_channel::Receiver;
use log::{info, warn};
use parking_lot::{ReentrantMutex, ReentrantMutexGuard};
use rand::Rng;
use rusqlite::Connection;
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

struct Inner {
    conn: Connection,
    registry: JudgeRegistry,
    events: EventHub,
    message: Option<String>,
    message_index: u64,
}

/// A live competition instance.
///
/// Every operation that mutates state or depends on cross-entity consistency
/// runs under one reentrant mutex with a bounded acquisition wait. Reentrancy
/// lets composite operations invoke other guarded operations on the same
/// thread without self-deadlock; a caller that cannot acquire the guard in
/// time fails closed with [`ServiceError::Busy`] and no partial effect.
pub struct Competition {
    guard: ReentrantMutex<RefCell<Inner>>,
}

impl Competition {
    /// Create a new competition database at `path`.
    ///
    /// # Errors
    /// Refuses to overwrite a file that already holds a schema.
    pub fn create(path: &Path, params: &CompetitionParams) -> Result<Self> {
        validate_params(params)?;
        let conn = db_util::open_connection(path)?;
        Self::initialize(conn, params)
    }

    /// Create a throwaway in-memory competition, for tests and dry runs.
    pub fn create_in_memory(params: &CompetitionParams) -> Result<Self> {
        validate_params(params)?;
        let conn = db_util::open_in_memory()?;
        Self::initialize(conn, params)
    }

    /// Open an existing competition database, migrating older schemas
    /// forward. Identity bindings are not persisted, so judges re-announce
    /// after a restart while ledger data survives untouched.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = db_util::open_connection(path)?;
        db_util::migrate_to_current(&conn)?;
        let config = config_db::get_config(&conn)?.ok_or(ServiceError::MissingConfig)?;
        info!("opened competition {} ({})", config.id, config.description);
        Ok(Self::wrap(conn))
    }

    fn initialize(conn: Connection, params: &CompetitionParams) -> Result<Self> {
        db_util::create_schema(&conn)?;
        let config = Config {
            description: params.description.clone(),
            date: params.date,
            judges: params.judges,
            competitors: params.competitors,
            rounds: params.rounds,
            current_round: 0,
            mode: params.mode,
            state: CompetitionState::Configure,
            id: fresh_id(),
            max_vote: params.max_vote,
        };
        config_db::insert_config(&conn, &config)?;
        info!("created competition {} ({})", config.id, config.description);
        Ok(Self::wrap(conn))
    }

    fn wrap(conn: Connection) -> Self {
        Competition {
            guard: ReentrantMutex::new(RefCell::new(Inner {
                conn,
                registry: JudgeRegistry::new(),
                events: EventHub::new(),
                message: None,
                message_index: 0,
            })),
        }
    }

    /// Acquire the instance guard, failing closed after [`GUARD_TIMEOUT`].
    fn lock(&self) -> Result<ReentrantMutexGuard<'_, RefCell<Inner>>> {
        self.guard
            .try_lock_for(GUARD_TIMEOUT)
            .ok_or(ServiceError::Busy)
    }

    fn config_of(inner: &Inner) -> Result<Config> {
        config_db::get_config(&inner.conn)?.ok_or(ServiceError::MissingConfig)
    }

    /// The current configuration row.
    pub fn config(&self) -> Result<Config> {
        let guard = self.lock()?;
        let inner = guard.borrow();
        Self::config_of(&inner)
    }

    /// The summary judge devices poll: configuration digest plus the current
    /// operator message, if any.
    pub fn state_summary(&self) -> Result<StateSummary> {
        let guard = self.lock()?;
        let inner = guard.borrow();
        let config = Self::config_of(&inner)?;
        Ok(StateSummary {
            current_round: config.current_round,
            round_count: config.rounds,
            competitor_count: config.competitors,
            max_vote: config.max_vote,
            description: config.description,
            date: config.date,
            id: config.id,
            state: config.state,
            state_label: config.state.label().to_string(),
            message: inner.message.as_ref().map(|text| MessageSummary {
                text: text.clone(),
                index: inner.message_index,
            }),
        })
    }

    /// Bind a judge slot to a device token. See [`JudgeRegistry::register`]
    /// for the eviction and conflict rules.
    pub fn register_judge(&self, slot: u32, token: &str) -> Result<RegisterOutcome> {
        let guard = self.lock()?;
        let mut inner = guard.borrow_mut();
        let config = Self::config_of(&inner)?;
        Ok(inner.registry.register(slot, token, config.judges))
    }

    /// "Announce presence": registration plus a state summary in one guarded
    /// step, so the summary always reflects the registration outcome. The
    /// inner calls re-acquire the guard reentrantly.
    pub fn announce(&self, slot: u32, token: &str) -> Result<(RegisterOutcome, StateSummary)> {
        let _guard = self.lock()?;
        let outcome = self.register_judge(slot, token)?;
        let summary = self.state_summary()?;
        Ok((outcome, summary))
    }

    /// True iff `slot` is currently bound to exactly this token.
    pub fn validate_token(&self, slot: u32, token: &str) -> Result<bool> {
        let guard = self.lock()?;
        let valid = guard.borrow().registry.validate(slot, token);
        Ok(valid)
    }

    /// Ingest one vote. The checks run in a fixed order, short-circuiting,
    /// and together with the slot write they execute atomically under the
    /// guard, so duplicate detection is race-free across concurrent judges.
    pub fn submit_vote(
        &self,
        round: u32,
        competitor: u32,
        slot: u32,
        token: &str,
        value: f64,
    ) -> Result<VoteOutcome> {
        let guard = self.lock()?;
        let mut inner = guard.borrow_mut();
        let config = Self::config_of(&inner)?;

        if config.state != CompetitionState::Running {
            return Ok(VoteOutcome::RejectedState);
        }
        if round != config.current_round {
            return Ok(VoteOutcome::RejectedRound);
        }
        if competitor > config.competitors {
            return Ok(VoteOutcome::RejectedCompetitor);
        }
        if !(0.0..=config.max_vote).contains(&value) {
            return Ok(VoteOutcome::RejectedValue);
        }
        if !inner.registry.validate(slot, token) {
            return Ok(VoteOutcome::RejectedIdentity);
        }
        if !votes_db::record_vote(&inner.conn, round, competitor, slot, value)? {
            warn!("duplicate vote: round {round} competitor {competitor} slot {slot}");
            return Ok(VoteOutcome::RejectedDuplicate);
        }

        info!("vote recorded: round {round} competitor {competitor} slot {slot} value {value}");
        inner.events.emit(CompetitionEvent::VoteRecorded {
            round,
            competitor,
            slot,
            value,
        });
        Ok(VoteOutcome::Accepted)
    }

    /// Null out the given judge slots unconditionally. Restricting this to
    /// the current round while running is the caller's policy, not enforced
    /// here. The only path that un-sets a populated slot.
    pub fn clear_votes(&self, round: u32, competitor: u32, slots: &BTreeSet<u32>) -> Result<()> {
        let guard = self.lock()?;
        let mut inner = guard.borrow_mut();
        votes_db::clear_slots(&inner.conn, round, competitor, slots)?;
        info!("votes cleared: round {round} competitor {competitor} slots {slots:?}");
        inner
            .events
            .emit(CompetitionEvent::VotesCleared { round, competitor });
        Ok(())
    }

    /// Drop the whole (round, competitor) ledger record: the operator's
    /// "wipe this card" action.
    pub fn delete_round_votes(&self, round: u32, competitor: u32) -> Result<()> {
        let guard = self.lock()?;
        let mut inner = guard.borrow_mut();
        votes_db::delete_record(&inner.conn, round, competitor)?;
        info!("votes deleted: round {round} competitor {competitor}");
        inner
            .events
            .emit(CompetitionEvent::VotesCleared { round, competitor });
        Ok(())
    }

    /// Per-round scores, progressive averages, and the final aggregate for
    /// one competitor.
    pub fn competitor_view(&self, competitor: u32) -> Result<CompetitorView> {
        let guard = self.lock()?;
        let inner = guard.borrow();
        let config = Self::config_of(&inner)?;
        let votes =
            votes_db::votes_for_competitor(&inner.conn, competitor, config.rounds, config.judges)?;
        let credits = credits_db::get_credits(&inner.conn, competitor)?;
        Ok(scoring::build_view(
            competitor,
            config.mode,
            &votes,
            &credits.credits,
        ))
    }

    /// One competitor's credit record, defaulted when absent.
    pub fn credits(&self, competitor: u32) -> Result<CreditInfo> {
        let guard = self.lock()?;
        let inner = guard.borrow();
        Ok(credits_db::get_credits(&inner.conn, competitor)?)
    }

    /// Merge credit edits, one entry per competitor. The edit-freeze gate
    /// ([`Competition::can_edit_credits`]) is advisory: the merge always
    /// happens; consulting the gate is the caller's job.
    pub fn set_credits(&self, edits: &BTreeMap<u32, CreditEdit>) -> Result<()> {
        let guard = self.lock()?;
        let inner = guard.borrow();
        for (competitor, edit) in edits {
            credits_db::merge_credits(
                &inner.conn,
                *competitor,
                edit.nickname.as_deref(),
                &edit.rounds,
            )?;
        }
        Ok(())
    }

    /// True until the first vote for `round` is accepted, then permanently
    /// false (slot clears do not reopen the gate).
    pub fn can_edit_credits(&self, round: u32) -> Result<bool> {
        let guard = self.lock()?;
        let inner = guard.borrow();
        Ok(!votes_db::round_has_votes(&inner.conn, round)?)
    }

    /// Configure -> Running.
    pub fn start(&self) -> Result<()> {
        self.set_state(CompetitionState::Running)
    }

    pub fn set_state(&self, state: CompetitionState) -> Result<()> {
        let guard = self.lock()?;
        let inner = guard.borrow();
        config_db::set_state(&inner.conn, state)?;
        info!("state set to {}", state.label());
        Ok(())
    }

    /// Move to the next round if one exists. Returns `(true, new_index)` on
    /// success and `(false, current)` unchanged at the last round; never a
    /// fault, never a wraparound. Recorded votes are untouched either way.
    pub fn advance_round(&self) -> Result<(bool, u32)> {
        let guard = self.lock()?;
        let inner = guard.borrow();
        let config = Self::config_of(&inner)?;
        let next = config.current_round + 1;
        if next >= config.rounds {
            return Ok((false, config.current_round));
        }
        config_db::set_current_round(&inner.conn, next)?;
        info!("advanced to round {next}");
        Ok((true, next))
    }

    /// Running -> Completed. Rounds never reached are truncated away so the
    /// stored round count matches what was actually judged; returns whether
    /// truncation occurred.
    pub fn end(&self) -> Result<bool> {
        let _guard = self.lock()?;
        let config = self.config()?;
        self.set_state(CompetitionState::Completed)?;
        if config.current_round + 1 < config.rounds {
            self.reset_round_count(config.current_round + 1)?;
            info!(
                "competition ended at round {}, truncating round count from {}",
                config.current_round, config.rounds
            );
            return Ok(true);
        }
        Ok(false)
    }

    /// Administrative rewind of the round pointer. Tooling only: bypasses the
    /// normal lifecycle gating.
    pub fn reset_round(&self, round: u32) -> Result<()> {
        let guard = self.lock()?;
        let inner = guard.borrow();
        config_db::set_current_round(&inner.conn, round)?;
        Ok(())
    }

    /// Administrative rewrite of the round count. Tooling only.
    pub fn reset_round_count(&self, rounds: u32) -> Result<()> {
        let guard = self.lock()?;
        let inner = guard.borrow();
        config_db::set_round_count(&inner.conn, rounds)?;
        Ok(())
    }

    /// Competitors with every judge slot set for `round`.
    pub fn count_fully_judged(&self, round: u32) -> Result<u32> {
        let guard = self.lock()?;
        let inner = guard.borrow();
        let config = Self::config_of(&inner)?;
        Ok(votes_db::count_fully_judged(&inner.conn, round, config.judges)?)
    }

    /// Competitors with at least one vote for `round`.
    pub fn count_with_votes(&self, round: u32) -> Result<u32> {
        let guard = self.lock()?;
        let inner = guard.borrow();
        let config = Self::config_of(&inner)?;
        Ok(votes_db::count_with_votes(&inner.conn, round, config.judges)?)
    }

    /// The sorted competitors still waiting on at least one judge for `round`.
    pub fn partially_judged(&self, round: u32) -> Result<Vec<u32>> {
        let guard = self.lock()?;
        let inner = guard.borrow();
        let config = Self::config_of(&inner)?;
        Ok(votes_db::partially_judged(&inner.conn, round, config.judges)?)
    }

    /// Sorted distinct competitors appearing anywhere in the ledger.
    pub fn competitors_with_votes(&self) -> Result<Vec<u32>> {
        let guard = self.lock()?;
        let inner = guard.borrow();
        Ok(votes_db::competitors_with_votes(&inner.conn)?)
    }

    /// Export a full snapshot of persisted state into a fresh file at
    /// `target`, safe while the instance stays live.
    pub fn snapshot_to(&self, target: &Path) -> Result<()> {
        let guard = self.lock()?;
        let inner = guard.borrow();
        db_util::snapshot_to(&inner.conn, target)
    }

    /// Replace the operator broadcast. Judge devices notice the bumped index
    /// in the state summary and show the new text.
    pub fn post_message(&self, text: &str) -> Result<()> {
        let guard = self.lock()?;
        let mut inner = guard.borrow_mut();
        inner.message_index += 1;
        inner.message = Some(text.to_string());
        Ok(())
    }

    /// Open an observer queue for vote-recorded / vote-cleared events.
    pub fn subscribe(&self) -> Result<Receiver<CompetitionEvent>> {
        let guard = self.lock()?;
        let receiver = guard.borrow_mut().events.subscribe();
        Ok(receiver)
    }

    /// Advisory token liveness timestamps for the display layer.
    pub fn heartbeats(&self) -> Result<Vec<(String, DateTime<Utc>)>> {
        let guard = self.lock()?;
        let beats = guard.borrow().registry.heartbeats();
        Ok(beats)
    }
}

fn fresh_id() -> String {
    format!("{:032x}", rand::rng().random::<u128>())
}

fn validate_params(params: &CompetitionParams) -> Result<()> {
    if params.judges == 0 || params.judges > MAX_JUDGE_SLOTS {
        return Err(ServiceError::InvalidConfig(format!(
            "judge count must be within 1..={MAX_JUDGE_SLOTS}"
        )));
    }
    if params.rounds == 0 || params.rounds > MAX_ROUNDS {
        return Err(ServiceError::InvalidConfig(format!(
            "round count must be within 1..={MAX_ROUNDS}"
        )));
    }
    if !params.max_vote.is_finite() || params.max_vote <= 0.0 {
        return Err(ServiceError::InvalidConfig(
            "max vote must be a positive number".to_string(),
        ));
    }
    Ok(())
}
