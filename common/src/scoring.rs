//! Derives round scores, progressive averages, and final aggregates from raw
//! judge votes and per-round credits.
//!
//! Nothing here rounds: display rounding belongs to the presentation layer,
//! and chained aggregates are computed over the exact values.

use crate::AveragingMode;
use itertools::Itertools;
use itertools::MinMaxResult::MinMax;
use serde::Serialize;

/// One round of a competitor's card.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoundScore {
    /// Raw judge votes, indexed by slot - 1.
    pub votes: Vec<Option<f64>>,
    /// Derived score; provisional while the round is partial.
    pub raw_score: Option<f64>,
    /// `raw_score` plus this round's credit.
    pub score_with_credit: Option<f64>,
    /// Prefix mean of `raw_score` through this round, unset from the first
    /// gap onward.
    pub running_average: Option<f64>,
    /// Prefix mean of `score_with_credit` through this round.
    pub running_average_with_credit: Option<f64>,
    /// True when some but not all judge slots are set.
    pub partial: bool,
}

/// Final aggregates, present only once every round has a defined score.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FinalStanding {
    pub average: f64,
    pub average_with_credit: f64,
    pub sum: f64,
}

/// Everything the operator sees for one competitor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompetitorView {
    pub competitor: u32,
    pub rounds: Vec<RoundScore>,
    pub standing: Option<FinalStanding>,
}

/// Plain arithmetic mean.
pub fn full_mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Mean after discarding one lowest and one highest value. Undefined below
/// three values; the score stays unset rather than faulting.
pub fn trimmed_mean(values: &[f64]) -> Option<f64> {
    if values.len() < 3 {
        return None;
    }
    match values.iter().copied().minmax() {
        MinMax(min, max) => {
            Some((values.iter().sum::<f64>() - min - max) / (values.len() - 2) as f64)
        }
        _ => None,
    }
}

/// Score a set of votes under the configured averaging rule.
pub fn score_votes(mode: AveragingMode, values: &[f64]) -> Option<f64> {
    match mode {
        AveragingMode::FullMean => full_mean(values),
        AveragingMode::TrimmedMean => trimmed_mean(values),
    }
}

/// Build the full per-competitor view from the ledger rows and credits.
///
/// `votes_by_round` is indexed `[round][slot - 1]`; `credits` has one entry
/// per round (missing entries count as zero).
pub fn build_view(
    competitor: u32,
    mode: AveragingMode,
    votes_by_round: &[Vec<Option<f64>>],
    credits: &[f64],
) -> CompetitorView {
    let mut rounds: Vec<RoundScore> = Vec::with_capacity(votes_by_round.len());
    for (index, votes) in votes_by_round.iter().enumerate() {
        let present: Vec<f64> = votes.iter().flatten().copied().collect();
        let raw_score = score_votes(mode, &present);
        let partial = !present.is_empty() && present.len() < votes.len();
        let credit = credits.get(index).copied().unwrap_or(0.0);
        rounds.push(RoundScore {
            votes: votes.clone(),
            raw_score,
            score_with_credit: raw_score.map(|score| score + credit),
            running_average: None,
            running_average_with_credit: None,
            partial,
        });
    }

    // Strict left-to-right prefix averages: the first missing score ends the
    // series, no matter what comes after it.
    let mut sum = 0.0;
    for (index, round) in rounds.iter_mut().enumerate() {
        match round.raw_score {
            Some(score) => {
                sum += score;
                round.running_average = Some(sum / (index + 1) as f64);
            }
            None => break,
        }
    }
    let mut sum = 0.0;
    for (index, round) in rounds.iter_mut().enumerate() {
        match round.score_with_credit {
            Some(score) => {
                sum += score;
                round.running_average_with_credit = Some(sum / (index + 1) as f64);
            }
            None => break,
        }
    }

    let standing = if !rounds.is_empty() && rounds.iter().all(|round| round.raw_score.is_some()) {
        let raw: Vec<f64> = rounds.iter().filter_map(|round| round.raw_score).collect();
        let with_credit: Vec<f64> = rounds
            .iter()
            .filter_map(|round| round.score_with_credit)
            .collect();
        Some(FinalStanding {
            average: raw.iter().sum::<f64>() / raw.len() as f64,
            average_with_credit: with_credit.iter().sum::<f64>() / with_credit.len() as f64,
            sum: with_credit.iter().sum(),
        })
    } else {
        None
    };

    CompetitorView {
        competitor,
        rounds,
        standing,
    }
}
