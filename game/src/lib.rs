//! Rules of the mini app games: betting rounds, score and rank, clicker
//! boost, task completion, leaderboard ranking and referral codes.
//!
//! Everything in here is pure and clock-injected; persistence and HTTP live
//! in the `common` and `api` crates.

#[macro_use]
mod macros;

agg_mod![betting, clicker, leaderboard, referral, score, tasks];

pub use betting::{BetDirection, BetError, BetResult, BettingRound, DailyBetCounter, RoundState};
pub use clicker::{BoostMeter, ClickError, TapOutcome};
pub use score::{Rank, ScoreCard};
pub use tasks::{CompletionGuard, TaskError, TaskProgress, TaskType};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {kind}: {value}")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}
