use std::cmp::Ordering;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_STAKE: i64 = 10;
pub const DEFAULT_ROUND_SECONDS: i64 = 5;
pub const DEFAULT_DAILY_BET_LIMIT: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BetDirection {
    Up,
    Down,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BetResult {
    Pending,
    Win,
    Lose,
    Draw,
}

impl_enum_str!(BetDirection, Up => "UP", Down => "DOWN");
impl_enum_str!(BetResult, Pending => "PENDING", Win => "WIN", Lose => "LOSE", Draw => "DRAW");

impl BetResult {
    pub fn is_settled(&self) -> bool {
        !matches!(self, BetResult::Pending)
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum BetError {
    #[error("a bet is already in progress")]
    RoundInProgress,
    #[error("no bet is in progress")]
    NoActiveRound,
    #[error("countdown still running ({remaining_secs}s left)")]
    CountdownRunning { remaining_secs: i64 },
    #[error("invalid price: {0}")]
    InvalidPrice(f64),
    #[error("stake must be positive, got {0}")]
    InvalidStake(i64),
    #[error("Daily betting limit reached ({limit} per day)")]
    DailyLimitReached { limit: u32 },
}

/// Outcome of a round given the captured start price and the settlement
/// price. Equal prices are a draw.
pub fn resolve(direction: BetDirection, start_price: f64, end_price: f64) -> BetResult {
    match end_price.partial_cmp(&start_price) {
        Some(Ordering::Greater) if direction == BetDirection::Up => BetResult::Win,
        Some(Ordering::Less) if direction == BetDirection::Down => BetResult::Win,
        Some(Ordering::Greater) | Some(Ordering::Less) => BetResult::Lose,
        _ => BetResult::Draw,
    }
}

/// A win pays the stake back as betting score; losses and draws pay nothing.
pub fn score_for(result: BetResult, stake: i64) -> i64 {
    match result {
        BetResult::Win => stake,
        _ => 0,
    }
}

fn checked_price(price: f64) -> Result<f64, BetError> {
    if price.is_finite() && price > 0.0 {
        Ok(price)
    } else {
        Err(BetError::InvalidPrice(price))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Settlement {
    pub result: BetResult,
    pub end_price: f64,
    pub score_earned: i64,
    pub settled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum RoundState {
    Idle,
    Pending {
        direction: BetDirection,
        stake: i64,
        start_price: f64,
        started_at: DateTime<Utc>,
        deadline: DateTime<Utc>,
    },
    Settled {
        direction: BetDirection,
        stake: i64,
        start_price: f64,
        settlement: Settlement,
    },
}

/// One player's betting round: `Idle -> Pending -> Settled`, where a settled
/// round may be replaced by placing the next bet.
#[derive(Debug, Clone)]
pub struct BettingRound {
    state: RoundState,
    countdown: Duration,
}

impl BettingRound {
    pub fn new(countdown: Duration) -> Self {
        Self {
            state: RoundState::Idle,
            countdown,
        }
    }

    /// Rebuilds a pending round from a stored bet.
    pub fn resume(
        direction: BetDirection,
        stake: i64,
        start_price: f64,
        started_at: DateTime<Utc>,
        countdown: Duration,
    ) -> Self {
        Self {
            state: RoundState::Pending {
                direction,
                stake,
                start_price,
                started_at,
                deadline: started_at + countdown,
            },
            countdown,
        }
    }

    pub fn state(&self) -> &RoundState {
        &self.state
    }

    pub fn place(
        &mut self,
        direction: BetDirection,
        stake: i64,
        start_price: f64,
        now: DateTime<Utc>,
    ) -> Result<(), BetError> {
        if matches!(self.state, RoundState::Pending { .. }) {
            return Err(BetError::RoundInProgress);
        }
        if stake <= 0 {
            return Err(BetError::InvalidStake(stake));
        }
        let start_price = checked_price(start_price)?;

        self.state = RoundState::Pending {
            direction,
            stake,
            start_price,
            started_at: now,
            deadline: now + self.countdown,
        };
        Ok(())
    }

    /// Time left on the countdown, `None` when no round is pending.
    pub fn remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        match &self.state {
            RoundState::Pending { deadline, .. } => Some((*deadline - now).max(Duration::zero())),
            _ => None,
        }
    }

    pub fn settle(&mut self, end_price: f64, now: DateTime<Utc>) -> Result<Settlement, BetError> {
        let RoundState::Pending {
            direction,
            stake,
            start_price,
            deadline,
            ..
        } = self.state
        else {
            return Err(BetError::NoActiveRound);
        };

        if now < deadline {
            let left = deadline - now;
            // round up so "0s left" is never reported while still locked
            let remaining_secs = (left.num_milliseconds() + 999) / 1000;
            return Err(BetError::CountdownRunning { remaining_secs });
        }
        let end_price = checked_price(end_price)?;

        let result = resolve(direction, start_price, end_price);
        let settlement = Settlement {
            result,
            end_price,
            score_earned: score_for(result, stake),
            settled_at: now,
        };
        self.state = RoundState::Settled {
            direction,
            stake,
            start_price,
            settlement,
        };
        Ok(settlement)
    }
}

/// Per-user bet counter over a rolling 24 hour window that starts at
/// `last_reset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DailyBetCounter {
    pub count: u32,
    pub last_reset: DateTime<Utc>,
}

impl DailyBetCounter {
    pub fn window() -> Duration {
        Duration::hours(24)
    }

    pub fn new(count: u32, last_reset: DateTime<Utc>) -> Self {
        Self { count, last_reset }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now - self.last_reset > Self::window()
    }

    /// Zeroes the counter once the window has elapsed. Returns whether a
    /// reset happened.
    pub fn refresh(&mut self, now: DateTime<Utc>) -> bool {
        if self.is_expired(now) {
            self.count = 0;
            self.last_reset = now;
            true
        } else {
            false
        }
    }

    pub fn remaining(&self, now: DateTime<Utc>, limit: u32) -> u32 {
        if self.is_expired(now) {
            limit
        } else {
            limit.saturating_sub(self.count)
        }
    }

    /// Takes one bet from today's allowance and returns how many are left.
    pub fn try_consume(&mut self, now: DateTime<Utc>, limit: u32) -> Result<u32, BetError> {
        self.refresh(now);
        if self.count >= limit {
            return Err(BetError::DailyLimitReached { limit });
        }
        self.count += 1;
        Ok(limit - self.count)
    }
}
