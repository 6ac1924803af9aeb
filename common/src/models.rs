use chrono::{DateTime, Duration, Utc};
use game::{
    leaderboard, BetDirection, BetResult, BettingRound, BoostMeter, DailyBetCounter, Rank,
    ScoreCard, TaskProgress, TaskType,
};
use serde::{Deserialize, Serialize};

pub use game::leaderboard::LeaderboardEntry;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: String,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub clicker_score: i64,
    pub betting_score: i64,
    pub total_score: i64,
    pub daily_bets: i32,
    pub last_bet_reset: DateTime<Utc>,
    pub last_click_time: DateTime<Utc>,
    pub boost: i32,
    pub last_boost_refresh: Option<DateTime<Utc>>,
    pub referral_code: String,
    pub referrer_id: Option<String>,
}

impl User {
    pub fn scores(&self) -> ScoreCard {
        ScoreCard::new(self.clicker_score, self.betting_score)
    }

    /// Copies a score card into all three columns so the total never drifts.
    pub fn apply_scores(&mut self, card: ScoreCard) {
        self.clicker_score = card.clicker;
        self.betting_score = card.betting;
        self.total_score = card.total();
    }

    pub fn rank(&self) -> Rank {
        Rank::for_score(self.total_score)
    }

    pub fn bet_counter(&self) -> DailyBetCounter {
        DailyBetCounter::new(self.daily_bets.max(0) as u32, self.last_bet_reset)
    }

    pub fn boost_meter(&self) -> BoostMeter {
        BoostMeter::new(self.boost.max(0) as u32, self.last_boost_refresh)
    }

    pub fn apply_boost(&mut self, meter: BoostMeter) {
        self.boost = meter.boost as i32;
        self.last_boost_refresh = meter.last_refresh;
    }

    pub fn display_name(&self) -> String {
        leaderboard::display_name(
            self.username.as_deref(),
            self.first_name.as_deref(),
            self.last_name.as_deref(),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUser {
    pub id: String,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub referral_code: String,
    pub referrer_id: Option<String>,
}

impl NewUser {
    pub fn into_user(self, now: DateTime<Utc>) -> User {
        let boost = BoostMeter::default();
        User {
            id: self.id,
            username: self.username,
            first_name: self.first_name,
            last_name: self.last_name,
            created_at: now,
            clicker_score: 0,
            betting_score: 0,
            total_score: 0,
            daily_bets: 0,
            last_bet_reset: now,
            last_click_time: now,
            boost: boost.boost as i32,
            last_boost_refresh: boost.last_refresh,
            referral_code: self.referral_code,
            referrer_id: self.referrer_id,
        }
    }
}

/// Profile fields to overwrite; `None` leaves the stored value alone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Profile {
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

impl Profile {
    pub fn is_empty(&self) -> bool {
        self.username.is_none() && self.first_name.is_none() && self.last_name.is_none()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScoreUpdate {
    pub clicker: Option<i64>,
    pub betting: Option<i64>,
}

impl ScoreUpdate {
    pub fn is_empty(&self) -> bool {
        self.clicker.is_none() && self.betting.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub name: String,
    pub description: String,
    pub score_reward: i64,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    pub task_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NewTask {
    pub name: String,
    pub description: String,
    pub score_reward: i64,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    pub task_key: String,
}

impl NewTask {
    pub fn into_task(self, id: String) -> Task {
        Task {
            id,
            name: self.name,
            description: self.description,
            score_reward: self.score_reward,
            task_type: self.task_type,
            task_key: self.task_key,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserTask {
    pub id: String,
    pub user_id: String,
    pub task_id: String,
    pub completed: bool,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<Task>,
}

impl UserTask {
    pub fn progress(&self) -> TaskProgress {
        TaskProgress {
            completed: self.completed,
            completed_at: self.completed_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bet {
    pub id: String,
    pub user_id: String,
    pub amount: i64,
    #[serde(rename = "type")]
    pub direction: BetDirection,
    pub created_at: DateTime<Utc>,
    pub result: BetResult,
    pub score_earned: i64,
    pub sol_price_start: f64,
    pub sol_price_end: Option<f64>,
    pub settled_at: Option<DateTime<Utc>>,
}

impl Bet {
    /// The betting round this stored bet is in.
    pub fn round(&self, countdown: Duration) -> BettingRound {
        BettingRound::resume(
            self.direction,
            self.amount,
            self.sol_price_start,
            self.created_at,
            countdown,
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewBet {
    pub user_id: String,
    pub direction: BetDirection,
    pub amount: i64,
    pub sol_price_start: f64,
}

impl NewBet {
    pub fn into_bet(self, id: String, now: DateTime<Utc>) -> Bet {
        Bet {
            id,
            user_id: self.user_id,
            amount: self.amount,
            direction: self.direction,
            created_at: now,
            result: BetResult::Pending,
            score_earned: 0,
            sol_price_start: self.sol_price_start,
            sol_price_end: None,
            settled_at: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserRank {
    pub id: String,
    pub username: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub total_score: i64,
    pub rank: i64,
    #[serde(rename = "totalUsers")]
    pub total_users: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Referral {
    pub id: String,
    pub username: String,
    pub created_at: DateTime<Utc>,
    pub total_score: i64,
}

impl From<&User> for Referral {
    fn from(user: &User) -> Self {
        Referral {
            id: user.id.clone(),
            username: user.display_name(),
            created_at: user.created_at,
            total_score: user.total_score,
        }
    }
}

pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
