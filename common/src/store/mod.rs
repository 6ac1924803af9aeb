//! Persistence for users, bets and tasks.
//!
//! Every operation that reads and then writes a counter or a score does so
//! atomically inside the backend, so concurrent requests for the same user
//! cannot lose updates or push a counter past its limit.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use game::{betting::Settlement, CompletionGuard, TapOutcome};

use crate::{
    error::StoreResult,
    models::{Bet, NewBet, NewTask, NewUser, Profile, ScoreUpdate, Task, User, UserTask},
};

mod memory;
mod postgres;
mod rest;

pub use memory::MemoryStore;
pub use postgres::PgStore;
pub use rest::RestStore;

#[async_trait]
pub trait Store: Send + Sync {
    async fn get_user(&self, id: &str) -> StoreResult<Option<User>>;

    async fn find_user_by_referral_code(&self, code: &str) -> StoreResult<Option<User>>;

    /// Inserts the user and assigns every existing task to them.
    /// Fails with `Conflict` when the id or referral code is taken.
    async fn create_user(&self, user: NewUser, now: DateTime<Utc>) -> StoreResult<User>;

    async fn update_profile(&self, id: &str, profile: &Profile) -> StoreResult<Option<User>>;

    async fn set_scores(
        &self,
        id: &str,
        update: ScoreUpdate,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<User>>;

    /// Applies a batch of taps against the user's boost meter.
    async fn record_taps(
        &self,
        id: &str,
        taps: u32,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<(User, TapOutcome)>>;

    /// Takes one bet from the user's daily allowance, resetting the window
    /// first if it has elapsed. `Ok(None)` means the limit is reached.
    async fn consume_daily_bet(
        &self,
        id: &str,
        limit: u32,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<u32>>;

    /// Fails with `Conflict("pending_bet")` while the user has an unsettled bet.
    async fn insert_bet(&self, bet: NewBet, now: DateTime<Utc>) -> StoreResult<Bet>;

    /// `consume_daily_bet` and `insert_bet` as one unit: either both land or
    /// neither does. Returns the bet and the bets left today, or `Ok(None)`
    /// when the limit is reached.
    async fn place_bet(
        &self,
        bet: NewBet,
        limit: u32,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<(Bet, u32)>>;

    async fn list_bets(&self, user_id: &str, limit: i64) -> StoreResult<Vec<Bet>>;

    async fn get_bet(&self, id: &str) -> StoreResult<Option<Bet>>;

    /// Settles a pending bet and credits its score to the owner.
    /// Fails with `Conflict` when the bet was already settled.
    async fn settle_bet(&self, id: &str, settlement: &Settlement) -> StoreResult<Option<Bet>>;

    async fn list_tasks(&self) -> StoreResult<Vec<Task>>;

    async fn find_task_by_key(&self, key: &str) -> StoreResult<Option<Task>>;

    /// Inserts the task and assigns it to every existing user.
    async fn create_task(&self, task: NewTask) -> StoreResult<Task>;

    async fn list_user_tasks(&self, user_id: &str) -> StoreResult<Vec<UserTask>>;

    async fn get_user_task(&self, user_id: &str, task_id: &str) -> StoreResult<Option<UserTask>>;

    /// Marks the task completed and credits `reward` to the clicker score,
    /// provided `guard` still holds. Fails with `Conflict` otherwise.
    async fn complete_user_task(
        &self,
        user_id: &str,
        task_id: &str,
        guard: CompletionGuard,
        reward: i64,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<UserTask>>;

    /// Users by total score descending, earliest sign-up first on ties.
    async fn top_users(&self, limit: i64) -> StoreResult<Vec<User>>;

    async fn count_users_above(&self, score: i64) -> StoreResult<i64>;

    /// Users with a positive total score.
    async fn count_ranked_users(&self) -> StoreResult<i64>;

    async fn list_referrals(&self, referrer_id: &str) -> StoreResult<Vec<User>>;
}
