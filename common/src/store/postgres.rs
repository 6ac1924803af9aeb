use async_trait::async_trait;
use chrono::{DateTime, Utc};
use game::{betting::Settlement, CompletionGuard, DailyBetCounter, TapOutcome};
use sqlx::{FromRow, PgConnection, PgPool};
use tracing::debug;

use super::Store;
use crate::{
    error::{StoreError, StoreResult},
    models::{new_id, Bet, NewBet, NewTask, NewUser, Profile, ScoreUpdate, Task, User, UserTask},
};

#[derive(FromRow)]
struct TaskRow {
    id: String,
    name: String,
    description: String,
    score_reward: i64,
    #[sqlx(rename = "type")]
    task_type: String,
    task_key: String,
}

impl TryFrom<TaskRow> for Task {
    type Error = StoreError;

    fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
        Ok(Task {
            id: row.id,
            name: row.name,
            description: row.description,
            score_reward: row.score_reward,
            task_type: row.task_type.parse()?,
            task_key: row.task_key,
        })
    }
}

#[derive(FromRow)]
struct BetRow {
    id: String,
    user_id: String,
    amount: i64,
    #[sqlx(rename = "type")]
    direction: String,
    created_at: DateTime<Utc>,
    result: String,
    score_earned: i64,
    sol_price_start: f64,
    sol_price_end: Option<f64>,
    settled_at: Option<DateTime<Utc>>,
}

impl TryFrom<BetRow> for Bet {
    type Error = StoreError;

    fn try_from(row: BetRow) -> Result<Self, Self::Error> {
        Ok(Bet {
            id: row.id,
            user_id: row.user_id,
            amount: row.amount,
            direction: row.direction.parse()?,
            created_at: row.created_at,
            result: row.result.parse()?,
            score_earned: row.score_earned,
            sol_price_start: row.sol_price_start,
            sol_price_end: row.sol_price_end,
            settled_at: row.settled_at,
        })
    }
}

#[derive(FromRow)]
struct UserTaskRow {
    id: String,
    user_id: String,
    task_id: String,
    completed: bool,
    completed_at: Option<DateTime<Utc>>,
    task_name: String,
    task_description: String,
    task_score_reward: i64,
    task_type: String,
    task_key: String,
}

impl TryFrom<UserTaskRow> for UserTask {
    type Error = StoreError;

    fn try_from(row: UserTaskRow) -> Result<Self, Self::Error> {
        let task = Task {
            id: row.task_id.clone(),
            name: row.task_name,
            description: row.task_description,
            score_reward: row.task_score_reward,
            task_type: row.task_type.parse()?,
            task_key: row.task_key,
        };
        Ok(UserTask {
            id: row.id,
            user_id: row.user_id,
            task_id: row.task_id,
            completed: row.completed,
            completed_at: row.completed_at,
            task: Some(task),
        })
    }
}

const USER_TASK_SELECT: &str = "SELECT ut.id, ut.user_id, ut.task_id, ut.completed, ut.completed_at, \
     t.name AS task_name, t.description AS task_description, \
     t.score_reward AS task_score_reward, t.type AS task_type, t.task_key \
     FROM user_tasks ut JOIN tasks t ON t.id = ut.task_id";

/// Maps a unique-constraint violation to `Conflict`, naming the column the
/// constraint covers when it is recognisable.
fn unique_violation(err: sqlx::Error, fallback: &'static str) -> StoreError {
    if let Some(db_err) = err.as_database_error() {
        if db_err.code().as_deref() == Some("23505") {
            let what = match db_err.constraint() {
                Some(name) if name.contains("referral_code") => "referral_code",
                Some(name) if name.contains("task_key") => "task_key",
                Some(name) if name.contains("pending") => "pending_bet",
                _ => fallback,
            };
            return StoreError::Conflict(what);
        }
    }
    StoreError::Database(err)
}

/// Conditional increment of the daily counter; resets the window first when
/// it has elapsed. `None` once the limit is reached.
async fn take_daily_bet(
    conn: &mut PgConnection,
    id: &str,
    limit: u32,
    now: DateTime<Utc>,
) -> StoreResult<Option<u32>> {
    let cutoff = now - DailyBetCounter::window();
    let count: Option<i32> = sqlx::query_scalar(
        "UPDATE users SET \
         daily_bets = CASE WHEN last_bet_reset < $3 THEN 1 ELSE daily_bets + 1 END, \
         last_bet_reset = CASE WHEN last_bet_reset < $3 THEN $4 ELSE last_bet_reset END \
         WHERE id = $1 AND $2 > 0 AND (last_bet_reset < $3 OR daily_bets < $2) \
         RETURNING daily_bets",
    )
    .bind(id)
    .bind(limit as i32)
    .bind(cutoff)
    .bind(now)
    .fetch_optional(&mut *conn)
    .await?;

    match count {
        Some(count) => Ok(Some(limit.saturating_sub(count.max(0) as u32))),
        None => {
            let exists: bool =
                sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM users WHERE id = $1)")
                    .bind(id)
                    .fetch_one(&mut *conn)
                    .await?;
            if exists {
                Ok(None)
            } else {
                Err(StoreError::NotFound("user"))
            }
        }
    }
}

/// The partial unique index on pending bets turns a second open round into
/// `Conflict("pending_bet")`.
async fn insert_bet_row(
    conn: &mut PgConnection,
    bet: NewBet,
    now: DateTime<Utc>,
) -> StoreResult<Bet> {
    let row: BetRow = sqlx::query_as(
        "INSERT INTO bets (id, user_id, amount, type, created_at, sol_price_start) \
         VALUES ($1, $2, $3, $4, $5, $6) RETURNING *",
    )
    .bind(new_id())
    .bind(&bet.user_id)
    .bind(bet.amount)
    .bind(bet.direction.as_str())
    .bind(now)
    .bind(bet.sol_price_start)
    .fetch_one(&mut *conn)
    .await
    .map_err(|err| unique_violation(err, "pending_bet"))?;
    row.try_into()
}

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Store for PgStore {
    async fn get_user(&self, id: &str) -> StoreResult<Option<User>> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    async fn find_user_by_referral_code(&self, code: &str) -> StoreResult<Option<User>> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE referral_code = $1")
            .bind(code)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    async fn create_user(&self, user: NewUser, now: DateTime<Utc>) -> StoreResult<User> {
        let user = user.into_user(now);
        let mut tx = self.pool.begin().await?;

        let created: User = sqlx::query_as(
            "INSERT INTO users (id, username, first_name, last_name, created_at, \
             last_bet_reset, last_click_time, boost, last_boost_refresh, referral_code, referrer_id) \
             VALUES ($1, $2, $3, $4, $5, $5, $5, $6, $7, $8, $9) RETURNING *",
        )
        .bind(&user.id)
        .bind(&user.username)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(now)
        .bind(user.boost)
        .bind(user.last_boost_refresh)
        .bind(&user.referral_code)
        .bind(&user.referrer_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|err| unique_violation(err, "user"))?;

        sqlx::query(
            "INSERT INTO user_tasks (user_id, task_id) SELECT $1, id FROM tasks \
             ON CONFLICT (user_id, task_id) DO NOTHING",
        )
        .bind(&created.id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        debug!("Created user {}", created.id);
        Ok(created)
    }

    async fn update_profile(&self, id: &str, profile: &Profile) -> StoreResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            "UPDATE users SET username = COALESCE($2, username), \
             first_name = COALESCE($3, first_name), last_name = COALESCE($4, last_name) \
             WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .bind(&profile.username)
        .bind(&profile.first_name)
        .bind(&profile.last_name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn set_scores(
        &self,
        id: &str,
        update: ScoreUpdate,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            "UPDATE users SET clicker_score = COALESCE($2, clicker_score), \
             betting_score = COALESCE($3, betting_score), \
             total_score = COALESCE($2, clicker_score) + COALESCE($3, betting_score), \
             last_click_time = CASE WHEN $2::BIGINT IS NULL THEN last_click_time ELSE $4 END \
             WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .bind(update.clicker)
        .bind(update.betting)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn record_taps(
        &self,
        id: &str,
        taps: u32,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<(User, TapOutcome)>> {
        let mut tx = self.pool.begin().await?;

        let user: Option<User> = sqlx::query_as("SELECT * FROM users WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
        let Some(user) = user else {
            return Ok(None);
        };

        let mut meter = user.boost_meter();
        let outcome = meter.tap(taps, now)?;

        let updated: User = sqlx::query_as(
            "UPDATE users SET clicker_score = clicker_score + $2, \
             total_score = total_score + $2, boost = $3, last_boost_refresh = $4, \
             last_click_time = $5 WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .bind(outcome.points)
        .bind(meter.boost as i32)
        .bind(meter.last_refresh)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some((updated, outcome)))
    }

    async fn consume_daily_bet(
        &self,
        id: &str,
        limit: u32,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<u32>> {
        let mut conn = self.pool.acquire().await?;
        take_daily_bet(&mut *conn, id, limit, now).await
    }

    async fn insert_bet(&self, bet: NewBet, now: DateTime<Utc>) -> StoreResult<Bet> {
        let mut conn = self.pool.acquire().await?;
        insert_bet_row(&mut *conn, bet, now).await
    }

    async fn place_bet(
        &self,
        bet: NewBet,
        limit: u32,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<(Bet, u32)>> {
        let mut tx = self.pool.begin().await?;
        // dropping the transaction on any early return rolls the counter back
        let Some(remaining) = take_daily_bet(&mut *tx, &bet.user_id, limit, now).await? else {
            return Ok(None);
        };
        let bet = insert_bet_row(&mut *tx, bet, now).await?;
        tx.commit().await?;
        Ok(Some((bet, remaining)))
    }

    async fn list_bets(&self, user_id: &str, limit: i64) -> StoreResult<Vec<Bet>> {
        let rows: Vec<BetRow> = sqlx::query_as(
            "SELECT * FROM bets WHERE user_id = $1 ORDER BY created_at DESC LIMIT $2",
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Bet::try_from).collect()
    }

    async fn get_bet(&self, id: &str) -> StoreResult<Option<Bet>> {
        let row: Option<BetRow> = sqlx::query_as("SELECT * FROM bets WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Bet::try_from).transpose()
    }

    async fn settle_bet(&self, id: &str, settlement: &Settlement) -> StoreResult<Option<Bet>> {
        let mut tx = self.pool.begin().await?;

        let row: Option<BetRow> = sqlx::query_as(
            "UPDATE bets SET result = $2, score_earned = $3, sol_price_end = $4, settled_at = $5 \
             WHERE id = $1 AND result = 'PENDING' RETURNING *",
        )
        .bind(id)
        .bind(settlement.result.as_str())
        .bind(settlement.score_earned)
        .bind(settlement.end_price)
        .bind(settlement.settled_at)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM bets WHERE id = $1)")
                .bind(id)
                .fetch_one(&mut *tx)
                .await?;
            return if exists {
                Err(StoreError::Conflict("bet"))
            } else {
                Ok(None)
            };
        };

        if settlement.score_earned != 0 {
            sqlx::query(
                "UPDATE users SET betting_score = betting_score + $2, \
                 total_score = total_score + $2 WHERE id = $1",
            )
            .bind(&row.user_id)
            .bind(settlement.score_earned)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(Some(row.try_into()?))
    }

    async fn list_tasks(&self) -> StoreResult<Vec<Task>> {
        let rows: Vec<TaskRow> =
            sqlx::query_as("SELECT * FROM tasks ORDER BY created_at ASC, task_key ASC")
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(Task::try_from).collect()
    }

    async fn find_task_by_key(&self, key: &str) -> StoreResult<Option<Task>> {
        let row: Option<TaskRow> = sqlx::query_as("SELECT * FROM tasks WHERE task_key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Task::try_from).transpose()
    }

    async fn create_task(&self, task: NewTask) -> StoreResult<Task> {
        let mut tx = self.pool.begin().await?;

        let row: TaskRow = sqlx::query_as(
            "INSERT INTO tasks (id, name, description, score_reward, type, task_key) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING *",
        )
        .bind(new_id())
        .bind(&task.name)
        .bind(&task.description)
        .bind(task.score_reward)
        .bind(task.task_type.as_str())
        .bind(&task.task_key)
        .fetch_one(&mut *tx)
        .await
        .map_err(|err| unique_violation(err, "task_key"))?;

        let assigned = sqlx::query(
            "INSERT INTO user_tasks (user_id, task_id) SELECT id, $1 FROM users \
             ON CONFLICT (user_id, task_id) DO NOTHING",
        )
        .bind(&row.id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        debug!(
            "Created task {} for {} users",
            row.task_key,
            assigned.rows_affected()
        );
        row.try_into()
    }

    async fn list_user_tasks(&self, user_id: &str) -> StoreResult<Vec<UserTask>> {
        let query = format!(
            "{USER_TASK_SELECT} WHERE ut.user_id = $1 ORDER BY t.created_at ASC, t.task_key ASC"
        );
        let rows: Vec<UserTaskRow> = sqlx::query_as(&query)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(UserTask::try_from).collect()
    }

    async fn get_user_task(&self, user_id: &str, task_id: &str) -> StoreResult<Option<UserTask>> {
        let query = format!("{USER_TASK_SELECT} WHERE ut.user_id = $1 AND ut.task_id = $2");
        let row: Option<UserTaskRow> = sqlx::query_as(&query)
            .bind(user_id)
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(UserTask::try_from).transpose()
    }

    async fn complete_user_task(
        &self,
        user_id: &str,
        task_id: &str,
        guard: CompletionGuard,
        reward: i64,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<UserTask>> {
        let cutoff = match guard {
            CompletionGuard::FirstTime => None,
            CompletionGuard::CompletedBefore(cutoff) => Some(cutoff),
        };
        let mut tx = self.pool.begin().await?;

        let updated: Option<String> = sqlx::query_scalar(
            "UPDATE user_tasks SET completed = TRUE, completed_at = $3 \
             WHERE user_id = $1 AND task_id = $2 AND (completed = FALSE OR \
             ($4::TIMESTAMPTZ IS NOT NULL AND (completed_at IS NULL OR completed_at < $4))) \
             RETURNING id",
        )
        .bind(user_id)
        .bind(task_id)
        .bind(now)
        .bind(cutoff)
        .fetch_optional(&mut *tx)
        .await?;

        if updated.is_none() {
            let exists: bool = sqlx::query_scalar(
                "SELECT EXISTS (SELECT 1 FROM user_tasks WHERE user_id = $1 AND task_id = $2)",
            )
            .bind(user_id)
            .bind(task_id)
            .fetch_one(&mut *tx)
            .await?;
            return if exists {
                Err(StoreError::Conflict("user_task"))
            } else {
                Ok(None)
            };
        }

        sqlx::query(
            "UPDATE users SET clicker_score = clicker_score + $2, \
             total_score = total_score + $2 WHERE id = $1",
        )
        .bind(user_id)
        .bind(reward)
        .execute(&mut *tx)
        .await?;

        let query = format!("{USER_TASK_SELECT} WHERE ut.user_id = $1 AND ut.task_id = $2");
        let row: UserTaskRow = sqlx::query_as(&query)
            .bind(user_id)
            .bind(task_id)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(Some(row.try_into()?))
    }

    async fn top_users(&self, limit: i64) -> StoreResult<Vec<User>> {
        let users = sqlx::query_as::<_, User>(
            "SELECT * FROM users ORDER BY total_score DESC, created_at ASC, id ASC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(users)
    }

    async fn count_users_above(&self, score: i64) -> StoreResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE total_score > $1")
            .bind(score)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn count_ranked_users(&self) -> StoreResult<i64> {
        self.count_users_above(0).await
    }

    async fn list_referrals(&self, referrer_id: &str) -> StoreResult<Vec<User>> {
        let users = sqlx::query_as::<_, User>(
            "SELECT * FROM users WHERE referrer_id = $1 ORDER BY created_at DESC",
        )
        .bind(referrer_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(users)
    }
}
