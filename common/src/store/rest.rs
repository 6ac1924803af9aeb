//! Store backed by a PostgREST endpoint (Supabase) over the same schema as
//! the Postgres migrations.
//!
//! PostgREST has no multi-statement transactions, so read-modify-write
//! operations use compare-and-swap: the PATCH filters on the values that were
//! read and is retried when another writer got there first.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use game::{betting::Settlement, CompletionGuard, ScoreCard, TapOutcome};
use reqwest::{header::HeaderMap, Client, Method, RequestBuilder, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use super::Store;
use crate::{
    error::{StoreError, StoreResult},
    models::{new_id, Bet, NewBet, NewTask, NewUser, Profile, ScoreUpdate, Task, User, UserTask},
};

const CAS_ATTEMPTS: usize = 8;
const USER_TASK_SELECT: &str = "*,task:tasks(*)";

/// Formats an instant the way PostgREST filters expect it.
fn filter_time(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Total from a `Content-Range` header such as `0-24/3573` or `*/0`.
fn parse_content_range_total(value: &str) -> Option<i64> {
    value.rsplit_once('/')?.1.trim().parse().ok()
}

#[derive(Deserialize)]
struct IdRow {
    id: String,
}

#[derive(Serialize)]
struct Assignment<'a> {
    user_id: &'a str,
    task_id: &'a str,
}

pub struct RestStore {
    client: Client,
    base_url: String,
    service_key: String,
}

impl RestStore {
    pub fn new(base_url: &str, service_key: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: format!("{}/rest/v1", base_url.trim_end_matches('/')),
            service_key: service_key.to_string(),
        }
    }

    fn request(&self, method: Method, table: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}/{}", self.base_url, table))
            .header("apikey", &self.service_key)
            .bearer_auth(&self.service_key)
    }

    fn select(&self, table: &str) -> RequestBuilder {
        self.request(Method::GET, table)
    }

    fn insert(&self, table: &str) -> RequestBuilder {
        self.request(Method::POST, table)
            .header("Prefer", "return=representation")
    }

    fn patch(&self, table: &str) -> RequestBuilder {
        self.request(Method::PATCH, table)
            .header("Prefer", "return=representation")
    }

    async fn send(
        &self,
        builder: RequestBuilder,
        conflict: &'static str,
    ) -> StoreResult<(HeaderMap, String)> {
        let response = builder.send().await?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.text().await?;

        if status.is_success() {
            return Ok((headers, body));
        }
        if status == StatusCode::CONFLICT || body.contains("\"23505\"") {
            return Err(StoreError::Conflict(conflict));
        }
        warn!("PostgREST returned {}: {}", status, body);
        Err(StoreError::Rest {
            status: status.as_u16(),
            body,
        })
    }

    async fn fetch<T: DeserializeOwned>(
        &self,
        builder: RequestBuilder,
        conflict: &'static str,
    ) -> StoreResult<Vec<T>> {
        let (_, body) = self.send(builder, conflict).await?;
        if body.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&body).map_err(|err| StoreError::Rest {
            status: 200,
            body: format!("unexpected payload: {err}"),
        })
    }

    async fn fetch_first<T: DeserializeOwned>(
        &self,
        builder: RequestBuilder,
        conflict: &'static str,
    ) -> StoreResult<Option<T>> {
        Ok(self.fetch(builder, conflict).await?.into_iter().next())
    }

    async fn count(&self, filters: &[(&str, String)]) -> StoreResult<i64> {
        let builder = self
            .select("users")
            .query(&[("select", "id"), ("limit", "1")])
            .query(filters)
            .header("Prefer", "count=exact");
        let (headers, _) = self.send(builder, "users").await?;

        headers
            .get("content-range")
            .and_then(|value| value.to_str().ok())
            .and_then(parse_content_range_total)
            .ok_or(StoreError::Rest {
                status: 200,
                body: "missing content-range".to_string(),
            })
    }

    /// Rewrites a user's scores (and optionally other columns) only if the
    /// scores, plus any `extra` guard columns, have not moved since `user`
    /// was read.
    async fn swap_user(
        &self,
        user: &User,
        mut changes: serde_json::Value,
        card: ScoreCard,
        extra: &[(&str, String)],
    ) -> StoreResult<Option<User>> {
        if let Some(fields) = changes.as_object_mut() {
            fields.insert("clicker_score".into(), json!(card.clicker));
            fields.insert("betting_score".into(), json!(card.betting));
            fields.insert("total_score".into(), json!(card.total()));
        }
        let builder = self
            .patch("users")
            .query(&[
                ("id", format!("eq.{}", user.id)),
                ("clicker_score", format!("eq.{}", user.clicker_score)),
                ("betting_score", format!("eq.{}", user.betting_score)),
            ])
            .query(extra)
            .json(&changes);
        self.fetch_first(builder, "user").await
    }

    async fn credit_user(
        &self,
        user_id: &str,
        credit: impl Fn(&mut ScoreCard) + Send + Sync,
    ) -> StoreResult<()> {
        for _ in 0..CAS_ATTEMPTS {
            let Some(user) = self.get_user(user_id).await? else {
                return Err(StoreError::NotFound("user"));
            };
            let mut card = user.scores();
            credit(&mut card);
            if self.swap_user(&user, json!({}), card, &[]).await?.is_some() {
                return Ok(());
            }
            debug!("Score write for {} raced, retrying", user_id);
        }
        Err(StoreError::Conflict("user"))
    }

    async fn has_pending_bet(&self, user_id: &str) -> StoreResult<bool> {
        let builder = self.select("bets").query(&[
            ("select", "id".to_string()),
            ("user_id", format!("eq.{user_id}")),
            ("result", "eq.PENDING".to_string()),
            ("limit", "1".to_string()),
        ]);
        Ok(self.fetch_first::<IdRow>(builder, "bet").await?.is_some())
    }

    /// Hands back one bet taken by `consume_daily_bet` whose insert failed.
    async fn release_daily_bet(&self, id: &str) -> StoreResult<()> {
        for _ in 0..CAS_ATTEMPTS {
            let Some(user) = self.get_user(id).await? else {
                return Err(StoreError::NotFound("user"));
            };
            if user.daily_bets <= 0 {
                return Ok(());
            }
            let builder = self
                .patch("users")
                .query(&[
                    ("id", format!("eq.{id}")),
                    ("daily_bets", format!("eq.{}", user.daily_bets)),
                    ("last_bet_reset", format!("eq.{}", filter_time(user.last_bet_reset))),
                ])
                .json(&json!({ "daily_bets": user.daily_bets - 1 }));
            if self.fetch_first::<IdRow>(builder, "user").await?.is_some() {
                return Ok(());
            }
            debug!("Daily bet release for {} raced, retrying", id);
        }
        Err(StoreError::Conflict("user"))
    }

    async fn assign(&self, assignments: &[Assignment<'_>]) -> StoreResult<()> {
        if assignments.is_empty() {
            return Ok(());
        }
        let builder = self
            .request(Method::POST, "user_tasks")
            .query(&[("on_conflict", "user_id,task_id")])
            .header("Prefer", "resolution=ignore-duplicates,return=minimal")
            .json(assignments);
        self.send(builder, "user_task").await?;
        Ok(())
    }
}

#[async_trait]
impl Store for RestStore {
    async fn get_user(&self, id: &str) -> StoreResult<Option<User>> {
        let builder = self
            .select("users")
            .query(&[("id", format!("eq.{id}")), ("select", "*".to_string())]);
        self.fetch_first(builder, "user").await
    }

    async fn find_user_by_referral_code(&self, code: &str) -> StoreResult<Option<User>> {
        let builder = self.select("users").query(&[
            ("referral_code", format!("eq.{code}")),
            ("select", "*".to_string()),
        ]);
        self.fetch_first(builder, "user").await
    }

    async fn create_user(&self, user: NewUser, now: DateTime<Utc>) -> StoreResult<User> {
        if self.find_user_by_referral_code(&user.referral_code).await?.is_some() {
            return Err(StoreError::Conflict("referral_code"));
        }
        let user = user.into_user(now);
        let created: User = self
            .fetch_first(self.insert("users").json(&user), "user")
            .await?
            .ok_or(StoreError::NotFound("user"))?;

        let tasks = self.list_tasks().await?;
        let assignments: Vec<Assignment> = tasks
            .iter()
            .map(|task| Assignment {
                user_id: &created.id,
                task_id: &task.id,
            })
            .collect();
        self.assign(&assignments).await?;
        Ok(created)
    }

    async fn update_profile(&self, id: &str, profile: &Profile) -> StoreResult<Option<User>> {
        if profile.is_empty() {
            return self.get_user(id).await;
        }
        let mut changes = serde_json::Map::new();
        if let Some(username) = &profile.username {
            changes.insert("username".into(), json!(username));
        }
        if let Some(first_name) = &profile.first_name {
            changes.insert("first_name".into(), json!(first_name));
        }
        if let Some(last_name) = &profile.last_name {
            changes.insert("last_name".into(), json!(last_name));
        }
        let builder = self
            .patch("users")
            .query(&[("id", format!("eq.{id}"))])
            .json(&changes);
        self.fetch_first(builder, "user").await
    }

    async fn set_scores(
        &self,
        id: &str,
        update: ScoreUpdate,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<User>> {
        for _ in 0..CAS_ATTEMPTS {
            let Some(user) = self.get_user(id).await? else {
                return Ok(None);
            };
            let mut card = user.scores();
            card.overwrite(update.clicker, update.betting);
            let changes = if update.clicker.is_some() {
                json!({ "last_click_time": now })
            } else {
                json!({})
            };
            if let Some(updated) = self.swap_user(&user, changes, card, &[]).await? {
                return Ok(Some(updated));
            }
        }
        Err(StoreError::Conflict("user"))
    }

    async fn record_taps(
        &self,
        id: &str,
        taps: u32,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<(User, TapOutcome)>> {
        for _ in 0..CAS_ATTEMPTS {
            let Some(user) = self.get_user(id).await? else {
                return Ok(None);
            };
            let mut meter = user.boost_meter();
            let outcome = meter.tap(taps, now)?;
            let mut card = user.scores();
            card.credit_clicker(outcome.points);

            let changes = json!({
                "boost": meter.boost,
                "last_boost_refresh": meter.last_refresh,
                "last_click_time": now,
            });
            let boost_guard = [("boost", format!("eq.{}", user.boost))];
            if let Some(updated) = self.swap_user(&user, changes, card, &boost_guard).await? {
                return Ok(Some((updated, outcome)));
            }
        }
        Err(StoreError::Conflict("user"))
    }

    async fn consume_daily_bet(
        &self,
        id: &str,
        limit: u32,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<u32>> {
        for _ in 0..CAS_ATTEMPTS {
            let Some(user) = self.get_user(id).await? else {
                return Err(StoreError::NotFound("user"));
            };
            let mut counter = user.bet_counter();
            let Ok(remaining) = counter.try_consume(now, limit) else {
                return Ok(None);
            };

            let builder = self
                .patch("users")
                .query(&[
                    ("id", format!("eq.{id}")),
                    ("daily_bets", format!("eq.{}", user.daily_bets)),
                    ("last_bet_reset", format!("eq.{}", filter_time(user.last_bet_reset))),
                ])
                .json(&json!({
                    "daily_bets": counter.count,
                    "last_bet_reset": counter.last_reset,
                }));
            if self.fetch_first::<IdRow>(builder, "user").await?.is_some() {
                return Ok(Some(remaining));
            }
            debug!("Daily bet counter for {} raced, retrying", id);
        }
        Err(StoreError::Conflict("user"))
    }

    async fn insert_bet(&self, bet: NewBet, now: DateTime<Utc>) -> StoreResult<Bet> {
        let bet = bet.into_bet(new_id(), now);
        self.fetch_first(self.insert("bets").json(&bet), "pending_bet")
            .await?
            .ok_or(StoreError::NotFound("bet"))
    }

    /// Not transactional over HTTP: the allowance is taken first and given
    /// back if the insert fails.
    async fn place_bet(
        &self,
        bet: NewBet,
        limit: u32,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<(Bet, u32)>> {
        if self.has_pending_bet(&bet.user_id).await? {
            return Err(StoreError::Conflict("pending_bet"));
        }
        let user_id = bet.user_id.clone();
        let Some(remaining) = self.consume_daily_bet(&user_id, limit, now).await? else {
            return Ok(None);
        };

        match self.insert_bet(bet, now).await {
            Ok(bet) => Ok(Some((bet, remaining))),
            Err(err) => {
                if let Err(release) = self.release_daily_bet(&user_id).await {
                    warn!("Could not return daily bet to {}: {}", user_id, release);
                }
                Err(err)
            }
        }
    }

    async fn list_bets(&self, user_id: &str, limit: i64) -> StoreResult<Vec<Bet>> {
        let builder = self.select("bets").query(&[
            ("user_id", format!("eq.{user_id}")),
            ("order", "created_at.desc".to_string()),
            ("limit", limit.to_string()),
        ]);
        self.fetch(builder, "bet").await
    }

    async fn get_bet(&self, id: &str) -> StoreResult<Option<Bet>> {
        let builder = self.select("bets").query(&[("id", format!("eq.{id}"))]);
        self.fetch_first(builder, "bet").await
    }

    async fn settle_bet(&self, id: &str, settlement: &Settlement) -> StoreResult<Option<Bet>> {
        let builder = self
            .patch("bets")
            .query(&[("id", format!("eq.{id}")), ("result", "eq.PENDING".to_string())])
            .json(&json!({
                "result": settlement.result,
                "score_earned": settlement.score_earned,
                "sol_price_end": settlement.end_price,
                "settled_at": settlement.settled_at,
            }));
        let Some(bet) = self.fetch_first::<Bet>(builder, "bet").await? else {
            return match self.get_bet(id).await? {
                Some(_) => Err(StoreError::Conflict("bet")),
                None => Ok(None),
            };
        };

        if settlement.score_earned != 0 {
            let earned = settlement.score_earned;
            self.credit_user(&bet.user_id, move |card| card.credit_betting(earned))
                .await?;
        }
        Ok(Some(bet))
    }

    async fn list_tasks(&self) -> StoreResult<Vec<Task>> {
        let builder = self
            .select("tasks")
            .query(&[("order", "created_at.asc,task_key.asc")]);
        self.fetch(builder, "task").await
    }

    async fn find_task_by_key(&self, key: &str) -> StoreResult<Option<Task>> {
        let builder = self.select("tasks").query(&[("task_key", format!("eq.{key}"))]);
        self.fetch_first(builder, "task_key").await
    }

    async fn create_task(&self, task: NewTask) -> StoreResult<Task> {
        let task = task.into_task(new_id());
        let created: Task = self
            .fetch_first(self.insert("tasks").json(&task), "task_key")
            .await?
            .ok_or(StoreError::NotFound("task"))?;

        let users: Vec<IdRow> = self
            .fetch(self.select("users").query(&[("select", "id")]), "user")
            .await?;
        let assignments: Vec<Assignment> = users
            .iter()
            .map(|user| Assignment {
                user_id: &user.id,
                task_id: &created.id,
            })
            .collect();
        self.assign(&assignments).await?;
        Ok(created)
    }

    async fn list_user_tasks(&self, user_id: &str) -> StoreResult<Vec<UserTask>> {
        let builder = self.select("user_tasks").query(&[
            ("user_id", format!("eq.{user_id}")),
            ("select", USER_TASK_SELECT.to_string()),
        ]);
        self.fetch(builder, "user_task").await
    }

    async fn get_user_task(&self, user_id: &str, task_id: &str) -> StoreResult<Option<UserTask>> {
        let builder = self.select("user_tasks").query(&[
            ("user_id", format!("eq.{user_id}")),
            ("task_id", format!("eq.{task_id}")),
            ("select", USER_TASK_SELECT.to_string()),
        ]);
        self.fetch_first(builder, "user_task").await
    }

    async fn complete_user_task(
        &self,
        user_id: &str,
        task_id: &str,
        guard: CompletionGuard,
        reward: i64,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<UserTask>> {
        let guard_filter = match guard {
            CompletionGuard::FirstTime => ("completed", "eq.false".to_string()),
            CompletionGuard::CompletedBefore(cutoff) => (
                "or",
                format!(
                    "(completed.eq.false,completed_at.is.null,completed_at.lt.{})",
                    cutoff.format("%Y-%m-%dT%H:%M:%SZ")
                ),
            ),
        };
        let builder = self
            .patch("user_tasks")
            .query(&[
                ("user_id", format!("eq.{user_id}")),
                ("task_id", format!("eq.{task_id}")),
                ("select", USER_TASK_SELECT.to_string()),
            ])
            .query(&[guard_filter])
            .json(&json!({ "completed": true, "completed_at": now }));

        let Some(user_task) = self.fetch_first::<UserTask>(builder, "user_task").await? else {
            return match self.get_user_task(user_id, task_id).await? {
                Some(_) => Err(StoreError::Conflict("user_task")),
                None => Ok(None),
            };
        };

        self.credit_user(user_id, move |card| card.credit_clicker(reward))
            .await?;
        Ok(Some(user_task))
    }

    async fn top_users(&self, limit: i64) -> StoreResult<Vec<User>> {
        let builder = self.select("users").query(&[
            ("order", "total_score.desc,created_at.asc,id.asc".to_string()),
            ("limit", limit.to_string()),
        ]);
        self.fetch(builder, "user").await
    }

    async fn count_users_above(&self, score: i64) -> StoreResult<i64> {
        self.count(&[("total_score", format!("gt.{score}"))]).await
    }

    async fn count_ranked_users(&self) -> StoreResult<i64> {
        self.count_users_above(0).await
    }

    async fn list_referrals(&self, referrer_id: &str) -> StoreResult<Vec<User>> {
        let builder = self.select("users").query(&[
            ("referrer_id", format!("eq.{referrer_id}")),
            ("order", "created_at.desc".to_string()),
        ]);
        self.fetch(builder, "user").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn content_range_totals() {
        assert_eq!(parse_content_range_total("0-24/3573"), Some(3573));
        assert_eq!(parse_content_range_total("*/0"), Some(0));
        assert_eq!(parse_content_range_total("0-9/*"), None);
        assert_eq!(parse_content_range_total("garbage"), None);
    }

    #[test]
    fn filter_times_keep_microseconds() {
        let at = Utc.timestamp_opt(1_700_000_000, 123_456_000).unwrap();
        assert_eq!(filter_time(at), "2023-11-14T22:13:20.123456Z");
    }

    #[test]
    fn base_url_is_normalised() {
        let store = RestStore::new("https://demo.supabase.co/", "key");
        assert_eq!(store.base_url, "https://demo.supabase.co/rest/v1");
    }
}
