use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use game::{betting::Settlement, BetResult, CompletionGuard, TapOutcome};
use tokio::sync::RwLock;

use super::Store;
use crate::{
    error::{StoreError, StoreResult},
    models::{new_id, Bet, NewBet, NewTask, NewUser, Profile, ScoreUpdate, Task, User, UserTask},
};

#[derive(Default)]
struct Tables {
    users: HashMap<String, User>,
    tasks: Vec<Task>,
    user_tasks: Vec<UserTask>,
    bets: Vec<Bet>,
}

impl Tables {
    fn user_mut(&mut self, id: &str) -> Option<&mut User> {
        self.users.get_mut(id)
    }

    fn has_pending_bet(&self, user_id: &str) -> bool {
        self.bets
            .iter()
            .any(|bet| bet.user_id == user_id && !bet.result.is_settled())
    }

    fn attach_task(&self, mut user_task: UserTask) -> UserTask {
        user_task.task = self
            .tasks
            .iter()
            .find(|task| task.id == user_task.task_id)
            .cloned();
        user_task
    }
}

/// In-process store used by tests and local runs without a database.
/// One lock over all tables keeps multi-row operations atomic.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_user(&self, id: &str) -> StoreResult<Option<User>> {
        Ok(self.tables.read().await.users.get(id).cloned())
    }

    async fn find_user_by_referral_code(&self, code: &str) -> StoreResult<Option<User>> {
        let tables = self.tables.read().await;
        Ok(tables
            .users
            .values()
            .find(|user| user.referral_code == code)
            .cloned())
    }

    async fn create_user(&self, user: NewUser, now: DateTime<Utc>) -> StoreResult<User> {
        let mut tables = self.tables.write().await;
        if tables.users.contains_key(&user.id) {
            return Err(StoreError::Conflict("user"));
        }
        if tables
            .users
            .values()
            .any(|existing| existing.referral_code == user.referral_code)
        {
            return Err(StoreError::Conflict("referral_code"));
        }

        let user = user.into_user(now);
        let assignments: Vec<UserTask> = tables
            .tasks
            .iter()
            .map(|task| UserTask {
                id: new_id(),
                user_id: user.id.clone(),
                task_id: task.id.clone(),
                completed: false,
                completed_at: None,
                task: None,
            })
            .collect();
        tables.user_tasks.extend(assignments);
        tables.users.insert(user.id.clone(), user.clone());
        Ok(user)
    }

    async fn update_profile(&self, id: &str, profile: &Profile) -> StoreResult<Option<User>> {
        let mut tables = self.tables.write().await;
        let Some(user) = tables.user_mut(id) else {
            return Ok(None);
        };
        if let Some(username) = &profile.username {
            user.username = Some(username.clone());
        }
        if let Some(first_name) = &profile.first_name {
            user.first_name = Some(first_name.clone());
        }
        if let Some(last_name) = &profile.last_name {
            user.last_name = Some(last_name.clone());
        }
        Ok(Some(user.clone()))
    }

    async fn set_scores(
        &self,
        id: &str,
        update: ScoreUpdate,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<User>> {
        let mut tables = self.tables.write().await;
        let Some(user) = tables.user_mut(id) else {
            return Ok(None);
        };
        let mut card = user.scores();
        card.overwrite(update.clicker, update.betting);
        user.apply_scores(card);
        if update.clicker.is_some() {
            user.last_click_time = now;
        }
        Ok(Some(user.clone()))
    }

    async fn record_taps(
        &self,
        id: &str,
        taps: u32,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<(User, TapOutcome)>> {
        let mut tables = self.tables.write().await;
        let Some(user) = tables.user_mut(id) else {
            return Ok(None);
        };
        let mut meter = user.boost_meter();
        let outcome = meter.tap(taps, now)?;

        let mut card = user.scores();
        card.credit_clicker(outcome.points);
        user.apply_scores(card);
        user.apply_boost(meter);
        user.last_click_time = now;
        Ok(Some((user.clone(), outcome)))
    }

    async fn consume_daily_bet(
        &self,
        id: &str,
        limit: u32,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<u32>> {
        let mut tables = self.tables.write().await;
        let user = tables.user_mut(id).ok_or(StoreError::NotFound("user"))?;

        let mut counter = user.bet_counter();
        let remaining = counter.try_consume(now, limit).ok();
        user.daily_bets = counter.count as i32;
        user.last_bet_reset = counter.last_reset;
        Ok(remaining)
    }

    async fn insert_bet(&self, bet: NewBet, now: DateTime<Utc>) -> StoreResult<Bet> {
        let mut tables = self.tables.write().await;
        if !tables.users.contains_key(&bet.user_id) {
            return Err(StoreError::NotFound("user"));
        }
        if tables.has_pending_bet(&bet.user_id) {
            return Err(StoreError::Conflict("pending_bet"));
        }
        let bet = bet.into_bet(new_id(), now);
        tables.bets.push(bet.clone());
        Ok(bet)
    }

    async fn place_bet(
        &self,
        bet: NewBet,
        limit: u32,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<(Bet, u32)>> {
        let mut tables = self.tables.write().await;
        if !tables.users.contains_key(&bet.user_id) {
            return Err(StoreError::NotFound("user"));
        }
        if tables.has_pending_bet(&bet.user_id) {
            return Err(StoreError::Conflict("pending_bet"));
        }

        let user = tables
            .user_mut(&bet.user_id)
            .ok_or(StoreError::NotFound("user"))?;
        let mut counter = user.bet_counter();
        let Ok(remaining) = counter.try_consume(now, limit) else {
            return Ok(None);
        };
        user.daily_bets = counter.count as i32;
        user.last_bet_reset = counter.last_reset;

        let bet = bet.into_bet(new_id(), now);
        tables.bets.push(bet.clone());
        Ok(Some((bet, remaining)))
    }

    async fn list_bets(&self, user_id: &str, limit: i64) -> StoreResult<Vec<Bet>> {
        let tables = self.tables.read().await;
        let mut bets: Vec<Bet> = tables
            .bets
            .iter()
            .filter(|bet| bet.user_id == user_id)
            .cloned()
            .collect();
        // pushes are chronological, so reversing keeps insertion order on ties
        bets.reverse();
        bets.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        bets.truncate(limit.max(0) as usize);
        Ok(bets)
    }

    async fn get_bet(&self, id: &str) -> StoreResult<Option<Bet>> {
        let tables = self.tables.read().await;
        Ok(tables.bets.iter().find(|bet| bet.id == id).cloned())
    }

    async fn settle_bet(&self, id: &str, settlement: &Settlement) -> StoreResult<Option<Bet>> {
        let mut tables = self.tables.write().await;
        let Some(bet) = tables.bets.iter_mut().find(|bet| bet.id == id) else {
            return Ok(None);
        };
        if bet.result != BetResult::Pending {
            return Err(StoreError::Conflict("bet"));
        }
        bet.result = settlement.result;
        bet.score_earned = settlement.score_earned;
        bet.sol_price_end = Some(settlement.end_price);
        bet.settled_at = Some(settlement.settled_at);
        let bet = bet.clone();

        if let Some(user) = tables.user_mut(&bet.user_id) {
            let mut card = user.scores();
            card.credit_betting(settlement.score_earned);
            user.apply_scores(card);
        }
        Ok(Some(bet))
    }

    async fn list_tasks(&self) -> StoreResult<Vec<Task>> {
        Ok(self.tables.read().await.tasks.clone())
    }

    async fn find_task_by_key(&self, key: &str) -> StoreResult<Option<Task>> {
        let tables = self.tables.read().await;
        Ok(tables.tasks.iter().find(|task| task.task_key == key).cloned())
    }

    async fn create_task(&self, task: NewTask) -> StoreResult<Task> {
        let mut tables = self.tables.write().await;
        if tables.tasks.iter().any(|t| t.task_key == task.task_key) {
            return Err(StoreError::Conflict("task_key"));
        }
        let task = task.into_task(new_id());
        let assignments: Vec<UserTask> = tables
            .users
            .keys()
            .map(|user_id| UserTask {
                id: new_id(),
                user_id: user_id.clone(),
                task_id: task.id.clone(),
                completed: false,
                completed_at: None,
                task: None,
            })
            .collect();
        tables.user_tasks.extend(assignments);
        tables.tasks.push(task.clone());
        Ok(task)
    }

    async fn list_user_tasks(&self, user_id: &str) -> StoreResult<Vec<UserTask>> {
        let tables = self.tables.read().await;
        Ok(tables
            .user_tasks
            .iter()
            .filter(|ut| ut.user_id == user_id)
            .map(|ut| tables.attach_task(ut.clone()))
            .collect())
    }

    async fn get_user_task(&self, user_id: &str, task_id: &str) -> StoreResult<Option<UserTask>> {
        let tables = self.tables.read().await;
        Ok(tables
            .user_tasks
            .iter()
            .find(|ut| ut.user_id == user_id && ut.task_id == task_id)
            .map(|ut| tables.attach_task(ut.clone())))
    }

    async fn complete_user_task(
        &self,
        user_id: &str,
        task_id: &str,
        guard: CompletionGuard,
        reward: i64,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<UserTask>> {
        let mut tables = self.tables.write().await;
        let Some(user_task) = tables
            .user_tasks
            .iter_mut()
            .find(|ut| ut.user_id == user_id && ut.task_id == task_id)
        else {
            return Ok(None);
        };

        let allowed = match guard {
            CompletionGuard::FirstTime => !user_task.completed,
            CompletionGuard::CompletedBefore(cutoff) => {
                !user_task.completed || user_task.completed_at.map_or(true, |at| at < cutoff)
            }
        };
        if !allowed {
            return Err(StoreError::Conflict("user_task"));
        }
        user_task.completed = true;
        user_task.completed_at = Some(now);
        let user_task = user_task.clone();

        if let Some(user) = tables.user_mut(user_id) {
            let mut card = user.scores();
            card.credit_clicker(reward);
            user.apply_scores(card);
        }
        Ok(Some(tables.attach_task(user_task)))
    }

    async fn top_users(&self, limit: i64) -> StoreResult<Vec<User>> {
        let tables = self.tables.read().await;
        let mut users: Vec<User> = tables.users.values().cloned().collect();
        users.sort_by(|a, b| {
            b.total_score
                .cmp(&a.total_score)
                .then(a.created_at.cmp(&b.created_at))
                .then(a.id.cmp(&b.id))
        });
        users.truncate(limit.max(0) as usize);
        Ok(users)
    }

    async fn count_users_above(&self, score: i64) -> StoreResult<i64> {
        let tables = self.tables.read().await;
        Ok(tables
            .users
            .values()
            .filter(|user| user.total_score > score)
            .count() as i64)
    }

    async fn count_ranked_users(&self) -> StoreResult<i64> {
        self.count_users_above(0).await
    }

    async fn list_referrals(&self, referrer_id: &str) -> StoreResult<Vec<User>> {
        let tables = self.tables.read().await;
        let mut referrals: Vec<User> = tables
            .users
            .values()
            .filter(|user| user.referrer_id.as_deref() == Some(referrer_id))
            .cloned()
            .collect();
        referrals.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(referrals)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, TimeZone};
    use game::{BetDirection, TaskType};

    use super::*;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 4, 10, 9, 0, 0).unwrap()
    }

    fn new_user(id: &str) -> NewUser {
        NewUser {
            id: id.to_string(),
            username: Some(format!("player_{id}")),
            first_name: None,
            last_name: None,
            referral_code: format!("CODE{id}"),
            referrer_id: None,
        }
    }

    fn daily_task() -> NewTask {
        NewTask {
            name: "Daily check-in".to_string(),
            description: "Tap once today".to_string(),
            score_reward: 15,
            task_type: TaskType::Daily,
            task_key: "daily_click".to_string(),
        }
    }

    #[tokio::test]
    async fn create_user_assigns_existing_tasks() {
        let store = MemoryStore::new();
        store.create_task(daily_task()).await.unwrap();
        store.create_user(new_user("1"), t0()).await.unwrap();

        let tasks = store.list_user_tasks("1").await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert!(!tasks[0].completed);
        assert_eq!(tasks[0].task.as_ref().unwrap().task_key, "daily_click");

        // tasks created later reach existing users too
        let mut other = daily_task();
        other.task_key = "daily_bet".to_string();
        store.create_task(other).await.unwrap();
        assert_eq!(store.list_user_tasks("1").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn duplicate_ids_and_codes_conflict() {
        let store = MemoryStore::new();
        store.create_user(new_user("1"), t0()).await.unwrap();
        assert!(matches!(
            store.create_user(new_user("1"), t0()).await,
            Err(StoreError::Conflict("user"))
        ));

        let mut clash = new_user("2");
        clash.referral_code = "CODE1".to_string();
        assert!(matches!(
            store.create_user(clash, t0()).await,
            Err(StoreError::Conflict("referral_code"))
        ));
    }

    #[tokio::test]
    async fn set_scores_keeps_total_in_sync() {
        let store = MemoryStore::new();
        store.create_user(new_user("1"), t0()).await.unwrap();

        let user = store
            .set_scores(
                "1",
                ScoreUpdate {
                    clicker: Some(120),
                    betting: None,
                },
                t0(),
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(user.total_score, 120);

        let user = store
            .set_scores(
                "1",
                ScoreUpdate {
                    clicker: None,
                    betting: Some(30),
                },
                t0(),
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!((user.clicker_score, user.betting_score), (120, 30));
        assert_eq!(user.total_score, 150);
    }

    #[tokio::test]
    async fn concurrent_bets_never_exceed_daily_limit() {
        let store = Arc::new(MemoryStore::new());
        store.create_user(new_user("1"), t0()).await.unwrap();

        let handles: Vec<_> = (0..25)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.consume_daily_bet("1", 10, t0()).await })
            })
            .collect();

        let mut granted = 0;
        for handle in handles {
            if handle.await.unwrap().unwrap().is_some() {
                granted += 1;
            }
        }
        assert_eq!(granted, 10);
        assert_eq!(store.get_user("1").await.unwrap().unwrap().daily_bets, 10);

        // the window resets a day later
        let tomorrow = t0() + Duration::hours(25);
        assert_eq!(
            store.consume_daily_bet("1", 10, tomorrow).await.unwrap(),
            Some(9)
        );
    }

    fn up_bet(user_id: &str) -> NewBet {
        NewBet {
            user_id: user_id.to_string(),
            direction: BetDirection::Up,
            amount: 10,
            sol_price_start: 120.0,
        }
    }

    #[tokio::test]
    async fn placing_takes_allowance_and_blocks_while_pending() {
        let store = MemoryStore::new();
        store.create_user(new_user("1"), t0()).await.unwrap();

        let (bet, remaining) = store.place_bet(up_bet("1"), 2, t0()).await.unwrap().unwrap();
        assert_eq!(remaining, 1);

        // still pending: refused without touching the allowance
        assert!(matches!(
            store.place_bet(up_bet("1"), 2, t0()).await,
            Err(StoreError::Conflict("pending_bet"))
        ));
        assert_eq!(store.get_user("1").await.unwrap().unwrap().daily_bets, 1);

        let settlement = bet
            .round(Duration::seconds(5))
            .settle(119.0, t0() + Duration::seconds(5))
            .unwrap();
        store.settle_bet(&bet.id, &settlement).await.unwrap();

        let later = t0() + Duration::seconds(6);
        let (next, remaining) = store.place_bet(up_bet("1"), 2, later).await.unwrap().unwrap();
        assert_eq!(remaining, 0);
        let settlement = next
            .round(Duration::seconds(5))
            .settle(121.0, later + Duration::seconds(5))
            .unwrap();
        store.settle_bet(&next.id, &settlement).await.unwrap();

        assert!(store
            .place_bet(up_bet("1"), 2, later + Duration::seconds(6))
            .await
            .unwrap()
            .is_none());
        assert_eq!(store.list_bets("1", 20).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn concurrent_placements_leave_one_pending_bet() {
        let store = Arc::new(MemoryStore::new());
        store.create_user(new_user("1"), t0()).await.unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.place_bet(up_bet("1"), 10, t0()).await })
            })
            .collect();

        let mut placed = 0;
        for handle in handles {
            if let Ok(Some(_)) = handle.await.unwrap() {
                placed += 1;
            }
        }
        assert_eq!(placed, 1);
        assert_eq!(store.get_user("1").await.unwrap().unwrap().daily_bets, 1);
    }

    #[tokio::test]
    async fn daily_bet_for_unknown_user_is_not_found() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.consume_daily_bet("ghost", 10, t0()).await,
            Err(StoreError::NotFound("user"))
        ));
    }

    #[tokio::test]
    async fn settling_twice_conflicts_and_credits_once() {
        let store = MemoryStore::new();
        store.create_user(new_user("1"), t0()).await.unwrap();
        let bet = store
            .insert_bet(
                NewBet {
                    user_id: "1".to_string(),
                    direction: BetDirection::Up,
                    amount: 10,
                    sol_price_start: 120.0,
                },
                t0(),
            )
            .await
            .unwrap();

        let settlement = bet
            .round(Duration::seconds(5))
            .settle(121.0, t0() + Duration::seconds(5))
            .unwrap();
        let settled = store.settle_bet(&bet.id, &settlement).await.unwrap().unwrap();
        assert_eq!(settled.result, BetResult::Win);
        assert_eq!(settled.sol_price_end, Some(121.0));

        assert!(matches!(
            store.settle_bet(&bet.id, &settlement).await,
            Err(StoreError::Conflict("bet"))
        ));
        let user = store.get_user("1").await.unwrap().unwrap();
        assert_eq!(user.betting_score, 10);
        assert_eq!(user.total_score, 10);
    }

    #[tokio::test]
    async fn taps_spend_boost_and_credit_clicker() {
        let store = MemoryStore::new();
        store.create_user(new_user("1"), t0()).await.unwrap();

        let (user, outcome) = store.record_taps("1", 4, t0()).await.unwrap().unwrap();
        assert_eq!(outcome.points, 8);
        assert_eq!(user.clicker_score, 8);
        assert_eq!(user.total_score, 8);
        assert_eq!(user.boost, 496);

        assert!(matches!(
            store.record_taps("1", 0, t0()).await,
            Err(StoreError::Click(_))
        ));
        assert!(store.record_taps("ghost", 1, t0()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn daily_task_completion_respects_guard() {
        let store = MemoryStore::new();
        let task = store.create_task(daily_task()).await.unwrap();
        store.create_user(new_user("1"), t0()).await.unwrap();

        let done = store
            .complete_user_task("1", &task.id, CompletionGuard::FirstTime, 15, t0())
            .await
            .unwrap()
            .unwrap();
        assert!(done.completed);

        assert!(matches!(
            store
                .complete_user_task("1", &task.id, CompletionGuard::FirstTime, 15, t0())
                .await,
            Err(StoreError::Conflict(_))
        ));

        let next_day = t0() + Duration::days(1);
        let cutoff = game::tasks::day_start(next_day);
        store
            .complete_user_task(
                "1",
                &task.id,
                CompletionGuard::CompletedBefore(cutoff),
                15,
                next_day,
            )
            .await
            .unwrap()
            .unwrap();

        let user = store.get_user("1").await.unwrap().unwrap();
        assert_eq!(user.clicker_score, 30);
        assert_eq!(user.total_score, 30);
    }

    #[tokio::test]
    async fn ranking_queries() {
        let store = MemoryStore::new();
        for (i, score) in [0, 50, 50, 200].iter().enumerate() {
            let id = i.to_string();
            store
                .create_user(new_user(&id), t0() + Duration::seconds(i as i64))
                .await
                .unwrap();
            store
                .set_scores(
                    &id,
                    ScoreUpdate {
                        clicker: Some(*score),
                        betting: None,
                    },
                    t0(),
                )
                .await
                .unwrap();
        }

        let top: Vec<String> = store
            .top_users(3)
            .await
            .unwrap()
            .into_iter()
            .map(|u| u.id)
            .collect();
        assert_eq!(top, vec!["3", "1", "2"]);
        assert_eq!(store.count_users_above(50).await.unwrap(), 1);
        assert_eq!(store.count_ranked_users().await.unwrap(), 3);
    }
}
