use actix_web::{get, post, put, web, HttpResponse};
use chrono::Utc;
use common::models::NewBet;
use game::{BetDirection, BetError, BettingRound};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use super::required;
use crate::{
    error::{ApiError, ApiResult},
    metrics,
    state::AppState,
};

const HISTORY_LIMIT: i64 = 20;

#[derive(Debug, Deserialize)]
pub struct BetsQuery {
    #[serde(rename = "userId")]
    user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PlaceBetRequest {
    user_id: Option<String>,
    #[serde(rename = "type")]
    direction: BetDirection,
    amount: Option<i64>,
    sol_price_start: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct SettleBetRequest {
    id: Option<String>,
    sol_price_end: Option<f64>,
}

#[get("/betting")]
pub async fn list_bets(
    query: web::Query<BetsQuery>,
    state: web::Data<AppState>,
) -> ApiResult<HttpResponse> {
    let user_id = required(query.user_id.as_deref(), "User ID is required")?;
    let bets = state.store.list_bets(user_id, HISTORY_LIMIT).await?;

    let now = Utc::now();
    let rules = &state.config.rules;
    let remaining_bets = state
        .store
        .get_user(user_id)
        .await?
        .map(|user| user.bet_counter().remaining(now, rules.max_daily_bets));
    let seconds_left = bets
        .first()
        .filter(|bet| !bet.result.is_settled())
        .and_then(|bet| bet.round(rules.countdown()).remaining(now))
        .map(|left| left.num_seconds());

    Ok(HttpResponse::Ok().json(json!({
        "bets": bets,
        "remaining_bets": remaining_bets,
        "seconds_left": seconds_left,
    })))
}

#[post("/betting")]
pub async fn place_bet(
    req: web::Json<PlaceBetRequest>,
    state: web::Data<AppState>,
) -> ApiResult<HttpResponse> {
    let user_id = required(req.user_id.as_deref(), "User ID is required")?;
    let rules = &state.config.rules;
    let stake = req.amount.unwrap_or(rules.default_stake);
    let start_price = match req.sol_price_start {
        Some(price) => price,
        None => state.feed.current_price().await.price,
    };

    // an unsettled newest bet resumes its round, which refuses a second placement
    let now = Utc::now();
    let mut round = match state.store.list_bets(user_id, 1).await?.first() {
        Some(bet) if !bet.result.is_settled() => bet.round(rules.countdown()),
        _ => BettingRound::new(rules.countdown()),
    };
    round.place(req.direction, stake, start_price, now)?;

    let (bet, remaining) = state
        .store
        .place_bet(
            NewBet {
                user_id: user_id.to_string(),
                direction: req.direction,
                amount: stake,
                sol_price_start: start_price,
            },
            rules.max_daily_bets,
            now,
        )
        .await?
        .ok_or(BetError::DailyLimitReached {
            limit: rules.max_daily_bets,
        })?;
    info!(
        "User {} bet {} {} at {} ({} left today)",
        user_id, bet.amount, bet.direction, bet.sol_price_start, remaining
    );
    metrics::record_bet_placed(bet.direction.as_str());

    Ok(HttpResponse::Ok().json(json!({
        "bet": bet,
        "remaining_bets": remaining,
    })))
}

#[put("/betting")]
pub async fn settle_bet(
    req: web::Json<SettleBetRequest>,
    state: web::Data<AppState>,
) -> ApiResult<HttpResponse> {
    let id = required(req.id.as_deref(), "Bet ID is required")?;
    let bet = state
        .store
        .get_bet(id)
        .await?
        .ok_or_else(|| ApiError::not_found("Bet"))?;
    if bet.result.is_settled() {
        return Err(ApiError::bad_request("Bet already settled"));
    }

    let end_price = match req.sol_price_end {
        Some(price) => price,
        None => state.feed.current_price().await.price,
    };
    let settlement = bet
        .round(state.config.rules.countdown())
        .settle(end_price, Utc::now())?;

    let bet = state
        .store
        .settle_bet(id, &settlement)
        .await?
        .ok_or_else(|| ApiError::not_found("Bet"))?;
    info!(
        "Bet {} settled {} ({} -> {}), earned {}",
        bet.id, bet.result, bet.sol_price_start, end_price, bet.score_earned
    );
    metrics::record_bet_settled(bet.result.as_str());

    Ok(HttpResponse::Ok().json(json!({ "bet": bet })))
}
