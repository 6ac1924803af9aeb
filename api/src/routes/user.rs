use actix_web::{get, post, put, web, HttpResponse};
use chrono::Utc;
use common::{
    models::{NewUser, Profile, Referral, ScoreUpdate, User},
    Store, StoreError,
};
use game::referral::{self, MAX_CODE_ATTEMPTS};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use super::required;
use crate::{
    error::{ApiError, ApiResult},
    metrics,
    state::AppState,
};

const USER_ID_REQUIRED: &str = "User ID is required";

#[derive(Debug, Deserialize)]
pub struct UserQuery {
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UserRequest {
    id: Option<String>,
    #[serde(flatten)]
    profile: Profile,
    referrer_code: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ScoresRequest {
    id: Option<String>,
    clicker_score: Option<i64>,
    betting_score: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct ClicksRequest {
    id: Option<String>,
    taps: u32,
}

/// Returns the stored user, updating the profile when one is given, or
/// registers a new one. The flag is `true` for a fresh registration.
pub(crate) async fn find_or_register(
    store: &dyn Store,
    id: &str,
    profile: &Profile,
    referrer_code: Option<&str>,
) -> ApiResult<(User, bool)> {
    if let Some(user) = store.get_user(id).await? {
        if profile.is_empty() {
            return Ok((user, false));
        }
        let user = store
            .update_profile(id, profile)
            .await?
            .ok_or_else(|| ApiError::not_found("User"))?;
        return Ok((user, false));
    }

    let referrer_id = match referrer_code.filter(|code| referral::is_valid_code(code)) {
        Some(code) => store
            .find_user_by_referral_code(code)
            .await?
            .map(|referrer| referrer.id)
            .filter(|referrer| referrer != id),
        None => None,
    };

    for attempt in 1..=MAX_CODE_ATTEMPTS {
        let new_user = NewUser {
            id: id.to_string(),
            username: profile.username.clone(),
            first_name: profile.first_name.clone(),
            last_name: profile.last_name.clone(),
            referral_code: referral::generate_code(&mut rand::thread_rng()),
            referrer_id: referrer_id.clone(),
        };

        match store.create_user(new_user, Utc::now()).await {
            Ok(user) => {
                info!("Registered user {} (referrer: {:?})", user.id, user.referrer_id);
                metrics::record_user_created();
                return Ok((user, true));
            }
            Err(StoreError::Conflict("referral_code")) => {
                warn!(
                    "Referral code collision for user {} (attempt {}/{})",
                    id, attempt, MAX_CODE_ATTEMPTS
                );
            }
            // lost a race with a concurrent registration of the same id
            Err(StoreError::Conflict("user")) => {
                let user = store
                    .get_user(id)
                    .await?
                    .ok_or_else(|| ApiError::not_found("User"))?;
                return Ok((user, false));
            }
            Err(e) => return Err(e.into()),
        }
    }

    Err(ApiError::Internal(format!(
        "no unique referral code for user {id} after {MAX_CODE_ATTEMPTS} attempts"
    )))
}

#[get("/user")]
pub async fn get_user(
    query: web::Query<UserQuery>,
    state: web::Data<AppState>,
) -> ApiResult<HttpResponse> {
    let id = required(query.id.as_deref(), USER_ID_REQUIRED)?;
    let user = state
        .store
        .get_user(id)
        .await?
        .ok_or_else(|| ApiError::not_found("User"))?;

    let rank = user.rank();
    Ok(HttpResponse::Ok().json(json!({
        "user": user,
        "rank": rank,
        "next_rank_at": rank.next_threshold(),
    })))
}

#[post("/user")]
pub async fn upsert_user(
    req: web::Json<UserRequest>,
    state: web::Data<AppState>,
) -> ApiResult<HttpResponse> {
    let id = required(req.id.as_deref(), USER_ID_REQUIRED)?;
    let (user, _) = find_or_register(
        state.store.as_ref(),
        id,
        &req.profile,
        req.referrer_code.as_deref(),
    )
    .await?;

    Ok(HttpResponse::Ok().json(json!({ "user": user })))
}

#[put("/user")]
pub async fn update_scores(
    req: web::Json<ScoresRequest>,
    state: web::Data<AppState>,
) -> ApiResult<HttpResponse> {
    let id = required(req.id.as_deref(), USER_ID_REQUIRED)?;
    let update = ScoreUpdate {
        clicker: req.clicker_score,
        betting: req.betting_score,
    };
    if update.is_empty() {
        return Err(ApiError::bad_request("No valid fields to update"));
    }
    if update.clicker.unwrap_or(0) < 0 || update.betting.unwrap_or(0) < 0 {
        return Err(ApiError::bad_request("Scores cannot be negative"));
    }

    let user = state
        .store
        .set_scores(id, update, Utc::now())
        .await?
        .ok_or_else(|| ApiError::not_found("User"))?;

    Ok(HttpResponse::Ok().json(json!({ "user": user })))
}

#[post("/user/clicks")]
pub async fn record_clicks(
    req: web::Json<ClicksRequest>,
    state: web::Data<AppState>,
) -> ApiResult<HttpResponse> {
    let id = required(req.id.as_deref(), USER_ID_REQUIRED)?;
    let (user, outcome) = state
        .store
        .record_taps(id, req.taps, Utc::now())
        .await?
        .ok_or_else(|| ApiError::not_found("User"))?;
    metrics::record_taps(req.taps);

    Ok(HttpResponse::Ok().json(json!({
        "points": outcome.points,
        "boost": user.boost,
        "user": user,
    })))
}

#[get("/user/referrals")]
pub async fn referrals(
    query: web::Query<UserQuery>,
    state: web::Data<AppState>,
) -> ApiResult<HttpResponse> {
    let id = required(query.id.as_deref(), USER_ID_REQUIRED)?;
    let user = state
        .store
        .get_user(id)
        .await?
        .ok_or_else(|| ApiError::not_found("User"))?;

    let referrals: Vec<Referral> = state
        .store
        .list_referrals(&user.id)
        .await?
        .iter()
        .map(Referral::from)
        .collect();

    Ok(HttpResponse::Ok().json(json!({
        "referral_link": referral::referral_link(&state.config.referral_base_url, &user.referral_code),
        "referral_code": user.referral_code,
        "referrals": referrals,
    })))
}
