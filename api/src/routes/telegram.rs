use actix_web::{post, web, HttpResponse};
use chrono::Utc;
use common::{
    models::Profile,
    telegram::{self, Update},
};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, error, warn};

use super::user::find_or_register;
use crate::{
    error::{ApiError, ApiResult},
    state::AppState,
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequest {
    init_data: Option<String>,
}

/// Checks the Mini App launch payload and signs the player in, registering
/// them on first launch.
#[post("/verify-telegram")]
pub async fn verify(
    req: web::Json<VerifyRequest>,
    state: web::Data<AppState>,
) -> ApiResult<HttpResponse> {
    let init_data = req
        .init_data
        .as_deref()
        .ok_or_else(|| ApiError::bad_request("initData is required"))?;

    let data = telegram::verify_init_data(
        init_data,
        &state.config.telegram_bot_token,
        state.config.init_data_max_age,
        Utc::now(),
    )
    .map_err(|e| {
        warn!("Rejected Telegram init data: {}", e);
        ApiError::from(e)
    })?;

    let profile = Profile {
        username: data.user.username.clone(),
        first_name: data.user.first_name.clone(),
        last_name: data.user.last_name.clone(),
    };
    let id = data.user.id.to_string();
    let (user, is_new) = find_or_register(state.store.as_ref(), &id, &profile, None).await?;

    Ok(HttpResponse::Ok().json(json!({
        "valid": true,
        "user": user,
        "isNewUser": is_new,
    })))
}

/// Bot webhook. Always acknowledges so Telegram does not redeliver.
#[post("/telegram/webhook")]
pub async fn webhook(update: web::Json<Update>, state: web::Data<AppState>) -> HttpResponse {
    let config = &state.config;
    match telegram::reply_to(&update, &config.web_app_url, &config.community_url) {
        Some(reply) => {
            if let Err(e) = state.bot.send_reply(&reply).await {
                error!("Failed to reply to chat {}: {}", reply.chat_id, e);
            }
        }
        None => debug!("Ignoring update {}", update.update_id),
    }

    HttpResponse::Ok().json(json!({ "ok": true }))
}
