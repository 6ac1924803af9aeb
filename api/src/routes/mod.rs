use actix_web::{error::InternalError, web, HttpResponse};

use crate::error::ApiError;

mod betting;
mod health;
mod leaderboard;
mod price;
mod task;
mod telegram;
mod user;

/// Registers every endpoint. Malformed JSON bodies and query strings answer
/// with the same `{"error": ...}` envelope as the handlers.
pub fn configure(cfg: &mut web::ServiceConfig) {
    let json = web::JsonConfig::default().error_handler(|err, _req| {
        let message = format!("Invalid request body: {err}");
        InternalError::from_response(err, ApiError::bad_request(message).into_response()).into()
    });
    let query = web::QueryConfig::default().error_handler(|err, _req| {
        let message = format!("Invalid query string: {err}");
        InternalError::from_response(err, ApiError::bad_request(message).into_response()).into()
    });

    cfg.app_data(json)
        .app_data(query)
        .service(health::health)
        .service(health::prometheus_metrics)
        .service(
            web::scope("/api")
                .service(user::get_user)
                .service(user::upsert_user)
                .service(user::update_scores)
                .service(user::record_clicks)
                .service(user::referrals)
                .service(betting::list_bets)
                .service(betting::place_bet)
                .service(betting::settle_bet)
                .service(task::list_user_tasks)
                .service(task::complete_task)
                .service(task::create_task)
                .service(leaderboard::leaderboard)
                .service(price::candles)
                .service(price::current_price)
                .service(telegram::verify)
                .service(telegram::webhook),
        )
        .default_service(web::to(|| async {
            ApiError::NotFound("Not found".to_string()).into_response()
        }));
}

/// A required id from a query string or body; blank counts as missing.
fn required<'a>(value: Option<&'a str>, message: &str) -> Result<&'a str, ApiError> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::bad_request(message))
}

impl ApiError {
    fn into_response(self) -> HttpResponse {
        actix_web::ResponseError::error_response(&self)
    }
}
