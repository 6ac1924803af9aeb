use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use common::{StoreError, TelegramError};
use game::{BetError, TaskError};
use serde_json::json;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("Rate limit exceeded. Try again later.")]
    TooManyRequests,
    #[error("{0}")]
    Internal(String),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        ApiError::BadRequest(msg.into())
    }

    pub fn not_found(what: &str) -> Self {
        ApiError::NotFound(format!("{what} not found"))
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let message = match self {
            ApiError::Internal(detail) => {
                error!("Internal error: {}", detail);
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };
        HttpResponse::build(self.status_code()).json(json!({ "error": message }))
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound("user") => ApiError::not_found("User"),
            StoreError::NotFound("bet") => ApiError::not_found("Bet"),
            StoreError::NotFound(what) => ApiError::not_found(what),
            StoreError::Conflict("bet") => ApiError::bad_request("Bet already settled"),
            StoreError::Conflict("pending_bet") => {
                ApiError::bad_request(BetError::RoundInProgress.to_string())
            }
            StoreError::Conflict("user_task") => {
                ApiError::bad_request(TaskError::AlreadyCompleted.to_string())
            }
            StoreError::Conflict("task_key") => {
                ApiError::bad_request("Task with this task_key already exists")
            }
            StoreError::Conflict(what) => {
                ApiError::Conflict(format!("Conflicting update on {what}, retry"))
            }
            StoreError::Click(err) => ApiError::BadRequest(err.to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<BetError> for ApiError {
    fn from(err: BetError) -> Self {
        ApiError::BadRequest(err.to_string())
    }
}

impl From<TaskError> for ApiError {
    fn from(err: TaskError) -> Self {
        ApiError::BadRequest(err.to_string())
    }
}

impl From<TelegramError> for ApiError {
    fn from(err: TelegramError) -> Self {
        match err {
            TelegramError::NoBotToken => ApiError::Internal(err.to_string()),
            TelegramError::MissingUser | TelegramError::MalformedUser(_) => {
                ApiError::bad_request("No user data found")
            }
            _ => ApiError::Forbidden("Invalid Telegram data".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::body::to_bytes;

    #[actix_web::test]
    async fn renders_json_envelope() {
        let err = ApiError::from(BetError::DailyLimitReached { limit: 10 });
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);

        let body = to_bytes(err.error_response().into_body()).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["error"], "Daily betting limit reached (10 per day)");
    }

    #[actix_web::test]
    async fn hides_internal_details() {
        let err = ApiError::from(StoreError::Rest {
            status: 500,
            body: "secret".to_string(),
        });
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = to_bytes(err.error_response().into_body()).await.unwrap();
        assert!(!String::from_utf8_lossy(&body).contains("secret"));
    }

    #[test]
    fn maps_store_errors() {
        assert_eq!(
            ApiError::from(StoreError::NotFound("user")).to_string(),
            "User not found"
        );
        assert_eq!(
            ApiError::from(StoreError::Conflict("user_task")).to_string(),
            "Task already completed"
        );
        assert!(matches!(
            ApiError::from(StoreError::Conflict("pending_bet")),
            ApiError::BadRequest(msg) if msg == "a bet is already in progress"
        ));
        assert!(matches!(
            ApiError::from(TelegramError::BadSignature),
            ApiError::Forbidden(_)
        ));
    }

    #[test]
    fn signed_payload_without_user_is_a_bad_request() {
        for err in [
            TelegramError::MissingUser,
            TelegramError::MalformedUser("expected value".to_string()),
        ] {
            let err = ApiError::from(err);
            assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
            assert_eq!(err.to_string(), "No user data found");
        }
    }
}
