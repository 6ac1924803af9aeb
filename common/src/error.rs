use game::{ClickError, ParseEnumError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("REST backend request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("REST backend returned {status}: {body}")]
    Rest { status: u16, body: String },

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("Conflicting write on {0}")]
    Conflict(&'static str),

    #[error("Corrupt row: {0}")]
    Corrupt(#[from] ParseEnumError),

    #[error(transparent)]
    Click(#[from] ClickError),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TelegramError {
    #[error("init data is empty")]
    Empty,
    #[error("init data has no hash")]
    MissingHash,
    #[error("init data hash is not valid hex")]
    MalformedHash,
    #[error("init data signature mismatch")]
    BadSignature,
    #[error("init data expired")]
    Expired,
    #[error("init data has no user")]
    MissingUser,
    #[error("init data user is malformed: {0}")]
    MalformedUser(String),
    #[error("bot token is not configured")]
    NoBotToken,
}
