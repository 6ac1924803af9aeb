pub mod db;
pub mod error;
pub mod models;
pub mod seed;
pub mod store;
pub mod telegram;

pub use error::{StoreError, StoreResult, TelegramError};
pub use store::Store;
