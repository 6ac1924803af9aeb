use std::sync::Arc;

use common::{telegram::BotClient, Store};
use market::PriceFeed;

use crate::config::Config;

pub struct AppState {
    pub store: Arc<dyn Store>,
    pub feed: Arc<PriceFeed>,
    pub bot: BotClient,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, feed: Arc<PriceFeed>, config: Config) -> Self {
        Self {
            bot: BotClient::new(&config.telegram_bot_token),
            store,
            feed,
            config: Arc::new(config),
        }
    }
}
