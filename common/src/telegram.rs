use std::time::Duration;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::{error, info};

use crate::error::TelegramError;

type HmacSha256 = Hmac<Sha256>;

const TELEGRAM_API_URL: &str = "https://api.telegram.org";
const WEB_APP_DATA_KEY: &[u8] = b"WebAppData";

pub const START_COMMAND: &str = "/start";
pub const FALLBACK_REPLY: &str = "Type /start to begin!";
pub const WELCOME_MESSAGE: &str = "🎮 Welcome to FragTopu! 🏆

Get ready for an exciting gaming experience on Telegram! 🚀 Ahead of you lie fun mini-games, daily quests, and a chance to compete with friends!

🎯 Play the Clicker Game and test your tapping skills!
📈 Bet on SOL price movements and earn points!
🏅 Complete daily tasks for bonus rewards!
🌟 Climb the global leaderboards and show off your skills!

Ready to start your journey?
Press the button below and let's begin the adventure!";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelegramUser {
    pub id: i64,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub username: Option<String>,
    pub language_code: Option<String>,
    #[serde(default)]
    pub is_premium: bool,
}

/// Fields of a verified init-data payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitData {
    pub user: TelegramUser,
    pub auth_date: Option<DateTime<Utc>>,
    pub query_id: Option<String>,
}

fn keyed(key: &[u8]) -> HmacSha256 {
    HmacSha256::new_from_slice(key).expect("HMac can take key of any size")
}

fn secret_key(bot_token: &str) -> Vec<u8> {
    let mut mac = keyed(WEB_APP_DATA_KEY);
    mac.update(bot_token.as_bytes());
    mac.finalize().into_bytes().to_vec()
}

/// `key=value` lines sorted by key, `hash` excluded, joined with newlines.
fn data_check_string(pairs: &[(String, String)]) -> String {
    let mut fields: Vec<&(String, String)> =
        pairs.iter().filter(|(key, _)| key != "hash").collect();
    fields.sort_by(|a, b| a.0.cmp(&b.0));
    fields
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Signs a data-check string the way the Telegram client does. Used to build
/// fixtures and by [`verify_init_data`].
pub fn sign_data_check_string(data_check_string: &str, bot_token: &str) -> String {
    let mut mac = keyed(&secret_key(bot_token));
    mac.update(data_check_string.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Verifies a Mini App `initData` query string against the bot token and
/// returns the user it vouches for.
///
/// `max_age` of `None` skips the freshness check.
pub fn verify_init_data(
    init_data: &str,
    bot_token: &str,
    max_age: Option<Duration>,
    now: DateTime<Utc>,
) -> Result<InitData, TelegramError> {
    if bot_token.is_empty() {
        return Err(TelegramError::NoBotToken);
    }
    if init_data.trim().is_empty() {
        return Err(TelegramError::Empty);
    }

    let pairs: Vec<(String, String)> = url::form_urlencoded::parse(init_data.as_bytes())
        .into_owned()
        .collect();
    let hash = pairs
        .iter()
        .find(|(key, _)| key == "hash")
        .map(|(_, value)| value.as_str())
        .ok_or(TelegramError::MissingHash)?;
    let expected = hex::decode(hash).map_err(|_| TelegramError::MalformedHash)?;

    let mut mac = keyed(&secret_key(bot_token));
    mac.update(data_check_string(&pairs).as_bytes());
    mac.verify_slice(&expected)
        .map_err(|_| TelegramError::BadSignature)?;

    let field = |name: &str| {
        pairs
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.clone())
    };

    let auth_date = field("auth_date")
        .and_then(|raw| raw.parse::<i64>().ok())
        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0));
    if let (Some(max_age), Some(auth_date)) = (max_age, auth_date) {
        let age = now - auth_date;
        if age.num_seconds() > max_age.as_secs() as i64 {
            return Err(TelegramError::Expired);
        }
    }

    let raw_user = field("user").ok_or(TelegramError::MissingUser)?;
    let user: TelegramUser = serde_json::from_str(&raw_user)
        .map_err(|err| TelegramError::MalformedUser(err.to_string()))?;

    Ok(InitData {
        user,
        auth_date,
        query_id: field("query_id"),
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebAppInfo {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InlineKeyboardButton {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub web_app: Option<WebAppInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyMarkup {
    pub inline_keyboard: Vec<Vec<InlineKeyboardButton>>,
}

pub fn welcome_keyboard(web_app_url: &str, community_url: &str) -> ReplyMarkup {
    ReplyMarkup {
        inline_keyboard: vec![
            vec![InlineKeyboardButton {
                text: "Start Playing".to_string(),
                url: None,
                web_app: Some(WebAppInfo {
                    url: web_app_url.to_string(),
                }),
            }],
            vec![InlineKeyboardButton {
                text: "Our Community".to_string(),
                url: Some(community_url.to_string()),
                web_app: None,
            }],
        ],
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub chat: Chat,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    #[serde(default)]
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
}

/// A message the bot should send in reply to an update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub chat_id: i64,
    pub text: String,
    pub reply_markup: Option<ReplyMarkup>,
}

/// Decides the bot's answer to an update; updates without a message get none.
pub fn reply_to(update: &Update, web_app_url: &str, community_url: &str) -> Option<Reply> {
    let message = update.message.as_ref()?;
    let text = message.text.as_deref().unwrap_or_default();

    let reply = if text.contains(START_COMMAND) {
        Reply {
            chat_id: message.chat.id,
            text: WELCOME_MESSAGE.to_string(),
            reply_markup: Some(welcome_keyboard(web_app_url, community_url)),
        }
    } else {
        Reply {
            chat_id: message.chat.id,
            text: FALLBACK_REPLY.to_string(),
            reply_markup: None,
        }
    };
    Some(reply)
}

#[derive(Serialize)]
struct SendMessageRequest<'a> {
    chat_id: i64,
    text: &'a str,
    parse_mode: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_markup: Option<&'a ReplyMarkup>,
}

#[derive(Clone)]
pub struct BotClient {
    client: reqwest::Client,
    api_url: String,
    bot_token: String,
}

impl BotClient {
    pub fn new(bot_token: &str) -> Self {
        Self::with_api_url(TELEGRAM_API_URL, bot_token)
    }

    pub fn with_api_url(api_url: &str, bot_token: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url: api_url.trim_end_matches('/').to_string(),
            bot_token: bot_token.to_string(),
        }
    }

    pub async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        reply_markup: Option<&ReplyMarkup>,
    ) -> Result<(), reqwest::Error> {
        if self.bot_token.is_empty() {
            error!("Bot token is not configured, dropping message to {}", chat_id);
            return Ok(());
        }
        let url = format!("{}/bot{}/sendMessage", self.api_url, self.bot_token);
        let request = SendMessageRequest {
            chat_id,
            text,
            parse_mode: "Markdown",
            reply_markup,
        };

        info!("Sending telegram message to chat {}", chat_id);
        let response = self.client.post(&url).json(&request).send().await?;
        info!("Telegram API response status: {}", response.status());

        if !response.status().is_success() {
            let error_text = response.text().await?;
            error!("Telegram API error: {}", error_text);
        }
        Ok(())
    }

    pub async fn send_reply(&self, reply: &Reply) -> Result<(), reqwest::Error> {
        self.send_message(reply.chat_id, &reply.text, reply.reply_markup.as_ref())
            .await
    }
}
