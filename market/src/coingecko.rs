use std::time::Duration;

use reqwest::Client;
use serde_json::Value;
use tracing::debug;

use crate::error::MarketError;

pub const COINGECKO_API_URL: &str = "https://api.coingecko.com";

pub struct CoinGeckoClient {
    client: Client,
    base_url: String,
}

impl CoinGeckoClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, MarketError> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Spot price of `coin_id` in `vs_currency`, e.g. `solana` in `usd`.
    pub async fn simple_price(&self, coin_id: &str, vs_currency: &str) -> Result<f64, MarketError> {
        let url = format!("{}/api/v3/simple/price", self.base_url);
        debug!("Fetching {} price from CoinGecko", coin_id);

        let response = self
            .client
            .get(&url)
            .query(&[("ids", coin_id), ("vs_currencies", vs_currency)])
            .header("Accept", "application/json")
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(MarketError::Status {
                upstream: "CoinGecko",
                status: response.status().as_u16(),
            });
        }

        let body: Value = response.json().await?;
        parse_simple_price(&body, coin_id, vs_currency).ok_or(MarketError::MissingPrice("CoinGecko"))
    }
}

/// Reads `{"<coin>": {"<vs>": 123.4}}`.
pub fn parse_simple_price(body: &Value, coin_id: &str, vs_currency: &str) -> Option<f64> {
    body.get(coin_id)?
        .get(vs_currency)?
        .as_f64()
        .filter(|price| price.is_finite() && *price > 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reads_nested_price() {
        let body = json!({ "solana": { "usd": 142.37 } });
        assert_eq!(parse_simple_price(&body, "solana", "usd"), Some(142.37));
        assert_eq!(parse_simple_price(&body, "solana", "eur"), None);
        assert_eq!(parse_simple_price(&json!({}), "solana", "usd"), None);
        assert_eq!(
            parse_simple_price(&json!({ "solana": { "usd": 0 } }), "solana", "usd"),
            None
        );
    }
}
