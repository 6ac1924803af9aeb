use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::{error::MarketError, Candle, TimeFrame};

pub const BINANCE_API_URL: &str = "https://api.binance.com";
pub const MAX_KLINES: usize = 1000;

#[derive(Deserialize)]
struct TickerPrice {
    price: String,
}

pub struct BinanceClient {
    client: Client,
    base_url: String,
}

impl BinanceClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, MarketError> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Most recent `limit` candles for `symbol`, oldest first.
    pub async fn klines(
        &self,
        symbol: &str,
        timeframe: TimeFrame,
        limit: usize,
    ) -> Result<Vec<Candle>, MarketError> {
        let url = format!(
            "{}/api/v3/klines?symbol={}&interval={}&limit={}",
            self.base_url,
            symbol,
            timeframe,
            limit.clamp(1, MAX_KLINES)
        );
        debug!("Fetching K-lines: {}", url);

        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(MarketError::Status {
                upstream: "Binance",
                status: response.status().as_u16(),
            });
        }

        let data: Vec<Vec<serde_json::Value>> = response.json().await?;
        let candles: Vec<Candle> = data.iter().filter_map(|row| parse_kline_row(row)).collect();

        debug!("Fetched {} K-lines for {}", candles.len(), symbol);
        Ok(candles)
    }

    pub async fn ticker_price(&self, symbol: &str) -> Result<f64, MarketError> {
        let url = format!("{}/api/v3/ticker/price", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("symbol", symbol)])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(MarketError::Status {
                upstream: "Binance",
                status: response.status().as_u16(),
            });
        }

        let ticker: TickerPrice = response.json().await?;
        ticker
            .price
            .parse::<f64>()
            .ok()
            .filter(|price| price.is_finite() && *price > 0.0)
            .ok_or(MarketError::MissingPrice("Binance"))
    }
}

/// One `/api/v3/klines` row: `[open_time_ms, "open", "high", "low", "close", ...]`.
pub fn parse_kline_row(row: &[serde_json::Value]) -> Option<Candle> {
    if row.len() < 5 {
        return None;
    }

    Some(Candle {
        time: row[0].as_i64()? / 1000,
        open: row[1].as_str()?.parse().ok()?,
        high: row[2].as_str()?.parse().ok()?,
        low: row[3].as_str()?.parse().ok()?,
        close: row[4].as_str()?.parse().ok()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_kline_rows() {
        let row = json!([
            1_717_000_020_000i64,
            "165.10",
            "166.00",
            "164.80",
            "165.55",
            "1200.5",
            1_717_000_079_999i64,
            "198000.1",
            321,
            "600.1",
            "99000.0",
            "0"
        ]);
        let candle = parse_kline_row(row.as_array().unwrap()).unwrap();
        assert_eq!(
            candle,
            Candle {
                time: 1_717_000_020,
                open: 165.10,
                high: 166.00,
                low: 164.80,
                close: 165.55,
            }
        );
    }

    #[test]
    fn skips_malformed_rows() {
        assert!(parse_kline_row(json!([1, "1.0"]).as_array().unwrap()).is_none());
        assert!(
            parse_kline_row(json!([1, 1.0, "2", "0.5", "1.5"]).as_array().unwrap()).is_none()
        );
    }
}
