use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use http::Uri;
use serde_json::Value;
use tokio::{sync::watch, task::JoinHandle};
use tokio_websockets::ClientBuilder;
use tracing::{debug, info, warn};

use crate::{error::MarketError, PriceSource, PriceTick};

pub const BINANCE_STREAM_URL: &str = "wss://stream.binance.com:9443/ws";

/// Stream URL for a symbol's trades, e.g. `.../ws/solusdt@trade`.
pub fn trade_stream_url(base: &str, symbol: &str) -> String {
    format!(
        "{}/{}@trade",
        base.trim_end_matches('/'),
        symbol.to_lowercase()
    )
}

/// Price and trade time out of a trade event. Accepts both the raw event and
/// the combined-stream envelope `{"stream": ..., "data": {...}}`.
pub fn parse_trade_message(text: &str) -> Option<(f64, DateTime<Utc>)> {
    let value: Value = serde_json::from_str(text).ok()?;
    let event = value.get("data").unwrap_or(&value);

    let price: f64 = event.get("p")?.as_str()?.parse().ok()?;
    if !price.is_finite() || price <= 0.0 {
        return None;
    }
    let at = event
        .get("T")
        .and_then(Value::as_i64)
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .unwrap_or_else(Utc::now);
    Some((price, at))
}

/// Live trade subscription that keeps the latest tick in a `watch` channel.
pub struct TradeStream {
    url: String,
    reconnect_delay: Duration,
    tx: watch::Sender<Option<PriceTick>>,
}

impl TradeStream {
    /// Starts the subscription in the background. The task stops once every
    /// receiver has been dropped.
    pub fn spawn(
        url: String,
        reconnect_delay: Duration,
    ) -> (watch::Receiver<Option<PriceTick>>, JoinHandle<()>) {
        let (tx, rx) = watch::channel(None);
        let stream = TradeStream {
            url,
            reconnect_delay,
            tx,
        };
        let handle = tokio::spawn(stream.run());
        (rx, handle)
    }

    async fn run(self) {
        loop {
            match self.connect_once().await {
                Ok(()) => warn!("Trade stream {} closed", self.url),
                Err(e) => warn!("Trade stream {} failed: {}", self.url, e),
            }
            if self.tx.is_closed() {
                debug!("No price subscribers left, stopping trade stream");
                return;
            }
            info!("Reconnecting trade stream in {:?}", self.reconnect_delay);
            tokio::time::sleep(self.reconnect_delay).await;
        }
    }

    async fn connect_once(&self) -> Result<(), MarketError> {
        let uri = Uri::try_from(self.url.as_str())?;
        let (mut client, _) = ClientBuilder::from_uri(uri).connect().await?;
        info!("Connected to trade stream {}", self.url);

        while let Some(msg) = client.next().await {
            let msg = msg?;
            let Some(text) = msg.as_text() else {
                continue;
            };
            if let Some((price, at)) = parse_trade_message(text) {
                self.tx.send_replace(Some(PriceTick {
                    price,
                    source: PriceSource::Stream,
                    at,
                }));
            }
            if self.tx.is_closed() {
                break;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_raw_and_combined_trade_events() {
        let raw = r#"{"e":"trade","E":1717000000100,"s":"SOLUSDT","t":1,"p":"165.42000000","q":"1.2","T":1717000000099,"m":true}"#;
        let (price, at) = parse_trade_message(raw).unwrap();
        assert_eq!(price, 165.42);
        assert_eq!(at.timestamp_millis(), 1_717_000_000_099);

        let combined = format!(r#"{{"stream":"solusdt@trade","data":{raw}}}"#);
        assert_eq!(parse_trade_message(&combined).unwrap().0, 165.42);
    }

    #[test]
    fn ignores_non_trade_messages() {
        assert!(parse_trade_message(r#"{"result":null,"id":1}"#).is_none());
        assert!(parse_trade_message("not json").is_none());
        assert!(parse_trade_message(r#"{"p":"-1"}"#).is_none());
    }

    #[test]
    fn builds_trade_stream_url() {
        assert_eq!(
            trade_stream_url("wss://stream.binance.com:9443/ws/", "SOLUSDT"),
            "wss://stream.binance.com:9443/ws/solusdt@trade"
        );
    }
}
