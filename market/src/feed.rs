use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::{
    binance::{BinanceClient, BINANCE_API_URL},
    coingecko::{CoinGeckoClient, COINGECKO_API_URL},
    error::MarketError,
    mock,
    stream::{trade_stream_url, TradeStream, BINANCE_STREAM_URL},
    Candle, PriceSource, PriceTick, TimeFrame,
};

#[derive(Debug, Clone)]
pub struct FeedConfig {
    pub symbol: String,
    pub coin_id: String,
    pub vs_currency: String,
    pub coingecko_url: String,
    pub binance_url: String,
    pub stream_url: String,
    pub request_timeout: Duration,
    /// Stream ticks older than this are ignored.
    pub stream_max_age: Duration,
    pub reconnect_delay: Duration,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            symbol: "SOLUSDT".to_string(),
            coin_id: "solana".to_string(),
            vs_currency: "usd".to_string(),
            coingecko_url: COINGECKO_API_URL.to_string(),
            binance_url: BINANCE_API_URL.to_string(),
            stream_url: BINANCE_STREAM_URL.to_string(),
            request_timeout: Duration::from_secs(5),
            stream_max_age: Duration::from_secs(10),
            reconnect_delay: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandleSeries {
    pub candles: Vec<Candle>,
    pub mock: bool,
}

/// Price source with fallbacks: a fresh stream tick, then CoinGecko, then the
/// Binance ticker, then a mock price.
pub struct PriceFeed {
    config: FeedConfig,
    coingecko: CoinGeckoClient,
    binance: BinanceClient,
    latest: Option<watch::Receiver<Option<PriceTick>>>,
}

impl PriceFeed {
    pub fn new(config: FeedConfig) -> Result<Self, MarketError> {
        Ok(Self {
            coingecko: CoinGeckoClient::new(&config.coingecko_url, config.request_timeout)?,
            binance: BinanceClient::new(&config.binance_url, config.request_timeout)?,
            config,
            latest: None,
        })
    }

    /// Subscribes to the live trade stream for the configured symbol.
    pub fn with_stream(mut self) -> Self {
        let url = trade_stream_url(&self.config.stream_url, &self.config.symbol);
        let (rx, _handle) = TradeStream::spawn(url, self.config.reconnect_delay);
        self.latest = Some(rx);
        self
    }

    /// Uses an existing tick channel instead of opening a stream.
    pub fn with_ticks(mut self, rx: watch::Receiver<Option<PriceTick>>) -> Self {
        self.latest = Some(rx);
        self
    }

    fn fresh_tick(&self) -> Option<PriceTick> {
        let tick = (*self.latest.as_ref()?.borrow())?;
        let age = (Utc::now() - tick.at).to_std().unwrap_or_default();
        (age <= self.config.stream_max_age).then_some(tick)
    }

    /// Never fails: when every upstream is down the mock price is returned
    /// with `source: Mock`.
    pub async fn current_price(&self) -> PriceTick {
        if let Some(tick) = self.fresh_tick() {
            return tick;
        }

        match self
            .coingecko
            .simple_price(&self.config.coin_id, &self.config.vs_currency)
            .await
        {
            Ok(price) => return self.tick(price, PriceSource::CoinGecko),
            Err(e) => debug!("CoinGecko price unavailable: {}", e),
        }

        match self.binance.ticker_price(&self.config.symbol).await {
            Ok(price) => return self.tick(price, PriceSource::Binance),
            Err(e) => debug!("Binance ticker unavailable: {}", e),
        }

        warn!("All price sources failed, using mock price");
        self.tick(mock::mock_price(&mut rand::thread_rng()), PriceSource::Mock)
    }

    pub async fn candles(&self, timeframe: TimeFrame, limit: usize) -> CandleSeries {
        match self
            .binance
            .klines(&self.config.symbol, timeframe, limit)
            .await
        {
            Ok(candles) if !candles.is_empty() => CandleSeries {
                candles,
                mock: false,
            },
            Ok(_) => self.mock_series(timeframe, limit, "empty response"),
            Err(e) => self.mock_series(timeframe, limit, &e.to_string()),
        }
    }

    fn mock_series(&self, timeframe: TimeFrame, limit: usize, reason: &str) -> CandleSeries {
        warn!("K-lines unavailable ({}), generating mock candles", reason);
        let candles = mock::mock_candles(&mut rand::thread_rng(), timeframe, limit, Utc::now());
        CandleSeries {
            candles,
            mock: true,
        }
    }

    fn tick(&self, price: f64, source: PriceSource) -> PriceTick {
        PriceTick {
            price,
            source,
            at: Utc::now(),
        }
    }
}
