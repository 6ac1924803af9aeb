//! SOL/USD price data: spot quotes, OHLC candles and a live trade stream,
//! with a mock fallback when every upstream is unreachable.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod binance;
pub mod coingecko;
pub mod error;
pub mod feed;
pub mod mock;
pub mod stream;

pub use error::MarketError;
pub use feed::{CandleSeries, FeedConfig, PriceFeed};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// Open time, seconds since the epoch.
    pub time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TimeFrame {
    #[default]
    #[serde(rename = "1m")]
    OneMinute,
    #[serde(rename = "5m")]
    FiveMinutes,
    #[serde(rename = "15m")]
    FifteenMinutes,
    #[serde(rename = "1h")]
    OneHour,
    #[serde(rename = "4h")]
    FourHours,
    #[serde(rename = "1d")]
    OneDay,
}

impl TimeFrame {
    pub const ALL: [TimeFrame; 6] = [
        TimeFrame::OneMinute,
        TimeFrame::FiveMinutes,
        TimeFrame::FifteenMinutes,
        TimeFrame::OneHour,
        TimeFrame::FourHours,
        TimeFrame::OneDay,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TimeFrame::OneMinute => "1m",
            TimeFrame::FiveMinutes => "5m",
            TimeFrame::FifteenMinutes => "15m",
            TimeFrame::OneHour => "1h",
            TimeFrame::FourHours => "4h",
            TimeFrame::OneDay => "1d",
        }
    }

    pub fn seconds(&self) -> i64 {
        match self {
            TimeFrame::OneMinute => 60,
            TimeFrame::FiveMinutes => 5 * 60,
            TimeFrame::FifteenMinutes => 15 * 60,
            TimeFrame::OneHour => 60 * 60,
            TimeFrame::FourHours => 4 * 60 * 60,
            TimeFrame::OneDay => 24 * 60 * 60,
        }
    }
}

impl FromStr for TimeFrame {
    type Err = MarketError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TimeFrame::ALL
            .into_iter()
            .find(|tf| tf.as_str() == s)
            .ok_or_else(|| MarketError::UnknownTimeFrame(s.to_string()))
    }
}

impl fmt::Display for TimeFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceSource {
    Stream,
    CoinGecko,
    Binance,
    Mock,
}

impl PriceSource {
    pub fn is_mock(&self) -> bool {
        matches!(self, PriceSource::Mock)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PriceTick {
    pub price: f64,
    pub source: PriceSource,
    pub at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeframes_parse_and_measure() {
        assert_eq!("15m".parse::<TimeFrame>().unwrap(), TimeFrame::FifteenMinutes);
        assert_eq!(TimeFrame::FourHours.seconds(), 14_400);
        assert_eq!(TimeFrame::OneDay.to_string(), "1d");
        assert!(matches!(
            "2w".parse::<TimeFrame>(),
            Err(MarketError::UnknownTimeFrame(_))
        ));
        assert_eq!(
            serde_json::to_string(&TimeFrame::OneHour).unwrap(),
            "\"1h\""
        );
    }

    #[test]
    fn sources_serialize_lowercase() {
        assert_eq!(
            serde_json::to_string(&PriceSource::CoinGecko).unwrap(),
            "\"coingecko\""
        );
        assert!(PriceSource::Mock.is_mock());
    }
}
