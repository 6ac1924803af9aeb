use chrono::{DateTime, Utc};
use rand::Rng;

use crate::{Candle, TimeFrame};

pub const MOCK_PRICE_LOW: f64 = 120.0;
pub const MOCK_PRICE_HIGH: f64 = 125.0;

pub fn mock_price<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    rng.gen_range(MOCK_PRICE_LOW..MOCK_PRICE_HIGH)
}

/// Random walk of `limit` consecutive candles ending at the bucket that
/// contains `now`.
pub fn mock_candles<R: Rng + ?Sized>(
    rng: &mut R,
    timeframe: TimeFrame,
    limit: usize,
    now: DateTime<Utc>,
) -> Vec<Candle> {
    let step = timeframe.seconds();
    let last_open = now.timestamp() - now.timestamp().rem_euclid(step);
    let first_open = last_open - step * (limit as i64).saturating_sub(1);

    let mut price = mock_price(rng);
    (0..limit as i64)
        .map(|i| {
            let open = price;
            let close = (open * (1.0 + rng.gen_range(-0.004..0.004))).max(1.0);
            let high = open.max(close) * (1.0 + rng.gen_range(0.0..0.002));
            let low = open.min(close) * (1.0 - rng.gen_range(0.0..0.002));
            price = close;
            Candle {
                time: first_open + i * step,
                open,
                high,
                low,
                close,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn mock_price_stays_in_band() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..100 {
            let price = mock_price(&mut rng);
            assert!((MOCK_PRICE_LOW..MOCK_PRICE_HIGH).contains(&price));
        }
    }

    #[test]
    fn mock_candles_are_consecutive_and_consistent() {
        let mut rng = StdRng::seed_from_u64(11);
        let now = Utc.with_ymd_and_hms(2025, 2, 3, 10, 7, 31).unwrap();
        let candles = mock_candles(&mut rng, TimeFrame::FiveMinutes, 30, now);

        assert_eq!(candles.len(), 30);
        let last = candles.last().unwrap();
        assert_eq!(last.time, Utc.with_ymd_and_hms(2025, 2, 3, 10, 5, 0).unwrap().timestamp());
        for pair in candles.windows(2) {
            assert_eq!(pair[1].time - pair[0].time, 300);
            assert_eq!(pair[1].open, pair[0].close);
        }
        for candle in &candles {
            assert!(candle.high >= candle.open.max(candle.close));
            assert!(candle.low <= candle.open.min(candle.close));
        }
    }

    #[test]
    fn zero_limit_is_empty() {
        let mut rng = StdRng::seed_from_u64(1);
        assert!(mock_candles(&mut rng, TimeFrame::OneMinute, 0, Utc::now()).is_empty());
    }
}
