use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use thiserror::Error;

pub const MAX_BOOST: u32 = 500;
pub const MAX_TAPS_PER_BATCH: u32 = 500;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClickError {
    #[error("taps must be between 1 and {max}, got {got}")]
    InvalidTapCount { got: u32, max: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TapOutcome {
    pub points: i64,
    pub boost_used: u32,
}

/// Boost reserve. Every tap is worth one point, plus one more while boost
/// is left; the reserve refills once a day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoostMeter {
    pub boost: u32,
    pub last_refresh: Option<DateTime<Utc>>,
}

impl Default for BoostMeter {
    fn default() -> Self {
        Self {
            boost: MAX_BOOST,
            last_refresh: None,
        }
    }
}

impl BoostMeter {
    pub fn refill_interval() -> Duration {
        Duration::hours(24)
    }

    pub fn new(boost: u32, last_refresh: Option<DateTime<Utc>>) -> Self {
        Self {
            boost: boost.min(MAX_BOOST),
            last_refresh,
        }
    }

    pub fn refresh(&mut self, now: DateTime<Utc>) -> bool {
        let due = match self.last_refresh {
            None => true,
            Some(last) => now - last >= Self::refill_interval(),
        };
        if due {
            self.boost = MAX_BOOST;
            self.last_refresh = Some(now);
        }
        due
    }

    pub fn tap(&mut self, taps: u32, now: DateTime<Utc>) -> Result<TapOutcome, ClickError> {
        if taps == 0 || taps > MAX_TAPS_PER_BATCH {
            return Err(ClickError::InvalidTapCount {
                got: taps,
                max: MAX_TAPS_PER_BATCH,
            });
        }
        self.refresh(now);

        let boost_used = taps.min(self.boost);
        self.boost -= boost_used;
        Ok(TapOutcome {
            points: i64::from(taps) + i64::from(boost_used),
            boost_used,
        })
    }
}
