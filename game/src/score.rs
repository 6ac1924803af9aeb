use serde::{Deserialize, Serialize};

/// Clicker and betting scores. The total is always derived, never stored
/// independently of its parts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreCard {
    pub clicker: i64,
    pub betting: i64,
}

impl ScoreCard {
    pub fn new(clicker: i64, betting: i64) -> Self {
        Self { clicker, betting }
    }

    pub fn total(&self) -> i64 {
        self.clicker.saturating_add(self.betting)
    }

    pub fn credit_clicker(&mut self, points: i64) {
        self.clicker = self.clicker.saturating_add(points);
    }

    pub fn credit_betting(&mut self, points: i64) {
        self.betting = self.betting.saturating_add(points);
    }

    /// Replaces whichever components are given, keeping the others.
    pub fn overwrite(&mut self, clicker: Option<i64>, betting: Option<i64>) {
        if let Some(clicker) = clicker {
            self.clicker = clicker;
        }
        if let Some(betting) = betting {
            self.betting = betting;
        }
    }

    pub fn rank(&self) -> Rank {
        Rank::for_score(self.total())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rank {
    Unranked,
    Bronze,
    Silver,
    Gold,
    Platinum,
    Diamond,
}

const LADDER: [(i64, Rank); 5] = [
    (5000, Rank::Diamond),
    (4000, Rank::Platinum),
    (3000, Rank::Gold),
    (2000, Rank::Silver),
    (1000, Rank::Bronze),
];

impl Rank {
    pub fn for_score(total: i64) -> Rank {
        LADDER
            .iter()
            .find(|(threshold, _)| total >= *threshold)
            .map(|(_, rank)| *rank)
            .unwrap_or(Rank::Unranked)
    }

    /// Score needed for the next band, `None` at the top.
    pub fn next_threshold(&self) -> Option<i64> {
        LADDER
            .iter()
            .rev()
            .find(|(_, rank)| rank > self)
            .map(|(threshold, _)| *threshold)
    }
}
