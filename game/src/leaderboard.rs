use serde::{Deserialize, Serialize};

pub const DEFAULT_LIMIT: i64 = 20;
pub const MAX_LIMIT: i64 = 100;

pub fn clamp_limit(requested: Option<i64>) -> i64 {
    requested.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
}

/// Username when present, otherwise "first last" with blanks dropped.
pub fn display_name(username: Option<&str>, first_name: Option<&str>, last_name: Option<&str>) -> String {
    match username.map(str::trim).filter(|name| !name.is_empty()) {
        Some(name) => name.to_string(),
        None => format!("{} {}", first_name.unwrap_or(""), last_name.unwrap_or(""))
            .trim()
            .to_string(),
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Contender<'a> {
    pub id: &'a str,
    pub username: Option<&'a str>,
    pub first_name: Option<&'a str>,
    pub last_name: Option<&'a str>,
    pub total_score: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub id: String,
    pub username: String,
    pub total_score: i64,
    pub rank: i64,
}

/// Ranks by position after a stable sort on score, so equal scores keep
/// the order they came in with.
pub fn rank_entries<'a>(contenders: impl IntoIterator<Item = Contender<'a>>) -> Vec<LeaderboardEntry> {
    let mut contenders: Vec<Contender<'a>> = contenders.into_iter().collect();
    contenders.sort_by(|a, b| b.total_score.cmp(&a.total_score));

    contenders
        .into_iter()
        .enumerate()
        .map(|(idx, c)| LeaderboardEntry {
            id: c.id.to_string(),
            username: display_name(c.username, c.first_name, c.last_name),
            total_score: c.total_score,
            rank: idx as i64 + 1,
        })
        .collect()
}

/// Rank of a user given how many users score strictly higher.
pub fn rank_from_higher(higher: i64) -> i64 {
    higher.max(0) + 1
}
