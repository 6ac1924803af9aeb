use actix_web::{get, web, HttpResponse};
use common::models::UserRank;
use game::leaderboard::{self as ranking, Contender};
use serde::Deserialize;
use serde_json::json;

use crate::{error::ApiResult, state::AppState};

#[derive(Debug, Deserialize)]
pub struct LeaderboardQuery {
    #[serde(rename = "userId")]
    user_id: Option<String>,
    limit: Option<i64>,
}

#[get("/leaderboard")]
pub async fn leaderboard(
    query: web::Query<LeaderboardQuery>,
    state: web::Data<AppState>,
) -> ApiResult<HttpResponse> {
    let limit = ranking::clamp_limit(query.limit);
    let top = state.store.top_users(limit).await?;
    let entries = ranking::rank_entries(top.iter().map(|user| Contender {
        id: &user.id,
        username: user.username.as_deref(),
        first_name: user.first_name.as_deref(),
        last_name: user.last_name.as_deref(),
        total_score: user.total_score,
    }));

    let user_id = query.user_id.as_deref().filter(|id| !id.trim().is_empty());
    // an unknown caller still gets the board, just without a rank
    let caller = match user_id {
        Some(id) => state.store.get_user(id).await?,
        None => None,
    };
    let user_rank = match caller {
        Some(user) => {
            let higher = state.store.count_users_above(user.total_score).await?;
            let total_users = state.store.count_ranked_users().await?;
            Some(UserRank {
                username: user.display_name(),
                rank: ranking::rank_from_higher(higher),
                id: user.id,
                first_name: user.first_name,
                last_name: user.last_name,
                total_score: user.total_score,
                total_users,
            })
        }
        None => None,
    };

    Ok(HttpResponse::Ok().json(json!({
        "leaderboard": entries,
        "userRank": user_rank,
    })))
}
