use actix_web::{get, post, web, HttpResponse};
use market::{binance::MAX_KLINES, TimeFrame};
use serde::Deserialize;
use serde_json::json;

use crate::{
    error::{ApiError, ApiResult},
    metrics,
    state::AppState,
};

const DEFAULT_CANDLES: usize = 100;

#[derive(Debug, Deserialize)]
pub struct CandlesQuery {
    interval: Option<String>,
    limit: Option<usize>,
}

#[get("/sol-price")]
pub async fn candles(
    query: web::Query<CandlesQuery>,
    state: web::Data<AppState>,
) -> ApiResult<HttpResponse> {
    let timeframe = match query.interval.as_deref() {
        Some(raw) => raw
            .parse::<TimeFrame>()
            .map_err(|e| ApiError::bad_request(e.to_string()))?,
        None => TimeFrame::default(),
    };
    let limit = query.limit.unwrap_or(DEFAULT_CANDLES).clamp(1, MAX_KLINES);

    let series = state.feed.candles(timeframe, limit).await;
    if series.mock {
        metrics::record_price_fallback("candles");
    }
    let price = series.candles.last().map(|candle| candle.close);

    Ok(HttpResponse::Ok().json(json!({
        "candles": series.candles,
        "price": price,
        "mock": series.mock,
    })))
}

#[post("/sol-price")]
pub async fn current_price(state: web::Data<AppState>) -> HttpResponse {
    let tick = state.feed.current_price().await;

    if tick.source.is_mock() {
        metrics::record_price_fallback("price");
        return HttpResponse::Ok().json(json!({
            "price": tick.price,
            "source": tick.source,
            "error": "Using mock price due to API error",
        }));
    }
    HttpResponse::Ok().json(json!({
        "price": tick.price,
        "source": tick.source,
    }))
}
