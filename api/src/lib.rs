//! HTTP surface of the mini app: user, betting, task, leaderboard, price and
//! Telegram endpoints over a pluggable store.

use std::time::Instant;

use actix_web::{
    body::MessageBody,
    dev::{Service, ServiceFactory, ServiceRequest, ServiceResponse},
    middleware::Logger,
    web, App,
};

pub mod config;
pub mod error;
pub mod metrics;
pub mod routes;
pub mod security;
pub mod state;

use security::{configure_cors, RateLimiter};
use state::AppState;

/// The full application: routes plus logging, CORS, rate limiting and
/// request metrics. Shared by the server and the integration tests.
pub fn app(
    state: web::Data<AppState>,
    limiter: RateLimiter,
) -> App<
    impl ServiceFactory<
        ServiceRequest,
        Config = (),
        Response = ServiceResponse<impl MessageBody>,
        Error = actix_web::Error,
        InitError = (),
    >,
> {
    let cors = configure_cors(&state.config.allowed_origins);

    App::new()
        .app_data(state)
        .configure(routes::configure)
        .wrap(limiter)
        .wrap_fn(|req, srv| {
            let started = Instant::now();
            let method = req.method().to_string();
            let endpoint = req
                .request()
                .match_pattern()
                .unwrap_or_else(|| "unmatched".to_string());
            let fut = srv.call(req);
            async move {
                let res = fut.await?;
                metrics::record_http_request(
                    &endpoint,
                    &method,
                    res.status().as_str(),
                    started.elapsed().as_secs_f64(),
                );
                Ok(res)
            }
        })
        .wrap(cors)
        .wrap(Logger::default())
}
