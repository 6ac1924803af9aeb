use actix_web::{
    body::EitherBody,
    dev::{Service, ServiceRequest, ServiceResponse, Transform},
    Error, ResponseError,
};
use futures_util::future::{ok, LocalBoxFuture, Ready};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    task::{Context, Poll},
    time::{Duration, Instant},
};
use tracing::warn;

use crate::error::ApiError;

const WINDOW: Duration = Duration::from_secs(60);
const EXEMPT_PATHS: [&str; 2] = ["/health", "/metrics"];

type Tracking = Arc<Mutex<HashMap<String, (usize, Instant)>>>;

/// Fixed one-minute window per client IP. Clones share the same counters, so
/// one limiter can be handed to every worker.
#[derive(Clone)]
pub struct RateLimiter {
    requests_per_minute: usize,
    ip_tracking: Tracking,
}

impl RateLimiter {
    pub fn new(requests_per_minute: usize) -> Self {
        RateLimiter {
            requests_per_minute,
            ip_tracking: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Counts one request from `ip` at `now`; `false` once the window is full.
    fn admit(&self, ip: &str, now: Instant) -> bool {
        let mut ip_map = self
            .ip_tracking
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        // keep the map from growing without bound
        if ip_map.len() > 10_000 {
            ip_map.retain(|_, (_, started)| now.duration_since(*started) <= WINDOW);
        }

        match ip_map.get_mut(ip) {
            Some((count, started)) if now.duration_since(*started) <= WINDOW => {
                if *count >= self.requests_per_minute {
                    return false;
                }
                *count += 1;
            }
            _ => {
                ip_map.insert(ip.to_string(), (1, now));
            }
        }
        true
    }
}

impl<S, B> Transform<S, ServiceRequest> for RateLimiter
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Transform = RateLimiterMiddleware<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(RateLimiterMiddleware {
            service,
            limiter: self.clone(),
        })
    }
}

pub struct RateLimiterMiddleware<S> {
    service: S,
    limiter: RateLimiter,
}

impl<S, B> Service<ServiceRequest> for RateLimiterMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.service.poll_ready(cx)
    }

    fn call(&self, req: ServiceRequest) -> Self::Future {
        if !EXEMPT_PATHS.contains(&req.path()) {
            let ip = req
                .connection_info()
                .realip_remote_addr()
                .unwrap_or("unknown")
                .to_string();

            if !self.limiter.admit(&ip, Instant::now()) {
                warn!("Rate limit exceeded for {}", ip);
                let response = req
                    .into_response(ApiError::TooManyRequests.error_response())
                    .map_into_right_body();
                return Box::pin(async move { Ok(response) });
            }
        }

        let fut = self.service.call(req);
        Box::pin(async move {
            let res = fut.await?;
            Ok(res.map_into_left_body())
        })
    }
}
