use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use governor::{clock::DefaultClock, state::InMemoryState, state::NotKeyed, Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;
use tracing::warn;

use crate::error::{AppError, AppResult, ErrorResponse};

/// Process-wide request limiter shared by every route
#[derive(Clone)]
pub struct RateLimitLayer {
    limiter: Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
}

impl RateLimitLayer {
    pub fn new(requests_per_second: u32, burst: u32) -> AppResult<Self> {
        let rate = NonZeroU32::new(requests_per_second)
            .ok_or_else(|| AppError::Config("rate limit must be at least 1 request per second".to_string()))?;
        let burst = NonZeroU32::new(burst).unwrap_or(rate);

        Ok(RateLimitLayer {
            limiter: Arc::new(RateLimiter::direct(Quota::per_second(rate).allow_burst(burst))),
        })
    }

    pub fn check(&self) -> Result<(), Response> {
        match self.limiter.check() {
            Ok(_) => Ok(()),
            Err(_) => {
                warn!("Rate limit exceeded");
                let body = Json(ErrorResponse {
                    error: "Rate limit exceeded. Please try again later.".to_string(),
                    error_code: "RATE_LIMITED".to_string(),
                    details: None,
                });
                Err((StatusCode::TOO_MANY_REQUESTS, body).into_response())
            }
        }
    }
}

pub async fn rate_limit_middleware(
    State(limiter): State<Arc<RateLimitLayer>>,
    req: Request,
    next: Next,
) -> Result<impl IntoResponse, Response> {
    limiter.check()?;
    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_burst_then_reject() {
        let layer = RateLimitLayer::new(1, 2).unwrap();
        assert!(layer.check().is_ok());
        assert!(layer.check().is_ok());

        let rejected = layer.check().unwrap_err();
        assert_eq!(rejected.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn test_zero_rate_is_a_config_error() {
        assert!(matches!(RateLimitLayer::new(0, 5), Err(AppError::Config(_))));
    }
}
