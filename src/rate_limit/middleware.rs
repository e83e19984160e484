use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    http::header::{HeaderName, HeaderValue},
    Error,
};
use futures::future::{ready, LocalBoxFuture, Ready};
use std::sync::Arc;

use super::{Admission, Throttle};
use crate::error::AuthError;

/// App-wide throttling, keyed by the peer IP address.
///
/// Runs before authentication so rejected callers never cost a token check or a
/// user lookup. Throttled requests get `429` with `Retry-After`; admitted ones carry
/// `X-RateLimit-Limit`, `X-RateLimit-Remaining` and `X-RateLimit-Reset` (Unix seconds
/// at which the window rolls over).
pub struct RateLimit {
    throttle: Arc<dyn Throttle>,
}

impl RateLimit {
    pub fn new(throttle: Arc<dyn Throttle>) -> Self {
        Self { throttle }
    }
}

impl<S, B> Transform<S, ServiceRequest> for RateLimit
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Transform = RateLimitService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RateLimitService {
            service,
            throttle: Arc::clone(&self.throttle),
        }))
    }
}

pub struct RateLimitService<S> {
    service: S,
    throttle: Arc<dyn Throttle>,
}

/// The key a request is counted against.
fn caller_key(req: &ServiceRequest) -> String {
    req.peer_addr()
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

impl<S, B> Service<ServiceRequest> for RateLimitService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        // Health checks are never throttled.
        if req.path() == "/health" {
            return Box::pin(self.service.call(req));
        }

        match self.throttle.check_and_admit(&caller_key(&req)) {
            Admission::Throttled { retry_after } => {
                Box::pin(async move { Err(AuthError::Throttled { retry_after }.into()) })
            }
            Admission::Admitted {
                limit,
                remaining,
                reset_at,
                ..
            } => {
                let fut = self.service.call(req);
                Box::pin(async move {
                    let mut res = fut.await?;
                    let headers = res.headers_mut();
                    headers.insert(
                        HeaderName::from_static("x-ratelimit-limit"),
                        HeaderValue::from(limit),
                    );
                    headers.insert(
                        HeaderName::from_static("x-ratelimit-remaining"),
                        HeaderValue::from(remaining),
                    );
                    headers.insert(
                        HeaderName::from_static("x-ratelimit-reset"),
                        HeaderValue::from(reset_at),
                    );
                    Ok(res)
                })
            }
        }
    }
}
