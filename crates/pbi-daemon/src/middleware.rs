// SPDX-License-Identifier: MIT OR Apache-2.0
//! Middleware stack for the PBI daemon's HTTP API.

use axum::{
    body::Body,
    extract::Request,
    http::HeaderValue,
    middleware::Next,
    response::{IntoResponse, Response},
};
use pbi_error::{ErrorCode, PbiError};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tracing::info;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// RequestContext middleware
// ---------------------------------------------------------------------------

/// Per-request metadata threaded through the middleware stack as an Axum
/// extension. `tenant_id` starts unset and is filled in by handlers once
/// `authenticate` resolves an `Authorization` header, so the request-entry
/// middleware (which runs before routing) can't know it up front.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Unique per-request identifier, echoed back as `x-request-id`.
    pub request_id: Uuid,
    /// The authenticated tenant, once `authenticate` has resolved one.
    tenant_id: Arc<Mutex<Option<Uuid>>>,
    /// When the request entered the middleware stack.
    started_at: Instant,
}

impl RequestContext {
    fn new() -> Self {
        Self {
            request_id: Uuid::new_v4(),
            tenant_id: Arc::new(Mutex::new(None)),
            started_at: Instant::now(),
        }
    }

    /// Record the tenant an `Authorization` header resolved to.
    pub fn set_tenant(&self, tenant_id: Uuid) {
        *self.tenant_id.lock().unwrap() = Some(tenant_id);
    }

    /// The authenticated tenant, if `set_tenant` has run for this request.
    pub fn tenant_id(&self) -> Option<Uuid> {
        *self.tenant_id.lock().unwrap()
    }

    /// Time elapsed since the request entered the middleware stack.
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}

/// Axum middleware that attaches a [`RequestContext`] to each request and
/// sets the `x-request-id` response header from it.
pub async fn request_id_middleware(mut req: Request, next: Next) -> Response {
    let ctx = RequestContext::new();
    let request_id = ctx.request_id;
    req.extensions_mut().insert(ctx);
    let mut resp = next.run(req).await;
    resp.headers_mut().insert(
        "x-request-id",
        HeaderValue::from_str(&request_id.to_string()).unwrap(),
    );
    resp
}

// ---------------------------------------------------------------------------
// RequestLogger
// ---------------------------------------------------------------------------

/// Axum middleware that logs method, path, status code, tenant (once known),
/// and duration for each request using [`tracing`] structured fields.
pub struct RequestLogger;

impl RequestLogger {
    /// Axum-compatible handler function.
    pub async fn layer(req: Request, next: Next) -> Response {
        let method = req.method().clone();
        let path = req.uri().path().to_owned();
        let ctx = req.extensions().get::<RequestContext>().cloned();

        let resp = next.run(req).await;

        let status = resp.status().as_u16();
        match &ctx {
            Some(ctx) => info!(
                http.method = %method,
                http.path = %path,
                http.status = status,
                http.duration_ms = ctx.elapsed().as_millis() as u64,
                request_id = %ctx.request_id,
                tenant_id = ?ctx.tenant_id(),
                "request completed"
            ),
            None => info!(
                http.method = %method,
                http.path = %path,
                http.status = status,
                "request completed"
            ),
        }

        resp
    }
}

// ---------------------------------------------------------------------------
// RateLimiter
// ---------------------------------------------------------------------------

/// Tower [`Layer`](tower::Layer) wrapping [`pbi_ratelimit::RateLimiter`],
/// keyed per `Authorization` header value (falling back to `"anon"` for
/// unauthenticated requests, so one noisy caller can't starve another).
#[derive(Clone)]
pub struct RateLimiterLayer(Arc<pbi_ratelimit::RateLimiter>);

impl RateLimiterLayer {
    /// Wrap an existing, shared limiter.
    pub fn new(limiter: Arc<pbi_ratelimit::RateLimiter>) -> Self {
        Self(limiter)
    }
}

impl<S: Clone> tower::Layer<S> for RateLimiterLayer {
    type Service = RateLimiterService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimiterService {
            limiter: self.0.clone(),
            inner,
        }
    }
}

/// Tower [`Service`] that enforces rate limiting before forwarding to the
/// inner service.
#[derive(Clone)]
pub struct RateLimiterService<S> {
    limiter: Arc<pbi_ratelimit::RateLimiter>,
    inner: S,
}

fn rate_limit_key(req: &Request<Body>) -> String {
    req.headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| "anon".to_string())
}

impl<S> tower::Service<Request<Body>> for RateLimiterService<S>
where
    S: tower::Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send,
    S::Error: IntoResponse,
{
    type Response = Response;
    type Error = S::Error;
    type Future =
        std::pin::Pin<Box<dyn std::future::Future<Output = Result<Response, S::Error>> + Send>>;

    fn poll_ready(
        &mut self,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let limiter = self.limiter.clone();
        let mut inner = self.inner.clone();
        let key = rate_limit_key(&req);
        Box::pin(async move {
            if limiter.check(&key).is_err() {
                let err = PbiError::new(ErrorCode::RateLimited, "rate limit exceeded");
                return Ok(crate::api::ApiError::from(err).into_response());
            }
            inner.call(req).await
        })
    }
}

// ---------------------------------------------------------------------------
// CorsConfig
// ---------------------------------------------------------------------------

/// Configuration for CORS headers.
#[derive(Debug, Clone)]
pub struct CorsConfig {
    /// Origins echoed back in `Access-Control-Allow-Origin`.
    pub allowed_origins: Vec<String>,
    /// Methods echoed back in `Access-Control-Allow-Methods`.
    pub allowed_methods: Vec<String>,
    /// Headers echoed back in `Access-Control-Allow-Headers`.
    pub allowed_headers: Vec<String>,
}

impl CorsConfig {
    /// Convert this configuration into a [`tower_http::cors::CorsLayer`].
    pub fn to_cors_layer(&self) -> CorsLayer {
        let origins: Vec<HeaderValue> = self
            .allowed_origins
            .iter()
            .filter_map(|o| HeaderValue::from_str(o).ok())
            .collect();

        let methods: Vec<axum::http::Method> = self
            .allowed_methods
            .iter()
            .filter_map(|m| m.parse().ok())
            .collect();

        let headers: Vec<axum::http::HeaderName> = self
            .allowed_headers
            .iter()
            .filter_map(|h| h.parse().ok())
            .collect();

        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods(AllowMethods::list(methods))
            .allow_headers(AllowHeaders::list(headers))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_context_tenant_is_unset_until_authenticated() {
        let ctx = RequestContext::new();
        assert_eq!(ctx.tenant_id(), None);

        let tenant_id = Uuid::new_v4();
        ctx.set_tenant(tenant_id);
        assert_eq!(ctx.tenant_id(), Some(tenant_id));
    }

    #[test]
    fn request_context_clone_shares_the_same_tenant_cell() {
        let ctx = RequestContext::new();
        let cloned = ctx.clone();

        let tenant_id = Uuid::new_v4();
        ctx.set_tenant(tenant_id);

        assert_eq!(cloned.tenant_id(), Some(tenant_id));
    }

    #[test]
    fn request_context_elapsed_is_nonzero_after_a_wait() {
        let ctx = RequestContext::new();
        std::thread::sleep(Duration::from_millis(5));
        assert!(ctx.elapsed() >= Duration::from_millis(5));
    }
}
