//! Interceptor Chain: ordered `{onRequest, onResponse, onError}` hooks run
//! around every proxied transaction, linear per request.

pub mod analytics;
pub mod endpoint_blocker;
pub mod header_injection;
pub mod metrics_sync;
pub mod sso_auth;

use async_trait::async_trait;

use crate::context::ProxyContext;

#[async_trait]
pub trait Interceptor: Send + Sync {
    /// Runs before the upstream forward. An interceptor that sets
    /// `ctx.blocked` short-circuits both the remaining `onRequest` hooks and
    /// the upstream forward; place hooks that commonly block early in the
    /// chain so later hooks don't spend work on a request already decided.
    async fn on_request(&self, _ctx: &mut ProxyContext) {}

    /// Runs after the upstream forward (or after blocking short-circuited
    /// it) with the response status/sample already populated.
    async fn on_response(&self, _ctx: &mut ProxyContext) {}

    /// Runs when any step in the pipeline raised an error.
    async fn on_error(&self, _ctx: &mut ProxyContext, _error: &str) {}

    fn name(&self) -> &'static str;
}

/// The ordered chain: SSO-Auth, Header-Injection, Endpoint-Blocker,
/// Analytics, Metrics-Sync.
pub struct InterceptorChain {
    interceptors: Vec<Box<dyn Interceptor>>,
}

impl InterceptorChain {
    pub fn new(interceptors: Vec<Box<dyn Interceptor>>) -> Self {
        Self { interceptors }
    }

    pub async fn run_on_request(&self, ctx: &mut ProxyContext) {
        for interceptor in &self.interceptors {
            interceptor.on_request(ctx).await;
            if ctx.blocked {
                tracing::debug!(request_id = %ctx.request_id, interceptor = interceptor.name(), "request blocked, skipping remaining onRequest hooks");
                break;
            }
        }
    }

    pub async fn run_on_response(&self, ctx: &mut ProxyContext) {
        for interceptor in &self.interceptors {
            interceptor.on_response(ctx).await;
        }
    }

    pub async fn run_on_error(&self, ctx: &mut ProxyContext, error: &str) {
        for interceptor in &self.interceptors {
            interceptor.on_error(ctx, error).await;
        }
    }
}
