//! Analytics interceptor: logs request/response size, latency and status
//! for every transaction, blocked or forwarded. Never mutates the request;
//! purely observational.

use async_trait::async_trait;

use crate::context::ProxyContext;

use super::Interceptor;

pub struct AnalyticsInterceptor {
    cap_bytes: usize,
}

impl AnalyticsInterceptor {
    pub fn new(cap_bytes: usize) -> Self {
        Self { cap_bytes }
    }
}

#[async_trait]
impl Interceptor for AnalyticsInterceptor {
    async fn on_response(&self, ctx: &mut ProxyContext) {
        let status = ctx.response_status.unwrap_or(0);
        tracing::info!(
            request_id = %ctx.request_id,
            method = %ctx.method,
            path = %ctx.original_path,
            status,
            duration_ms = ctx.elapsed_ms(),
            request_bytes = ctx.request_body.len(),
            response_sample_bytes = ctx.response_sample.len(),
            response_truncated = ctx.response_truncated,
            analytics_cap_bytes = self.cap_bytes,
            "proxy transaction"
        );

        cm_domain::trace::TraceEvent::ProxyRequestForwarded {
            request_id: ctx.request_id.clone(),
            target_url: ctx.target_url.clone(),
            status,
            duration_ms: ctx.elapsed_ms(),
        }
        .emit();
    }

    fn name(&self) -> &'static str {
        "analytics"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, Method};
    use bytes::Bytes;

    #[tokio::test]
    async fn records_status_and_duration_without_mutating_context() {
        let interceptor = AnalyticsInterceptor::new(1024);
        let mut ctx = ProxyContext::new(Method::GET, "/v1/models".into(), "https://upstream/v1/models".into(), HeaderMap::new(), Bytes::new());
        ctx.response_status = Some(200);
        interceptor.on_response(&mut ctx).await;
        assert_eq!(ctx.response_status, Some(200));
    }
}
