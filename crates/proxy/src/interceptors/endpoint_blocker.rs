//! Endpoint-Blocker interceptor: short-circuits configured paths with a
//! canned `200 {"success": true}` response instead of forwarding upstream.
//! Matching is case-insensitive substring match against each configured
//! pattern, mirroring how `blocked_path_patterns` is documented (plain
//! path fragments, not full regexes).
//!
//! Must run before Analytics/Metrics-Sync so blocked requests are not
//! counted as forwarded traffic, but after SSO-Auth/Header-Injection since
//! those mutate the request the chain still logically "received".

use async_trait::async_trait;
use serde_json::json;

use crate::context::ProxyContext;

use super::Interceptor;

pub struct EndpointBlockerInterceptor {
    patterns: Vec<String>,
}

impl EndpointBlockerInterceptor {
    pub fn new(patterns: Vec<String>) -> Self {
        Self {
            patterns: patterns.into_iter().map(|p| p.to_lowercase()).collect(),
        }
    }

    fn matches(&self, path: &str) -> bool {
        let path = path.to_lowercase();
        self.patterns.iter().any(|pattern| path.contains(pattern.as_str()))
    }
}

#[async_trait]
impl Interceptor for EndpointBlockerInterceptor {
    async fn on_request(&self, ctx: &mut ProxyContext) {
        if self.matches(&ctx.original_path) {
            ctx.block_with(200, json!({"success": true}));
            cm_domain::trace::TraceEvent::ProxyRequestBlocked {
                request_id: ctx.request_id.clone(),
                path: ctx.original_path.clone(),
            }
            .emit();
        }
    }

    fn name(&self) -> &'static str {
        "endpoint_blocker"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, Method};
    use bytes::Bytes;

    #[tokio::test]
    async fn blocks_configured_path_case_insensitively() {
        let interceptor = EndpointBlockerInterceptor::new(vec!["/api/event_logging/batch".into()]);
        let mut ctx = ProxyContext::new(Method::POST, "/API/Event_Logging/Batch".into(), "https://upstream/API/Event_Logging/Batch".into(), HeaderMap::new(), Bytes::new());
        interceptor.on_request(&mut ctx).await;

        assert!(ctx.blocked);
        assert_eq!(ctx.canned_response.unwrap().status, 200);
    }

    #[tokio::test]
    async fn leaves_unmatched_paths_unblocked() {
        let interceptor = EndpointBlockerInterceptor::new(vec!["/api/event_logging/batch".into()]);
        let mut ctx = ProxyContext::new(Method::POST, "/v1/messages".into(), "https://upstream/v1/messages".into(), HeaderMap::new(), Bytes::new());
        interceptor.on_request(&mut ctx).await;

        assert!(!ctx.blocked);
    }
}
