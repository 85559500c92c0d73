//! Header-Injection interceptor: stamps identifying headers onto every
//! forwarded request so the upstream (and anything inspecting the wire)
//! can attribute traffic to a session without parsing the body.

use async_trait::async_trait;
use axum::http::{HeaderName, HeaderValue};

use cm_domain::config::HeaderInjectionConfig;

use crate::context::ProxyContext;

use super::Interceptor;

pub struct HeaderInjectionInterceptor {
    session_id: String,
    config: HeaderInjectionConfig,
}

impl HeaderInjectionInterceptor {
    pub fn new(session_id: String, config: HeaderInjectionConfig) -> Self {
        Self { session_id, config }
    }

    fn insert(ctx: &mut ProxyContext, name: &'static str, value: &str) {
        if let Ok(value) = HeaderValue::from_str(value) {
            ctx.request_headers.insert(HeaderName::from_static(name), value);
        }
    }
}

#[async_trait]
impl Interceptor for HeaderInjectionInterceptor {
    async fn on_request(&self, ctx: &mut ProxyContext) {
        Self::insert(ctx, "x-codemie-request-id", &ctx.request_id.clone());
        Self::insert(ctx, "x-codemie-session-id", &self.session_id.clone());
        if let Some(integration) = &self.config.integration {
            Self::insert(ctx, "x-codemie-integration", integration);
        }
        if let Some(cli_model) = &self.config.cli_model {
            Self::insert(ctx, "x-codemie-cli-model", cli_model);
        }
        if let Some(cli_timeout) = &self.config.cli_timeout {
            Self::insert(ctx, "x-codemie-cli-timeout", cli_timeout);
        }
        if let Some(client) = &self.config.client {
            Self::insert(ctx, "x-codemie-client", client);
        }
    }

    fn name(&self) -> &'static str {
        "header_injection"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, Method};
    use bytes::Bytes;

    #[tokio::test]
    async fn injects_request_id_and_configured_headers() {
        let interceptor = HeaderInjectionInterceptor::new(
            "session-123".into(),
            HeaderInjectionConfig {
                integration: Some("jetbrains".into()),
                cli_model: Some("gpt-5".into()),
                cli_timeout: None,
                client: Some("codemie-cli".into()),
            },
        );
        let mut ctx = ProxyContext::new(Method::POST, "/v1/messages".into(), "https://upstream/v1/messages".into(), HeaderMap::new(), Bytes::new());
        interceptor.on_request(&mut ctx).await;

        assert!(ctx.request_headers.contains_key("x-codemie-request-id"));
        assert_eq!(ctx.request_headers.get("x-codemie-session-id").unwrap(), "session-123");
        assert_eq!(ctx.request_headers.get("x-codemie-integration").unwrap(), "jetbrains");
        assert_eq!(ctx.request_headers.get("x-codemie-client").unwrap(), "codemie-cli");
        assert!(!ctx.request_headers.contains_key("x-codemie-cli-timeout"));
    }
}
