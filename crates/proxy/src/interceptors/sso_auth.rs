//! SSO-Auth interceptor: runs first in the chain. Injects the cached
//! `Cookie` header for the upstream's base URL, if one is present and
//! unexpired. Never blocks — a missing credential just means the request
//! goes upstream without a cookie and the assistant sees whatever auth
//! error the upstream returns.

use async_trait::async_trait;
use axum::http::{HeaderName, HeaderValue};
use std::sync::Arc;

use crate::context::ProxyContext;
use crate::sso_cache::SsoCredentialCache;

use super::Interceptor;

pub struct SsoAuthInterceptor {
    cache: Arc<SsoCredentialCache>,
    base_url: String,
}

impl SsoAuthInterceptor {
    pub fn new(cache: Arc<SsoCredentialCache>, base_url: String) -> Self {
        Self { cache, base_url }
    }
}

#[async_trait]
impl Interceptor for SsoAuthInterceptor {
    async fn on_request(&self, ctx: &mut ProxyContext) {
        let credential = match self.cache.load(&self.base_url) {
            Ok(Some(credential)) => credential,
            Ok(None) => return,
            Err(e) => {
                tracing::warn!(error = %e, "sso credential cache read failed");
                return;
            }
        };

        match HeaderValue::from_str(&credential.cookie) {
            Ok(value) => {
                ctx.request_headers.insert(HeaderName::from_static("cookie"), value);
            }
            Err(e) => {
                tracing::warn!(error = %e, "cached sso cookie is not a valid header value");
            }
        }
    }

    fn name(&self) -> &'static str {
        "sso_auth"
    }
}
