//! Per-request context threaded through the interceptor chain.

use std::time::Instant;

use axum::http::{HeaderMap, Method};
use bytes::Bytes;
use serde_json::Value;

/// A canned response an interceptor can substitute for the real upstream
/// call (used by the endpoint blocker).
#[derive(Debug, Clone)]
pub struct CannedResponse {
    pub status: u16,
    pub body: Value,
}

/// Mutable state shared by every hook in the chain for one request.
///
/// Built once per request by the Proxy Server before `onRequest` runs, and
/// carried through `onResponse`/`onError`. `blocked` short-circuits the
/// upstream forward but `onResponse` still runs against the canned
/// response so Analytics and Metrics-Sync see every request uniformly.
pub struct ProxyContext {
    pub request_id: String,
    pub method: Method,
    pub original_path: String,
    pub target_url: String,
    pub request_headers: HeaderMap,
    pub request_body: Bytes,
    pub request_start: Instant,

    pub blocked: bool,
    pub canned_response: Option<CannedResponse>,

    pub response_status: Option<u16>,
    pub response_headers: HeaderMap,
    /// Up to the configured analytics cap of the response body, for
    /// Analytics/Metrics-Sync inspection. The full body is never buffered
    /// here — forwarding streams past this window once it fills.
    pub response_sample: Vec<u8>,
    pub response_truncated: bool,

    pub error: Option<String>,
}

impl ProxyContext {
    pub fn new(method: Method, original_path: String, target_url: String, request_headers: HeaderMap, request_body: Bytes) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            method,
            original_path,
            target_url,
            request_headers,
            request_body,
            request_start: Instant::now(),
            blocked: false,
            canned_response: None,
            response_status: None,
            response_headers: HeaderMap::new(),
            response_sample: Vec::new(),
            response_truncated: false,
            error: None,
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.request_start.elapsed().as_millis() as u64
    }

    pub fn block_with(&mut self, status: u16, body: Value) {
        self.blocked = true;
        self.canned_response = Some(CannedResponse { status, body });
    }

    /// Append to the analytics sample up to `cap_bytes`, marking truncation
    /// once the cap is reached. Safe to call repeatedly as chunks stream in.
    pub fn push_response_sample(&mut self, chunk: &[u8], cap_bytes: usize) {
        if self.response_sample.len() >= cap_bytes {
            self.response_truncated = true;
            return;
        }
        let remaining = cap_bytes - self.response_sample.len();
        if chunk.len() > remaining {
            self.response_sample.extend_from_slice(&chunk[..remaining]);
            self.response_truncated = true;
        } else {
            self.response_sample.extend_from_slice(chunk);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocking_sets_canned_response() {
        let mut ctx = ProxyContext::new(Method::POST, "/api/event_logging/batch".into(), "https://upstream/api".into(), HeaderMap::new(), Bytes::new());
        ctx.block_with(200, serde_json::json!({"success": true}));
        assert!(ctx.blocked);
        assert_eq!(ctx.canned_response.unwrap().status, 200);
    }

    #[test]
    fn response_sample_truncates_at_cap() {
        let mut ctx = ProxyContext::new(Method::GET, "/".into(), "https://upstream/".into(), HeaderMap::new(), Bytes::new());
        ctx.push_response_sample(&[0u8; 10], 5);
        assert_eq!(ctx.response_sample.len(), 5);
        assert!(ctx.response_truncated);

        ctx.push_response_sample(&[1u8; 10], 5);
        assert_eq!(ctx.response_sample.len(), 5);
    }
}
