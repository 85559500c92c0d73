//! The Local Reverse Proxy server. Binds an ephemeral loopback port,
//! forwards every request to the configured upstream through the
//! interceptor chain, and streams the response back while sampling it for
//! analytics.
//!
//! Deliberately carries no CORS layer — every caller is the locally spawned
//! assistant process talking to `127.0.0.1`, never a browser origin.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{HeaderMap, HeaderName, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::any;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::Notify;

use cm_domain::error::Result;
use cm_domain::trace::TraceEvent;

use crate::context::ProxyContext;
use crate::interceptors::InterceptorChain;
use crate::stream_forward;

const HOP_BY_HOP: &[&str] = &["connection", "keep-alive", "proxy-authenticate", "proxy-authorization", "te", "trailers", "transfer-encoding", "upgrade", "host"];

fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP.iter().any(|h| name.as_str().eq_ignore_ascii_case(h))
}

struct ServerState {
    chain: Arc<InterceptorChain>,
    client: reqwest::Client,
    upstream_base: String,
    analytics_cap_bytes: usize,
    upstream_timeout: Duration,
}

pub struct ProxyServer {
    state: Arc<ServerState>,
    shutdown: Arc<Notify>,
    local_addr: std::sync::Mutex<Option<SocketAddr>>,
}

impl ProxyServer {
    pub fn new(chain: InterceptorChain, client: reqwest::Client, upstream_base: String, analytics_cap_bytes: usize, upstream_timeout_secs: u64) -> Self {
        Self {
            state: Arc::new(ServerState {
                chain: Arc::new(chain),
                client,
                upstream_base,
                analytics_cap_bytes,
                upstream_timeout: Duration::from_secs(upstream_timeout_secs),
            }),
            shutdown: Arc::new(Notify::new()),
            local_addr: std::sync::Mutex::new(None),
        }
    }

    /// Bind an ephemeral port on `bind_host` and start serving in the
    /// background. Returns the URL the child assistant process should be
    /// pointed at.
    pub async fn start(self: &Arc<Self>, bind_host: &str) -> Result<String> {
        let listener = TcpListener::bind((bind_host, 0)).await?;
        let addr = listener.local_addr()?;
        *self.local_addr.lock().expect("local_addr mutex poisoned") = Some(addr);

        let state = self.state.clone();
        let shutdown = self.shutdown.clone();
        let app = Router::new().fallback(any(handle)).with_state(state);

        tokio::spawn(async move {
            let serve = axum::serve(listener, app.into_make_service());
            if let Err(e) = serve.with_graceful_shutdown(async move { shutdown.notified().await }).await {
                tracing::error!(error = %e, "proxy server exited with error");
            }
        });

        let url = format!("http://{addr}");
        TraceEvent::ProxyStarted { url: url.clone() }.emit();
        Ok(url)
    }

    /// Signal graceful shutdown. Returns once every in-flight request has
    /// finished; the Lifecycle Controller calls this during the grace
    /// period drain before tearing the rest of the session down.
    pub fn stop(&self) {
        self.shutdown.notify_waiters();
        TraceEvent::ProxyStopped.emit();
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().expect("local_addr mutex poisoned")
    }
}

async fn handle(State(state): State<Arc<ServerState>>, method: Method, uri: Uri, headers: HeaderMap, body: Bytes) -> Response {
    let original_path = uri.path_and_query().map(|p| p.as_str().to_string()).unwrap_or_else(|| uri.path().to_string());
    let target_url = format!("{}{}", state.upstream_base.trim_end_matches('/'), original_path);

    let mut request_headers = headers;
    request_headers.retain(|name, _| !is_hop_by_hop(name));

    let mut ctx = ProxyContext::new(method, original_path, target_url, request_headers, body);

    state.chain.run_on_request(&mut ctx).await;

    if ctx.blocked {
        let canned = ctx.canned_response.clone().expect("blocked proxy context always carries a canned response");
        ctx.response_status = Some(canned.status);
        state.chain.run_on_response(&mut ctx).await;
        let status = StatusCode::from_u16(canned.status).unwrap_or(StatusCode::OK);
        return (status, Json(canned.body)).into_response();
    }

    let mut outgoing = state.client.request(ctx.method.clone(), &ctx.target_url).headers(ctx.request_headers.clone());
    if !ctx.request_body.is_empty() {
        outgoing = outgoing.body(ctx.request_body.clone());
    }

    let upstream = match tokio::time::timeout(state.upstream_timeout, outgoing.send()).await {
        Ok(Ok(response)) => response,
        Ok(Err(e)) => {
            let message = e.to_string();
            state.chain.run_on_error(&mut ctx, &message).await;
            return (StatusCode::BAD_GATEWAY, message).into_response();
        }
        Err(_) => {
            state.chain.run_on_error(&mut ctx, "upstream request timed out").await;
            return (StatusCode::GATEWAY_TIMEOUT, "upstream request timed out").into_response();
        }
    };

    let status = StatusCode::from_u16(upstream.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
    let response_headers = upstream.headers().clone();
    ctx.response_status = Some(status.as_u16());
    ctx.response_headers = response_headers.clone();

    let (stream, sample_rx) = stream_forward::sample_while_forwarding(upstream, state.analytics_cap_bytes);

    let chain = state.chain.clone();
    tokio::spawn(async move {
        if let Ok(sample) = sample_rx.await {
            ctx.response_sample = sample.data;
            ctx.response_truncated = sample.truncated;
        }
        chain.run_on_response(&mut ctx).await;
    });

    let mut builder = Response::builder().status(status);
    for (name, value) in response_headers.iter() {
        if !is_hop_by_hop(name) {
            builder = builder.header(name, value);
        }
    }
    builder.body(Body::from_stream(stream)).unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}
