//! The Local Reverse Proxy: a loopback HTTP server every SSO-authenticated
//! assistant process is pointed at instead of the real upstream. Requests
//! pass through an ordered interceptor chain (SSO-Auth, Header-Injection,
//! Endpoint-Blocker, Analytics, Metrics-Sync) before being forwarded.

pub mod context;
pub mod interceptors;
pub mod server;
pub mod sso_cache;
pub mod stream_forward;

pub use context::ProxyContext;
pub use interceptors::{Interceptor, InterceptorChain};
pub use server::ProxyServer;
pub use sso_cache::{SsoCredential, SsoCredentialCache};
