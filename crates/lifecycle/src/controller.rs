//! `LifecycleController::run`: the nine-step sequence that wraps a single
//! assistant invocation — proxy bring-up, env/arg composition, spawn,
//! signal forwarding, grace-period drain, and the metrics pipeline around
//! all of it.
//!
//! Failure isolation: every metrics-pipeline error is logged and swallowed
//! here. The child's own exit code is always what `run` resolves with.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use cm_domain::config::{Config, ProviderKind};
use cm_domain::error::Result;
use cm_domain::model::{LifecycleStatus, MetricsSession};
use cm_domain::trace::TraceEvent;
use cm_metrics::git::BranchCache;
use cm_metrics::session_store::SessionStore;
use cm_metrics::transmitter::MetricsTransmitter;
use cm_proxy::interceptors::analytics::AnalyticsInterceptor;
use cm_proxy::interceptors::endpoint_blocker::EndpointBlockerInterceptor;
use cm_proxy::interceptors::header_injection::HeaderInjectionInterceptor;
use cm_proxy::interceptors::metrics_sync::MetricsSyncInterceptor;
use cm_proxy::interceptors::sso_auth::SsoAuthInterceptor;
use cm_proxy::interceptors::{Interceptor, InterceptorChain};
use cm_proxy::server::ProxyServer;
use cm_proxy::sso_cache::SsoCredentialCache;

use crate::hooks::{AgentLifecycleHooks, NoopHooks};
use crate::orchestrator::MetricsOrchestrator;
use crate::spawn;

/// What `run` resolves with on a clean child exit, or the error it carries
/// for a non-zero one (spec §4.10 step 9: "resolve with exitCode=0 or
/// reject with a structured error carrying exitCode for non-zero").
#[derive(Debug, Clone, Copy)]
pub struct RunOutcome {
    pub exit_code: i32,
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }
}

pub struct LifecycleController {
    config: Config,
    hooks: Box<dyn AgentLifecycleHooks>,
}

impl LifecycleController {
    pub fn new(config: Config) -> Self {
        Self { config, hooks: Box::new(NoopHooks) }
    }

    pub fn with_hooks(config: Config, hooks: Box<dyn AgentLifecycleHooks>) -> Self {
        Self { config, hooks }
    }

    /// Run `program` with `args`, wrapping it in the proxy and metrics
    /// pipeline per the configured provider/agent.
    pub async fn run(&self, program: &str, args: Vec<String>, agent_name: &str, env_overrides: HashMap<String, String>) -> Result<RunOutcome> {
        let mut env: HashMap<String, String> = std::env::vars().collect();
        env.extend(env_overrides);

        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(self.config.provider.timeout_ms))
            .build()
            .map_err(|e| cm_domain::error::Error::Proxy(e.to_string()))?;

        let data_root = std::path::PathBuf::from(&self.config.data_root);
        let sessions_dir = data_root.join("metrics").join("sessions");
        let session_store = Arc::new(SessionStore::new(&sessions_dir));
        let transmitter = Arc::new(
            MetricsTransmitter::new(client.clone(), self.config.metrics.collector_endpoint.clone(), self.config.metrics.dry_run)
                .with_retry_policy(self.config.metrics.transmission_max_attempts, self.config.metrics.transmission_retry_base_ms),
        );
        let branch_cache = Arc::new(BranchCache::new());

        let agent_config = self.config.agents.get(agent_name).cloned().unwrap_or_default();

        // The orchestrator (and its DeltaStore) is constructed ahead of the
        // proxy so the Metrics-Sync interceptor can share it from the
        // chain's very first request, well before correlation can possibly
        // complete. Building it never fails; only `before_agent_spawn`'s
        // session-store write and the session-start send can.
        let working_directory = std::env::current_dir().map(|p| p.to_string_lossy().into_owned()).unwrap_or_else(|_| ".".to_string());
        let provider_label = match self.config.provider.kind {
            ProviderKind::Sso => "sso",
            ProviderKind::Direct => "direct",
        };
        let session = MetricsSession::new(agent_name, provider_label, working_directory);
        let metrics_orchestrator = self.config.metrics.enabled.then(|| {
            Arc::new(MetricsOrchestrator::new(&session, sessions_dir.clone(), session_store.clone(), transmitter.clone(), branch_cache.clone(), &agent_config, &self.config.metrics))
        });

        // Step 1: proxy bring-up for SSO providers, env injection.
        let proxy = if matches!(self.config.provider.kind, ProviderKind::Sso) {
            let delta_store = metrics_orchestrator.as_ref().map(|o| o.delta_store());
            let chain = self.build_interceptor_chain(&session.session_id, &agent_config, &data_root, &session_store, &transmitter, delta_store);
            let server = Arc::new(ProxyServer::new(
                chain,
                client.clone(),
                self.config.provider.base_url.clone(),
                self.config.proxy.analytics_cap_bytes,
                self.config.proxy.upstream_timeout_secs,
            ));
            let url = server.start(&self.config.proxy.bind_host).await?;
            env.insert(self.config.provider.sso_env_overrides.base_url.clone(), url);
            env.insert(self.config.provider.sso_env_overrides.api_key.clone(), "proxy-handled".to_string());
            Some(server)
        } else {
            None
        };

        // Step 2: assistant-specific env hook.
        self.hooks.before_run(&mut env);

        // Step 3: assistant-specific argument transform.
        let args = self.hooks.transform_args(args);

        // Step 4: metrics bring-up. A failure here is logged and metrics
        // are disabled for the rest of the run; the spawn still proceeds.
        let orchestrator = if let Some(orchestrator) = metrics_orchestrator {
            match self.start_metrics(&session, session_store.clone(), transmitter.clone(), &orchestrator).await {
                Ok(()) => Some(orchestrator),
                Err(e) => {
                    tracing::warn!(session_id = %session.session_id, error = %e, "metrics bring-up failed, continuing without metrics");
                    transmitter.send_session_start(&session, LifecycleStatus::Failed, Some(&e.to_string())).await;
                    None
                }
            }
        } else {
            None
        };

        // Step 5: spawn with inherited stdio.
        let mut child = match spawn::spawn_inherited(program, &args, &env, &session.working_directory) {
            Ok(child) => child,
            Err(e) => {
                if let Some(server) = &proxy {
                    server.stop();
                }
                return Err(e);
            }
        };
        if let Some(pid) = child.id() {
            TraceEvent::ChildSpawned { session_id: session.session_id.clone(), pid }.emit();
        }

        // Step 7 runs concurrently with steps 6/8: correlate and start
        // collecting while we wait on the child and on shutdown signals.
        let after_spawn_handle = orchestrator.clone().map(|o| tokio::spawn(async move { o.after_agent_spawn().await }));

        // Steps 6 & 8: wait for exit, forwarding any shutdown signal we see
        // in the meantime rather than racing the child down immediately.
        let status = loop {
            tokio::select! {
                result = child.wait() => break result.map_err(cm_domain::error::Error::Io)?,
                signal = spawn::wait_for_shutdown_signal() => {
                    TraceEvent::ChildSignalForwarded { session_id: session.session_id.clone(), signal: format!("{signal:?}") }.emit();
                    spawn::forward_signal(&child, signal);
                }
            }
        };
        let exit_code = spawn::exit_code(&status);
        TraceEvent::ChildExited { session_id: session.session_id.clone(), exit_code: status.code() }.emit();

        if let Some(handle) = after_spawn_handle {
            match handle.await {
                Ok(Err(e)) => tracing::warn!(session_id = %session.session_id, error = %e, "metrics correlation failed"),
                Err(e) => tracing::warn!(session_id = %session.session_id, error = %e, "metrics correlation task panicked"),
                Ok(Ok(())) => {}
            }
        }

        // Grace period: give in-flight LLM telemetry a chance to land
        // before the proxy is torn down.
        tokio::time::sleep(Duration::from_millis(self.config.grace_period_ms)).await;

        if let Some(server) = &proxy {
            server.stop();
        }

        self.hooks.after_run(exit_code);

        if let Some(orchestrator) = &orchestrator {
            let status = if exit_code == 0 { LifecycleStatus::Completed } else { LifecycleStatus::Failed };
            let error = if exit_code == 0 { None } else { Some(format!("exited with status {exit_code}")) };
            if let Err(e) = orchestrator.on_agent_exit(status, error.as_deref()).await {
                tracing::warn!(session_id = %session.session_id, error = %e, "metrics shutdown flush failed");
            }
        }

        Ok(RunOutcome { exit_code })
    }

    async fn start_metrics(&self, session: &MetricsSession, session_store: Arc<SessionStore>, transmitter: Arc<MetricsTransmitter>, orchestrator: &MetricsOrchestrator) -> Result<()> {
        session_store.create(session)?;
        orchestrator.before_agent_spawn().await;
        transmitter.send_session_start(session, LifecycleStatus::Started, None).await;
        Ok(())
    }

    fn build_interceptor_chain(
        &self,
        session_id: &str,
        agent_config: &cm_domain::config::AgentConfig,
        data_root: &std::path::Path,
        session_store: &Arc<SessionStore>,
        transmitter: &Arc<MetricsTransmitter>,
        delta_store: Option<Arc<cm_metrics::delta_store::DeltaStore>>,
    ) -> InterceptorChain {
        let mut interceptors: Vec<Box<dyn Interceptor>> = Vec::new();

        if matches!(self.config.provider.kind, ProviderKind::Sso) {
            let sso_cache = Arc::new(SsoCredentialCache::new(data_root));
            interceptors.push(Box::new(SsoAuthInterceptor::new(sso_cache, self.config.provider.base_url.clone())));
        }
        interceptors.push(Box::new(HeaderInjectionInterceptor::new(session_id.to_string(), self.config.proxy.header_injection.clone())));
        interceptors.push(Box::new(EndpointBlockerInterceptor::new(self.config.proxy.blocked_path_patterns.clone())));
        interceptors.push(Box::new(AnalyticsInterceptor::new(self.config.proxy.analytics_cap_bytes)));

        if let Some(delta_store) = delta_store {
            interceptors.push(Box::new(MetricsSyncInterceptor::new(
                session_id.to_string(),
                session_store.clone(),
                delta_store,
                transmitter.clone(),
                agent_config.error_excluded_tools.clone(),
                Duration::from_millis(self.config.metrics.collector_debounce_ms),
            )));
        }

        InterceptorChain::new(interceptors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn direct_provider_run_skips_proxy_and_reports_exit_code() {
        let mut config = Config::default();
        config.metrics.enabled = false;
        let controller = LifecycleController::new(config);
        let outcome = controller.run("true", vec![], "claude-code", HashMap::new()).await.unwrap();
        assert!(outcome.is_success());
    }

    #[tokio::test]
    async fn nonzero_exit_is_reported_without_erroring() {
        let mut config = Config::default();
        config.metrics.enabled = false;
        let controller = LifecycleController::new(config);
        let outcome = controller.run("false", vec![], "claude-code", HashMap::new()).await.unwrap();
        assert_eq!(outcome.exit_code, 1);
    }
}
