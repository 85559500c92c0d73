//! Extension points a per-assistant integration can plug into the
//! controller's `run()` sequence (spec §4.10 steps 2-3, 8):
//! `agent.lifecycle.beforeRun`, `agent.argumentTransform`,
//! `agent.lifecycle.afterRun`. Concrete integrations (picking a real
//! binary name, rewriting CLI flags per assistant) live outside the core —
//! profile selection and config loading are out of scope here — so this
//! crate only ships the trait and a no-op default.

use std::collections::HashMap;

pub trait AgentLifecycleHooks: Send + Sync {
    /// Runs after the proxy env vars are injected, before spawn. May add,
    /// override, or remove entries from the composed child environment.
    fn before_run(&self, _env: &mut HashMap<String, String>) {}

    /// Rewrites the CLI arguments the child is spawned with.
    fn transform_args(&self, args: Vec<String>) -> Vec<String> {
        args
    }

    /// Runs once the child has exited, after the grace-period drain.
    fn after_run(&self, _exit_code: i32) {}
}

/// The identity integration: every hook is a pass-through. What `run`
/// defaults to when the caller has no assistant-specific customization.
pub struct NoopHooks;

impl AgentLifecycleHooks for NoopHooks {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_hooks_leave_args_and_env_untouched() {
        let hooks = NoopHooks;
        let mut env = HashMap::new();
        env.insert("A".to_string(), "1".to_string());
        hooks.before_run(&mut env);
        assert_eq!(env.get("A").map(String::as_str), Some("1"));
        assert_eq!(hooks.transform_args(vec!["--foo".into()]), vec!["--foo".to_string()]);
    }
}
