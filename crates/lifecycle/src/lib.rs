//! The Assistant Lifecycle Controller: spawns the child assistant process
//! with a customized environment, manages an SSO-authenticated proxy for
//! it, forwards signals, drains a grace period for late telemetry, and
//! emits session-start/session-end lifecycle metrics around the whole
//! invocation.

pub mod controller;
pub mod hooks;
pub mod orchestrator;
pub mod spawn;

pub use controller::{LifecycleController, RunOutcome};
pub use hooks::{AgentLifecycleHooks, NoopHooks};
pub use orchestrator::MetricsOrchestrator;
