//! Child process spawn and signal handling.
//!
//! Inherited stdio (spec §4.10 step 5): the assistant talks to the user's
//! terminal directly, so unlike the exec tool's piped-and-monitored
//! children, there are no stdout/stderr reader tasks here — only the
//! wait/signal race.

use std::collections::HashMap;
use std::process::ExitStatus;

use cm_domain::error::{Error, Result};
use tokio::process::{Child, Command};

/// Spawn `program` with `args`, the composed `env`, and `cwd`, inheriting
/// the parent's stdin/stdout/stderr.
pub fn spawn_inherited(program: &str, args: &[String], env: &HashMap<String, String>, cwd: &str) -> Result<Child> {
    let mut command = Command::new(program);
    command.args(args).current_dir(cwd).envs(env).kill_on_drop(false);
    command.spawn().map_err(|e| Error::Spawn(format!("{program}: {e}")))
}

/// Which external signal asked us to shut down, so it can be forwarded
/// verbatim rather than always escalating to `SIGKILL`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    Interrupt,
    Terminate,
}

/// Waits for `SIGINT`/`Ctrl-C` or (on Unix) `SIGTERM`. Never returns `Err` —
/// an install failure here is unrecoverable and the process should abort,
/// the same posture the reference shutdown future takes.
pub async fn wait_for_shutdown_signal() -> ShutdownSignal {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install sigterm handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => ShutdownSignal::Interrupt,
        _ = terminate => ShutdownSignal::Terminate,
    }
}

/// Forward `signal` to the child's pid. `tokio::process::Child::kill()` only
/// ever sends `SIGKILL`, so on Unix this goes straight to `libc::kill` to
/// preserve the original signal's semantics (SIGINT/SIGTERM allow the child
/// to flush its own state before exiting); non-Unix targets have no
/// equivalent and fall back to the forceful kill.
pub fn forward_signal(child: &Child, signal: ShutdownSignal) {
    #[cfg(unix)]
    {
        let Some(pid) = child.id() else { return };
        let sig = match signal {
            ShutdownSignal::Interrupt => libc::SIGINT,
            ShutdownSignal::Terminate => libc::SIGTERM,
        };
        unsafe {
            libc::kill(pid as libc::pid_t, sig);
        }
    }
    #[cfg(not(unix))]
    {
        let _ = signal;
        let _ = child;
    }
}

/// Exit code to propagate for a child that exited normally; platforms
/// without a reportable code (killed by signal) fall back to 1.
pub fn exit_code(status: &ExitStatus) -> i32 {
    status.code().unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn spawn_inherited_runs_and_reports_exit_code() {
        let mut child = spawn_inherited("true", &[], &HashMap::new(), ".").unwrap();
        let status = child.wait().await.unwrap();
        assert_eq!(exit_code(&status), 0);
    }

    #[tokio::test]
    async fn spawn_inherited_propagates_nonzero_exit() {
        let mut child = spawn_inherited("false", &[], &HashMap::new(), ".").unwrap();
        let status = child.wait().await.unwrap();
        assert_eq!(exit_code(&status), 1);
    }

    #[tokio::test]
    async fn unknown_program_is_a_spawn_error() {
        let result = spawn_inherited("cm-lifecycle-nonexistent-binary", &[], &HashMap::new(), ".");
        assert!(matches!(result, Err(Error::Spawn(_))));
    }
}
