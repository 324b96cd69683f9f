//! External command execution
//!
//! Scheduler and storage backends are driven through external commands.
//! Every command passes through a [`CommandExecutor`], which bounds its
//! runtime and, in dry-run mode, logs mutating commands instead of running
//! them. Queries always run so dry-run passes observe real state.

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument};

use crate::error::{ConnectorError, ConnectorResult};
use crate::resilience::with_timeout;

/// A single external command invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Whether the command changes backend state.
    pub mutates: bool,
}

impl CommandSpec {
    /// A read-only command, executed even in dry-run mode.
    pub fn query<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            mutates: false,
        }
    }

    /// A command that changes backend state.
    pub fn mutation<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            mutates: true,
            ..Self::query(program, args)
        }
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Captured result of a command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// A successful result with the given stdout.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            status: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// A failed result with the given status and stderr.
    pub fn failed(status: i32, stderr: impl Into<String>) -> Self {
        Self {
            status,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.status == 0
    }
}

/// Runs commands. Implemented by [`ProcessRunner`] in production and by
/// scripted fakes in tests.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, spec: &CommandSpec) -> ConnectorResult<CommandOutput>;
}

/// Runs commands as child processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessRunner;

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, spec: &CommandSpec) -> ConnectorResult<CommandOutput> {
        let output = tokio::process::Command::new(&spec.program)
            .args(&spec.args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ConnectorError::io(format!("failed to spawn `{spec}`"), e))?;

        Ok(CommandOutput {
            // Killed by signal has no code.
            status: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Timeout and dry-run gate in front of a [`CommandRunner`].
#[derive(Clone)]
pub struct CommandExecutor {
    runner: Arc<dyn CommandRunner>,
    dry_run: bool,
    timeout: Duration,
}

impl CommandExecutor {
    pub fn new(runner: Arc<dyn CommandRunner>, dry_run: bool, timeout: Duration) -> Self {
        Self {
            runner,
            dry_run,
            timeout,
        }
    }

    /// Executor over real child processes.
    pub fn system(dry_run: bool, timeout: Duration) -> Self {
        Self::new(Arc::new(ProcessRunner), dry_run, timeout)
    }

    /// Copy of this executor with a different timeout.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        Self {
            timeout,
            ..self.clone()
        }
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Run a command, failing with [`ConnectorError::BackendCommand`] on a
    /// non-zero exit.
    #[instrument(skip(self), fields(command = %spec, dry_run = self.dry_run))]
    pub async fn run(&self, spec: &CommandSpec) -> ConnectorResult<CommandOutput> {
        let output = self.run_unchecked(spec).await?;
        if !output.success() {
            return Err(ConnectorError::BackendCommand {
                command: spec.to_string(),
                status: output.status,
                stderr: output.stderr.trim().to_string(),
            });
        }
        Ok(output)
    }

    /// Run a command and return its output whatever the exit status.
    pub async fn run_unchecked(&self, spec: &CommandSpec) -> ConnectorResult<CommandOutput> {
        if spec.mutates && self.dry_run {
            info!(command = %spec, "Dry run, not executing");
            return Ok(CommandOutput::ok(""));
        }

        debug!(command = %spec, "Executing command");
        let output = with_timeout(
            self.timeout,
            format!("command `{}`", spec.program),
            self.runner.run(spec),
        )
        .await??;
        debug!(command = %spec, status = output.status, "Command finished");
        Ok(output)
    }
}

impl fmt::Debug for CommandExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandExecutor")
            .field("dry_run", &self.dry_run)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingRunner {
        calls: AtomicUsize,
        output: CommandOutput,
    }

    impl CountingRunner {
        fn new(output: CommandOutput) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                output,
            }
        }
    }

    #[async_trait]
    impl CommandRunner for CountingRunner {
        async fn run(&self, _spec: &CommandSpec) -> ConnectorResult<CommandOutput> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.output.clone())
        }
    }

    struct SlowRunner;

    #[async_trait]
    impl CommandRunner for SlowRunner {
        async fn run(&self, _spec: &CommandSpec) -> ConnectorResult<CommandOutput> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(CommandOutput::ok(""))
        }
    }

    #[test]
    fn test_display_joins_args() {
        let spec = CommandSpec::mutation("sacctmgr", ["-i", "add", "account", "p123"]);
        assert_eq!(spec.to_string(), "sacctmgr -i add account p123");
        assert!(spec.mutates);
        assert!(!CommandSpec::query("scontrol", ["ping"]).mutates);
    }

    #[tokio::test]
    async fn test_dry_run_skips_mutations() {
        let runner = Arc::new(CountingRunner::new(CommandOutput::ok("real")));
        let executor = CommandExecutor::new(runner.clone(), true, Duration::from_secs(5));

        let out = executor
            .run(&CommandSpec::mutation("mkdir", ["/projects/p123"]))
            .await
            .unwrap();
        assert!(out.success());
        assert_eq!(out.stdout, "");
        assert_eq!(runner.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_dry_run_still_runs_queries() {
        let runner = Arc::new(CountingRunner::new(CommandOutput::ok("p123|root\n")));
        let executor = CommandExecutor::new(runner.clone(), true, Duration::from_secs(5));

        let out = executor
            .run(&CommandSpec::query("sacctmgr", ["show", "assoc"]))
            .await
            .unwrap();
        assert_eq!(out.stdout, "p123|root\n");
        assert_eq!(runner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_backend_error() {
        let runner = Arc::new(CountingRunner::new(CommandOutput::failed(1, " no such account \n")));
        let executor = CommandExecutor::new(runner, false, Duration::from_secs(5));

        let err = executor
            .run(&CommandSpec::mutation("sacctmgr", ["add"]))
            .await
            .unwrap_err();
        match err {
            ConnectorError::BackendCommand { status, stderr, .. } => {
                assert_eq!(status, 1);
                assert_eq!(stderr, "no such account");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unchecked_returns_failure_output() {
        let runner = Arc::new(CountingRunner::new(CommandOutput::failed(2, "x")));
        let executor = CommandExecutor::new(runner, false, Duration::from_secs(5));
        let out = executor
            .run_unchecked(&CommandSpec::query("test", ["-d", "/nope"]))
            .await
            .unwrap();
        assert_eq!(out.status, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_reported() {
        let executor = CommandExecutor::new(Arc::new(SlowRunner), false, Duration::from_secs(2));
        let err = executor
            .run(&CommandSpec::query("scontrol", ["ping"]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ConnectorError::ConnectionTimeout { timeout_secs: 2, .. }
        ));
    }
}
