//! Container runtime access for the actor side of the dyad.

use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::cancel::Ctx;
use crate::subprocess::{RunOutput, Tool, validate_container_name};

const START_POLL_INTERVAL: Duration = Duration::from_millis(250);
const START_WAIT: Duration = Duration::from_secs(8);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerState {
    pub running: bool,
}

/// The container operations the supervisor needs.
pub trait ContainerRuntime {
    /// Current state of `name`; an error means the container is unknown.
    fn inspect(&self, ctx: &Ctx, name: &str) -> anyhow::Result<ContainerState>;

    fn start(&self, ctx: &Ctx, name: &str) -> anyhow::Result<()>;

    /// Run `argv` inside `name` and return its output whatever the exit code.
    fn exec(&self, ctx: &Ctx, name: &str, argv: &[&str]) -> anyhow::Result<RunOutput>;
}

/// [`ContainerRuntime`] backed by the `docker` CLI.
#[derive(Debug, Clone)]
pub struct DockerCli {
    command_timeout: Duration,
}

impl Default for DockerCli {
    fn default() -> Self {
        Self {
            command_timeout: Duration::from_secs(30),
        }
    }
}

impl DockerCli {
    fn docker(&self, args: &[&str]) -> Tool {
        Tool::new("docker").args(args).timeout(self.command_timeout)
    }
}

impl ContainerRuntime for DockerCli {
    fn inspect(&self, ctx: &Ctx, name: &str) -> anyhow::Result<ContainerState> {
        validate_container_name(name)?;
        let output = self
            .docker(&["inspect", "-f", "{{.State.Running}}", name])
            .run_ctx(ctx)?;
        if !output.success() {
            anyhow::bail!("no such container: {name}: {}", output.stderr.trim());
        }
        Ok(ContainerState {
            running: output.stdout.trim() == "true",
        })
    }

    fn start(&self, ctx: &Ctx, name: &str) -> anyhow::Result<()> {
        validate_container_name(name)?;
        self.docker(&["start", name]).run_ok_ctx(ctx)?;
        Ok(())
    }

    fn exec(&self, ctx: &Ctx, name: &str, argv: &[&str]) -> anyhow::Result<RunOutput> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| anyhow::anyhow!("exec in {name}: empty command"))?;
        Tool::new(program)
            .args(args)
            .timeout(self.command_timeout)
            .in_container(name)?
            .run_ctx(ctx)
    }
}

/// Start `name` if it is stopped and wait until it reports running.
pub fn ensure_running<R: ContainerRuntime + ?Sized>(
    runtime: &R,
    ctx: &Ctx,
    name: &str,
) -> anyhow::Result<()> {
    ensure_running_within(runtime, ctx, name, START_WAIT, START_POLL_INTERVAL)
}

fn ensure_running_within<R: ContainerRuntime + ?Sized>(
    runtime: &R,
    ctx: &Ctx,
    name: &str,
    wait: Duration,
    poll: Duration,
) -> anyhow::Result<()> {
    if runtime.inspect(ctx, name)?.running {
        return Ok(());
    }
    info!(container = name, "starting stopped container");
    runtime.start(ctx, name)?;
    let deadline = Instant::now() + wait;
    loop {
        match runtime.inspect(ctx, name) {
            Ok(state) if state.running => return Ok(()),
            Ok(_) => {}
            Err(e) => debug!(container = name, error = %e, "inspect after start failed"),
        }
        if Instant::now() >= deadline {
            anyhow::bail!("container {name} is not running after start");
        }
        ctx.sleep(poll)?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeRuntime;

    const FAST: Duration = Duration::from_millis(1);

    #[test]
    fn running_container_is_left_alone() {
        let rt = FakeRuntime::running("box");
        ensure_running_within(&rt, &Ctx::background(), "box", FAST * 50, FAST).unwrap();
        assert_eq!(rt.starts(), 0);
    }

    #[test]
    fn stopped_container_is_started() {
        let rt = FakeRuntime::stopped("box");
        ensure_running_within(&rt, &Ctx::background(), "box", FAST * 50, FAST).unwrap();
        assert_eq!(rt.starts(), 1);
    }

    #[test]
    fn container_that_never_starts_fails() {
        let rt = FakeRuntime::stopped("box").start_has_no_effect();
        let err =
            ensure_running_within(&rt, &Ctx::background(), "box", FAST * 20, FAST).unwrap_err();
        assert!(err.to_string().contains("container box is not running after start"));
    }

    #[test]
    fn missing_container_is_an_error() {
        let rt = FakeRuntime::running("box");
        let err = ensure_running(&rt, &Ctx::background(), "other").unwrap_err();
        assert!(err.to_string().contains("no such container: other"));
        assert_eq!(rt.starts(), 0);
    }

    #[test]
    fn exec_rejects_empty_argv() {
        let err = DockerCli::default()
            .exec(&Ctx::background(), "box", &[])
            .unwrap_err();
        assert!(err.to_string().contains("empty command"));
    }
}
