use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};


use crate::cancel::{Ctx, CtxError};
use crate::error::ExitError;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Result of running a subprocess.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl RunOutput {
    /// Returns true if the process exited successfully.
    pub const fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Builder for running external tools (tmux, docker).
#[derive(Debug, Clone)]
pub struct Tool {
    program: String,
    args: Vec<String>,
    timeout: Option<Duration>,
    container: Option<String>,
}

impl Tool {
    /// Create a new tool invocation.
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
            args: Vec::new(),
            timeout: None,
            container: None,
        }
    }

    /// Add a single argument.
    pub fn arg(mut self, arg: &str) -> Self {
        self.args.push(arg.to_string());
        self
    }

    /// Add multiple arguments.
    pub fn args(mut self, args: &[&str]) -> Self {
        self.args.extend(args.iter().map(|s| (*s).to_string()));
        self
    }

    /// Set a timeout for the subprocess, independent of any context deadline.
    pub const fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(duration);
        self
    }

    /// Run this command inside a container via `docker exec <name>`.
    ///
    /// Validates the name against docker's `[a-zA-Z0-9][a-zA-Z0-9_.-]*` so it
    /// cannot be mistaken for a docker flag.
    pub fn in_container(mut self, name: &str) -> anyhow::Result<Self> {
        validate_container_name(name)?;
        self.container = Some(name.to_string());
        Ok(self)
    }

    /// Name used in error messages.
    pub fn display_name(&self) -> String {
        match &self.container {
            Some(c) => format!("{} (in {c})", self.program),
            None => self.program.clone(),
        }
    }

    /// Run the tool, killing it when the context is cancelled or its deadline
    /// (or the tool's own timeout) passes.
    pub fn run_ctx(&self, ctx: &Ctx) -> anyhow::Result<RunOutput> {
        ctx.check()?;
        let (program, args) = self.build_command();

        let mut cmd = Command::new(&program);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(|e| self.not_found_or_other(e))?;
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let status = self.wait(&mut child, ctx);
        // Pipes close once the child is gone, so the readers always finish.
        let stdout = join_reader(stdout);
        let stderr = join_reader(stderr);
        let status = status?;

        Ok(RunOutput {
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            exit_code: status.code().unwrap_or(-1),
        })
    }

    /// Run under `ctx` and turn a non-zero exit into [`ExitError::ToolFailed`].
    pub fn run_ok_ctx(&self, ctx: &Ctx) -> anyhow::Result<RunOutput> {
        let output = self.run_ctx(ctx)?;
        if output.success() {
            Ok(output)
        } else {
            let message = if output.stderr.trim().is_empty() {
                output.stdout.trim().to_string()
            } else {
                output.stderr.trim().to_string()
            };
            Err(ExitError::ToolFailed {
                tool: self.display_name(),
                code: output.exit_code,
                message,
            }
            .into())
        }
    }

    fn wait(&self, child: &mut Child, ctx: &Ctx) -> anyhow::Result<ExitStatus> {
        let own_deadline = self.timeout.map(|t| Instant::now() + t);
        loop {
            match child.try_wait() {
                Ok(Some(status)) => return Ok(status),
                Ok(None) => {}
                Err(e) => {
                    kill(child);
                    return Err(anyhow::Error::new(e)
                        .context(format!("waiting for {}", self.display_name())));
                }
            }

            if let Some(deadline) = own_deadline
                && Instant::now() >= deadline
                && ctx.deadline().is_none_or(|d| deadline <= d)
            {
                kill(child);
                return Err(ExitError::Timeout {
                    tool: self.display_name(),
                    timeout_secs: self.timeout.map_or(0, |t| t.as_secs()),
                }
                .into());
            }
            if let Some(err) = ctx.err() {
                kill(child);
                return Err(anyhow::Error::new(err)
                    .context(format!("running {}", self.display_name())));
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    fn build_command(&self) -> (String, Vec<String>) {
        if let Some(ref container) = self.container {
            let mut args = vec![
                "exec".to_string(),
                container.clone(),
                self.program.clone(),
            ];
            args.extend(self.args.clone());
            ("docker".to_string(), args)
        } else {
            (self.program.clone(), self.args.clone())
        }
    }

    fn not_found_or_other(&self, e: std::io::Error) -> anyhow::Error {
        if e.kind() == std::io::ErrorKind::NotFound {
            let tool = if self.container.is_some() {
                "docker"
            } else {
                &self.program
            };
            ExitError::ToolNotFound {
                tool: tool.to_string(),
            }
            .into()
        } else {
            anyhow::Error::new(e).context(format!("running {}", self.display_name()))
        }
    }
}

/// The context error buried in an error chain, if any.
pub fn ctx_error(err: &anyhow::Error) -> Option<CtxError> {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<CtxError>().copied())
}

pub fn validate_container_name(name: &str) -> anyhow::Result<()> {
    let valid_first = name
        .bytes()
        .next()
        .is_some_and(|b| b.is_ascii_alphanumeric());
    if !valid_first
        || !name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'.' | b'-'))
        || name.len() > 128
    {
        anyhow::bail!(
            "invalid container name {name:?}: must match [a-zA-Z0-9][a-zA-Z0-9_.-]*, max 128 chars"
        );
    }
    Ok(())
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<Vec<u8>>> {
    pipe.map(|mut reader| {
        std::thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = reader.read_to_end(&mut buf);
            buf
        })
    })
}

fn join_reader(handle: Option<JoinHandle<Vec<u8>>>) -> Vec<u8> {
    handle
        .and_then(|h| h.join().ok())
        .unwrap_or_default()
}

fn kill(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}
