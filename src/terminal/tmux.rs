//! tmux driven through its CLI, either locally or inside a container via
//! `docker exec`.

use std::time::Duration;

use crate::cancel::Ctx;
use crate::subprocess::{RunOutput, Tool, validate_container_name};

use super::{CaptureMode, ControlKey, Multiplexer};

const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(15);

/// Runs `tmux` commands on the host or in a named container.
#[derive(Debug, Clone)]
pub struct TmuxRunner {
    container: Option<String>,
    command_timeout: Duration,
}

impl TmuxRunner {
    /// tmux on this host.
    pub const fn local() -> Self {
        Self {
            container: None,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    /// tmux inside `container`, reached through `docker exec`.
    pub fn in_container(container: &str) -> anyhow::Result<Self> {
        validate_container_name(container)?;
        Ok(Self {
            container: Some(container.to_string()),
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
        })
    }

    fn tool(&self, args: &[&str]) -> anyhow::Result<Tool> {
        let tool = Tool::new("tmux").args(args).timeout(self.command_timeout);
        match &self.container {
            Some(container) => tool.in_container(container),
            None => Ok(tool),
        }
    }

    fn output(&self, ctx: &Ctx, args: &[&str]) -> anyhow::Result<RunOutput> {
        self.tool(args)?.run_ok_ctx(ctx)
    }
}

impl Multiplexer for TmuxRunner {
    fn probe(&self, ctx: &Ctx) -> anyhow::Result<String> {
        let out = self.output(ctx, &["-V"])?;
        Ok(out.stdout.trim().to_string())
    }

    fn has_session(&self, ctx: &Ctx, session: &str) -> anyhow::Result<bool> {
        let out = self.tool(&["has-session", "-t", session])?.run_ctx(ctx)?;
        Ok(out.success())
    }

    fn new_session(&self, ctx: &Ctx, session: &str, start_cmd: &str) -> anyhow::Result<()> {
        self.output(
            ctx,
            &["new-session", "-d", "-s", session, "bash", "-lc", start_cmd],
        )?;
        Ok(())
    }

    fn kill_session(&self, ctx: &Ctx, session: &str) -> anyhow::Result<()> {
        self.output(ctx, &["kill-session", "-t", session])?;
        Ok(())
    }

    fn set_option(
        &self,
        ctx: &Ctx,
        session: &str,
        option: &str,
        value: &str,
    ) -> anyhow::Result<()> {
        self.output(ctx, &["set-option", "-t", session, option, value])?;
        Ok(())
    }

    fn pane_dead(&self, ctx: &Ctx, target: &str) -> anyhow::Result<bool> {
        let out = self.output(ctx, &["display-message", "-p", "-t", target, "#{pane_dead}"])?;
        Ok(is_pane_dead_output(&out.stdout))
    }

    fn resize_pane(&self, ctx: &Ctx, target: &str, cols: u16, rows: u16) -> anyhow::Result<()> {
        let (cols, rows) = (cols.to_string(), rows.to_string());
        self.output(ctx, &["resize-pane", "-t", target, "-x", &cols, "-y", &rows])?;
        Ok(())
    }

    fn send_control_sequence(
        &self,
        ctx: &Ctx,
        target: &str,
        keys: &[ControlKey],
    ) -> anyhow::Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut args = vec!["send-keys", "-t", target];
        args.extend(keys.iter().map(|k| k.key_name()));
        self.output(ctx, &args)?;
        Ok(())
    }

    fn send_literal(&self, ctx: &Ctx, target: &str, text: &str) -> anyhow::Result<()> {
        self.output(ctx, &literal_args(target, text))?;
        Ok(())
    }

    fn capture(
        &self,
        ctx: &Ctx,
        target: &str,
        mode: CaptureMode,
        lines: usize,
    ) -> anyhow::Result<String> {
        let args = capture_args(target, mode, lines);
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        let out = self.output(ctx, &args)?;
        Ok(out.stdout)
    }
}

fn literal_args<'a>(target: &'a str, text: &'a str) -> Vec<&'a str> {
    vec!["send-keys", "-t", target, "-l", "--", text]
}

fn capture_args(target: &str, mode: CaptureMode, lines: usize) -> Vec<String> {
    let mut args = vec![
        "capture-pane".to_string(),
        "-p".to_string(),
        "-J".to_string(),
        "-t".to_string(),
        target.to_string(),
        "-S".to_string(),
        format!("-{lines}"),
    ];
    if mode == CaptureMode::Alternate {
        // -q keeps capture from failing when no alternate screen is active.
        args.push("-a".to_string());
        args.push("-q".to_string());
    }
    args
}

fn is_pane_dead_output(out: &str) -> bool {
    matches!(out.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_args_primary() {
        assert_eq!(
            capture_args("s:0.0", CaptureMode::Primary, 8000),
            vec!["capture-pane", "-p", "-J", "-t", "s:0.0", "-S", "-8000"]
        );
    }

    #[test]
    fn capture_args_alternate_is_quiet() {
        let args = capture_args("s:0.0", CaptureMode::Alternate, 500);
        assert_eq!(&args[args.len() - 2..], &["-a", "-q"]);
        assert!(args.contains(&"-500".to_string()));
    }

    #[test]
    fn literal_args_terminate_options() {
        assert_eq!(
            literal_args("s:0.0", "-rf looks like a flag"),
            vec!["send-keys", "-t", "s:0.0", "-l", "--", "-rf looks like a flag"]
        );
    }

    #[test]
    fn pane_dead_output_parsing() {
        assert!(is_pane_dead_output("1\n"));
        assert!(is_pane_dead_output(" true "));
        assert!(!is_pane_dead_output("0\n"));
        assert!(!is_pane_dead_output(""));
    }

    #[test]
    fn container_runner_validates_name() {
        assert!(TmuxRunner::in_container("--rm").is_err());
        let runner = TmuxRunner::in_container("actor-1").unwrap();
        assert_eq!(runner.tool(&["-V"]).unwrap().display_name(), "tmux (in actor-1)");
        assert_eq!(runner.command_timeout, DEFAULT_COMMAND_TIMEOUT);
    }

    #[test]
    fn local_session_lifecycle() {
        let ctx = Ctx::background();
        let tmux = TmuxRunner::local();
        if tmux.probe(&ctx).is_err() {
            return;
        }
        let session = format!("dyad-unit-{}", std::process::id());
        let target = super::super::pane_target(&session);

        tmux.new_session(&ctx, &session, "cat").unwrap();
        assert!(tmux.has_session(&ctx, &session).unwrap());
        assert!(!tmux.pane_dead(&ctx, &target).unwrap());

        tmux.send_literal(&ctx, &target, "ping-from-test").unwrap();
        tmux.send_control_sequence(&ctx, &target, &[ControlKey::Submit])
            .unwrap();
        std::thread::sleep(Duration::from_millis(300));
        let captured = tmux
            .capture(&ctx, &target, CaptureMode::Primary, 500)
            .unwrap();
        assert!(captured.contains("ping-from-test"));

        tmux.kill_session(&ctx, &session).unwrap();
        assert!(!tmux.has_session(&ctx, &session).unwrap());
    }
}
