//! Lifecycle of the multiplexer sessions that host the interactive CLIs.
//!
//! A session moves through `absent -> starting -> idle -> running -> idle`.
//! Timeouts and multiplexer failures send it back to `absent` via
//! [`SessionManager::recover`]; a dead pane is detected and replaced by
//! [`SessionManager::ensure_session`].

use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::cancel::{Ctx, CtxError};
use crate::error::TurnError;
use crate::subprocess::ctx_error;

use super::{CaptureMode, ControlKey, Multiplexer, pane_target, strip_ansi};

/// Prompt glyph rendered by the interactive CLI in front of its input line.
pub const PROMPT_GLYPH: char = '\u{203a}';

const PANE_COLS: u16 = 160;
const PANE_ROWS: u16 = 60;

/// Error substrings that mean the session is wedged or gone.
const RECOVERABLE_MARKERS: &[&str] = &[
    "timeout waiting for codex",
    "context deadline exceeded",
    "tmux",
    "pane",
    "session",
    "no such container",
    "is not running",
];

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub prompt_lines: usize,
    pub allow_mcp_startup: bool,
    pub capture_mode: CaptureMode,
    pub capture_lines: usize,
    pub poll_interval: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            prompt_lines: 3,
            allow_mcp_startup: false,
            capture_mode: CaptureMode::Primary,
            capture_lines: 8000,
            poll_interval: Duration::from_millis(350),
        }
    }
}

/// Creates, probes, and tears down sessions on one multiplexer.
pub struct SessionManager<M> {
    mux: M,
    settings: SessionSettings,
}

impl<M: Multiplexer> SessionManager<M> {
    pub const fn new(mux: M, settings: SessionSettings) -> Self {
        Self { mux, settings }
    }

    pub const fn mux(&self) -> &M {
        &self.mux
    }

    pub const fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Make sure `session` exists with a live pane running `start_cmd` and
    /// return the pane target.
    pub fn ensure_session(
        &self,
        ctx: &Ctx,
        session: &str,
        start_cmd: &str,
    ) -> anyhow::Result<String> {
        let target = pane_target(session);
        if !self.mux.has_session(ctx, session)? {
            debug!(session, "creating session");
            self.create(ctx, session, start_cmd)?;
        } else if self.mux.pane_dead(ctx, &target).unwrap_or(false) {
            warn!(session, "pane is dead, recreating session");
            let _ = self.mux.kill_session(ctx, session);
            self.create(ctx, session, start_cmd)?;
        }
        if let Err(e) = self.mux.resize_pane(ctx, &target, PANE_COLS, PANE_ROWS) {
            debug!(session, error = %e, "resize-pane failed");
        }
        Ok(target)
    }

    fn create(&self, ctx: &Ctx, session: &str, start_cmd: &str) -> anyhow::Result<()> {
        self.mux.new_session(ctx, session, start_cmd)?;
        if let Err(e) = self.mux.set_option(ctx, session, "remain-on-exit", "off") {
            debug!(session, error = %e, "set-option remain-on-exit failed");
        }
        Ok(())
    }

    /// Capture the pane with the configured buffer and window.
    pub fn capture(&self, ctx: &Ctx, target: &str) -> anyhow::Result<String> {
        self.mux.capture(
            ctx,
            target,
            self.settings.capture_mode,
            self.settings.capture_lines,
        )
    }

    /// Poll until the CLI shows an empty prompt.
    ///
    /// On timeout the last non-empty capture travels with the error.
    pub fn wait_for_prompt(
        &self,
        ctx: &Ctx,
        target: &str,
        timeout: Duration,
    ) -> anyhow::Result<String> {
        let wait_ctx = ctx.with_timeout(timeout);
        let deadline = Instant::now() + timeout;
        let mut last_output = String::new();
        while Instant::now() < deadline {
            match self.capture(&wait_ctx, target) {
                Ok(output) => {
                    if self.is_prompt_ready(&strip_ansi(&output)) {
                        return Ok(output);
                    }
                    if !output.trim().is_empty() {
                        last_output = output;
                    }
                }
                Err(e) => match ctx_error(&e) {
                    Some(CtxError::Cancelled) => return Err(e),
                    Some(CtxError::DeadlineExceeded) => break,
                    None => {
                        debug!(pane = target, error = %e, "capture failed while waiting for prompt");
                    }
                },
            }
            match wait_ctx.sleep(self.settings.poll_interval) {
                Ok(()) => {}
                Err(CtxError::DeadlineExceeded) => break,
                Err(e) => return Err(e.into()),
            }
        }
        Err(TurnError::PromptTimeout { last_output }.into())
    }

    /// Clear the input line, paste `prompt`, wait `settle`, then press enter.
    pub fn submit(
        &self,
        ctx: &Ctx,
        target: &str,
        prompt: &str,
        settle: Duration,
    ) -> anyhow::Result<()> {
        self.mux
            .send_control_sequence(ctx, target, &[ControlKey::ClearLine])?;
        self.mux.send_literal(ctx, target, prompt)?;
        ctx.sleep(settle)?;
        self.mux
            .send_control_sequence(ctx, target, &[ControlKey::Submit])
    }

    /// Press enter again without new input.
    pub fn resubmit(&self, ctx: &Ctx, target: &str) -> anyhow::Result<()> {
        self.mux
            .send_control_sequence(ctx, target, &[ControlKey::Submit])
    }

    pub fn is_prompt_ready(&self, clean: &str) -> bool {
        is_prompt_ready(
            clean,
            self.settings.prompt_lines,
            self.settings.allow_mcp_startup,
        )
    }

    /// Kill `session` if `cause` indicates it is wedged, so the next turn
    /// recreates it. Runs under its own deadline so it still works after the
    /// caller's context was cancelled.
    pub fn recover(&self, session: &str, cause: &anyhow::Error, budget: Duration) -> bool {
        if !is_recoverable_turn_err(cause) {
            return false;
        }
        let ctx = Ctx::detached(budget);
        match self.mux.kill_session(&ctx, session) {
            Ok(()) => warn!(session, cause = %format!("{cause:#}"), "killed session for recovery"),
            Err(e) => debug!(session, error = %e, "kill-session during recovery failed"),
        }
        true
    }
}

/// Whether the CLI is idle at an empty prompt.
///
/// Only the newest prompt line within the last `prompt_lines * 4` non-empty
/// lines counts; any text after its glyph means input is still pending.
pub fn is_prompt_ready(clean: &str, prompt_lines: usize, allow_mcp_startup: bool) -> bool {
    if !allow_mcp_startup {
        let lower = clean.to_lowercase();
        if lower.contains("starting mcp") || lower.contains("mcp startup") {
            return false;
        }
    }
    let budget = prompt_lines.max(1).saturating_mul(4);
    clean
        .lines()
        .rev()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .take(budget)
        .find_map(|line| line.strip_prefix(PROMPT_GLYPH))
        .is_some_and(|rest| rest.trim().is_empty())
}

/// Whether a turn failure should tear the session down.
pub fn is_recoverable_turn_err(err: &anyhow::Error) -> bool {
    let message = format!("{err:#}").to_lowercase();
    RECOVERABLE_MARKERS
        .iter()
        .any(|marker| message.contains(marker))
}

/// Lowercase `[a-z0-9_-]` form of a dyad name, `unknown` when nothing is left.
pub fn sanitize_session_name(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '-' | '_'))
        .collect();
    if cleaned.is_empty() {
        "unknown".to_string()
    } else {
        cleaned
    }
}

/// Session name for one member of a dyad.
pub fn session_name(dyad: &str, member: &str) -> String {
    format!("dyad-{}-{member}", sanitize_session_name(dyad))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeMux;

    fn fast_settings() -> SessionSettings {
        SessionSettings {
            poll_interval: Duration::from_millis(5),
            ..SessionSettings::default()
        }
    }

    #[test]
    fn prompt_ready_on_empty_prompt() {
        assert!(is_prompt_ready("banner\n\n› \n", 3, false));
        assert!(is_prompt_ready("›", 1, false));
    }

    #[test]
    fn prompt_not_ready_when_input_pending() {
        assert!(!is_prompt_ready("› write the tests\n", 3, false));
    }

    #[test]
    fn huge_line_budget_scans_whole_capture() {
        assert!(is_prompt_ready("› \n", usize::MAX, false));
        assert!(!is_prompt_ready("› busy\n", usize::MAX, false));
    }

    #[test]
    fn newest_prompt_line_wins() {
        // An older empty prompt does not count once a newer line holds input.
        assert!(!is_prompt_ready("› \noutput\n› queued text\n", 3, false));
        assert!(is_prompt_ready("› old input\noutput\n› \n", 3, false));
    }

    #[test]
    fn prompt_ready_respects_line_budget() {
        let mut text = String::from("› \n");
        for i in 0..20 {
            text.push_str(&format!("line {i}\n"));
        }
        assert!(!is_prompt_ready(&text, 1, false));
        assert!(is_prompt_ready(&text, 6, false));
    }

    #[test]
    fn mcp_startup_blocks_readiness_unless_allowed() {
        let text = "Starting MCP servers (1/2)\n› \n";
        assert!(!is_prompt_ready(text, 3, false));
        assert!(is_prompt_ready(text, 3, true));
        assert!(!is_prompt_ready("mcp startup in progress\n› ", 3, false));
    }

    #[test]
    fn zero_prompt_lines_still_scans() {
        assert!(is_prompt_ready("› ", 0, false));
    }

    #[test]
    fn recoverable_errors() {
        let cases = [
            ("timeout waiting for codex prompt", true),
            ("running tmux: context deadline exceeded", true),
            ("tmux (in box) failed (exit 1): can't find pane", true),
            ("Error: No such container: box", true),
            ("container box is not running", true),
            ("codex prompt ready but missing work report markers", false),
            ("actor output missing report", false),
        ];
        for (message, expected) in cases {
            let err = anyhow::anyhow!(message);
            assert_eq!(is_recoverable_turn_err(&err), expected, "{message}");
        }
    }

    #[test]
    fn recoverable_check_sees_context_chain() {
        let err = anyhow::Error::new(CtxError::DeadlineExceeded).context("capturing pane");
        assert!(is_recoverable_turn_err(&err));
    }

    #[test]
    fn sanitize_names() {
        assert_eq!(sanitize_session_name("Alpha Team!"), "alphateam");
        assert_eq!(sanitize_session_name("web_ui-2"), "web_ui-2");
        assert_eq!(sanitize_session_name("  "), "unknown");
        assert_eq!(sanitize_session_name("ÄÖÜ"), "unknown");
        assert_eq!(session_name("Alpha", "critic"), "dyad-alpha-critic");
    }

    #[test]
    fn ensure_session_creates_and_configures() {
        let mux = FakeMux::new();
        let mgr = SessionManager::new(mux.clone(), fast_settings());
        let target = mgr
            .ensure_session(&Ctx::background(), "dyad-a-actor", "codex")
            .unwrap();
        assert_eq!(target, "dyad-a-actor:0.0");
        let calls = mux.calls();
        assert!(calls.contains(&"new-session dyad-a-actor codex".to_string()));
        assert!(calls.contains(&"set-option dyad-a-actor remain-on-exit off".to_string()));
        assert!(calls.contains(&"resize-pane dyad-a-actor:0.0 160x60".to_string()));
    }

    #[test]
    fn ensure_session_reuses_live_session() {
        let mux = FakeMux::new();
        let mgr = SessionManager::new(mux.clone(), fast_settings());
        let ctx = Ctx::background();
        mgr.ensure_session(&ctx, "s", "codex").unwrap();
        mgr.ensure_session(&ctx, "s", "codex").unwrap();
        assert_eq!(mux.count_calls("new-session"), 1);
    }

    #[test]
    fn ensure_session_replaces_dead_pane() {
        let mux = FakeMux::new();
        let mgr = SessionManager::new(mux.clone(), fast_settings());
        let ctx = Ctx::background();
        mgr.ensure_session(&ctx, "s", "codex").unwrap();
        mux.set_pane_dead(true);
        mgr.ensure_session(&ctx, "s", "codex").unwrap();
        assert_eq!(mux.count_calls("kill-session"), 1);
        assert_eq!(mux.count_calls("new-session"), 2);
    }

    #[test]
    fn wait_for_prompt_times_out_with_last_output() {
        let mux = FakeMux::new().never_ready();
        let mgr = SessionManager::new(mux.clone(), fast_settings());
        let ctx = Ctx::background();
        let target = mgr.ensure_session(&ctx, "s", "codex").unwrap();
        let err = mgr
            .wait_for_prompt(&ctx, &target, Duration::from_millis(60))
            .unwrap_err();
        assert!(err.to_string().contains("timeout waiting for codex prompt"));
        let turn_err = err.downcast_ref::<TurnError>().unwrap();
        assert!(turn_err.last_output().unwrap().contains("Booting"));
    }

    #[test]
    fn recover_kills_only_for_recoverable_errors() {
        let mux = FakeMux::new();
        let mgr = SessionManager::new(mux.clone(), fast_settings());
        mgr.ensure_session(&Ctx::background(), "s", "codex").unwrap();

        let benign = anyhow::anyhow!("critic output missing report");
        assert!(!mgr.recover("s", &benign, Duration::from_secs(4)));
        assert_eq!(mux.count_calls("kill-session"), 0);

        let wedged = anyhow::Error::new(TurnError::ReportTimeout {
            last_output: String::new(),
        });
        assert!(mgr.recover("s", &wedged, Duration::from_secs(4)));
        assert_eq!(mux.count_calls("kill-session"), 1);
    }
}
