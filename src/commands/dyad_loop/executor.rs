//! Drives one interactive CLI turn: ready prompt, submit, wait for a fresh
//! work report, recover the session on failure.

use std::time::{Duration, Instant};

use tracing::{debug, info, instrument};

use crate::cancel::{Ctx, CtxError};
use crate::config::LoopConfig;
use crate::container::{ContainerRuntime, ensure_running};
use crate::error::{ExitError, TurnError};
use crate::report::{
    Member, clean_capture, extract_delimited_after, extract_fallback, last_end_offset,
    looks_like_placeholder, wrap_report,
};
use crate::subprocess::ctx_error;
use crate::terminal::session::session_name;
use crate::terminal::{Multiplexer, SessionManager, SessionSettings};

/// Enter presses allowed per turn, the original submit included.
const MAX_SUBMITS: u32 = 2;

/// The two calls the turn loop makes. Both return the raw output of the
/// turn, which always contains a delimited report on success.
pub trait TurnExecutor {
    fn actor_turn(&mut self, ctx: &Ctx, prompt: &str) -> anyhow::Result<String>;
    fn critic_turn(&mut self, ctx: &Ctx, prompt: &str) -> anyhow::Result<String>;
}

/// Timing and parsing knobs for [`CodexTurnExecutor`].
#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    pub strict_report: bool,
    pub turn_timeout: Duration,
    pub ready_timeout: Duration,
    /// Pause between pasting the prompt and pressing enter.
    pub submit_settle: Duration,
    /// Quiet time at a ready prompt before enter is pressed again.
    pub resubmit_after: Duration,
    /// Budget for killing a wedged session.
    pub recover_timeout: Duration,
    pub session: SessionSettings,
}

impl ExecutorSettings {
    pub fn from_config(cfg: &LoopConfig) -> Self {
        Self {
            strict_report: cfg.strict_report,
            turn_timeout: cfg.turn_timeout,
            ready_timeout: cfg.ready_timeout(),
            submit_settle: Duration::from_millis(150),
            resubmit_after: Duration::from_secs(4),
            recover_timeout: Duration::from_secs(4),
            session: SessionSettings {
                prompt_lines: cfg.prompt_lines,
                allow_mcp_startup: cfg.allow_mcp_startup,
                capture_mode: cfg.capture_mode,
                capture_lines: cfg.capture_lines,
                poll_interval: Duration::from_millis(350),
            },
        }
    }
}

/// [`TurnExecutor`] that types into interactive CLIs running in
/// multiplexer sessions: the critic's locally, the actor's in its container.
pub struct CodexTurnExecutor<M, R> {
    actor: SessionManager<M>,
    critic: SessionManager<M>,
    runtime: R,
    actor_container: String,
    actor_session: String,
    critic_session: String,
    start_cmd: String,
    settings: ExecutorSettings,
}

impl<M: Multiplexer, R: ContainerRuntime> CodexTurnExecutor<M, R> {
    /// Fails when the configured start command cannot host an interactive
    /// session.
    pub fn new(
        cfg: &LoopConfig,
        settings: ExecutorSettings,
        actor_mux: M,
        critic_mux: M,
        runtime: R,
    ) -> anyhow::Result<Self> {
        let start_cmd = cfg.start_command()?;
        Ok(Self {
            actor: SessionManager::new(actor_mux, settings.session.clone()),
            critic: SessionManager::new(critic_mux, settings.session.clone()),
            runtime,
            actor_container: cfg.actor_container.clone(),
            actor_session: session_name(&cfg.dyad_name, Member::Actor.as_str()),
            critic_session: session_name(&cfg.dyad_name, Member::Critic.as_str()),
            start_cmd,
            settings,
        })
    }

    /// Both multiplexers must answer before the first turn.
    pub fn preflight(&self, ctx: &Ctx) -> anyhow::Result<()> {
        let critic = self
            .critic
            .mux()
            .probe(ctx)
            .map_err(|e| ExitError::Preflight(format!("local tmux unavailable: {e:#}")))?;
        let actor = self.actor.mux().probe(ctx).map_err(|e| {
            ExitError::Preflight(format!(
                "tmux unavailable in {}: {e:#}",
                self.actor_container
            ))
        })?;
        debug!(critic = %critic.trim(), actor = %actor.trim(), "tmux preflight ok");
        Ok(())
    }

    pub fn session(&self, member: Member) -> &str {
        match member {
            Member::Actor => &self.actor_session,
            Member::Critic => &self.critic_session,
        }
    }

    fn manager(&self, member: Member) -> &SessionManager<M> {
        match member {
            Member::Actor => &self.actor,
            Member::Critic => &self.critic,
        }
    }

    #[instrument(skip_all, fields(%member))]
    fn run_turn(&self, ctx: &Ctx, member: Member, prompt: &str) -> anyhow::Result<String> {
        let result = self.drive(ctx, member, prompt);
        if let Err(e) = &result {
            let session = self.session(member);
            if self
                .manager(member)
                .recover(session, e, self.settings.recover_timeout)
            {
                info!(session, "session will be recreated on the next attempt");
            }
        }
        result
    }

    fn drive(&self, ctx: &Ctx, member: Member, prompt: &str) -> anyhow::Result<String> {
        let mgr = self.manager(member);
        let session = self.session(member);
        if member == Member::Actor {
            ensure_running(&self.runtime, ctx, &self.actor_container)?;
        }
        let target = mgr.ensure_session(ctx, session, &self.start_cmd)?;
        let ready = mgr.wait_for_prompt(ctx, &target, self.settings.ready_timeout)?;
        let baseline = last_end_offset(&clean_capture(&ready));

        let prompt = normalize_prompt(prompt);
        mgr.submit(ctx, &target, &prompt, self.settings.submit_settle)?;
        debug!(session, chars = prompt.len(), ?baseline, "prompt submitted");

        self.wait_for_turn_completion(ctx, mgr, &target, member, baseline)
    }

    /// Poll the pane until a report newer than `baseline` shows up.
    fn wait_for_turn_completion(
        &self,
        ctx: &Ctx,
        mgr: &SessionManager<M>,
        target: &str,
        member: Member,
        baseline: Option<usize>,
    ) -> anyhow::Result<String> {
        let turn_ctx = ctx.with_timeout(self.settings.turn_timeout);
        let started = Instant::now();
        let mut last_output = String::new();
        let mut submits = 1;
        let mut last_submit = started;

        loop {
            match mgr.capture(&turn_ctx, target) {
                Ok(raw) => {
                    let clean = clean_capture(&raw);
                    if extract_delimited_after(&clean, baseline)
                        .is_some_and(|body| !looks_like_placeholder(&body, member))
                    {
                        let elapsed_ms = millis(started.elapsed());
                        info!(pane = target, elapsed_ms, "report received");
                        return Ok(raw);
                    }
                    if !self.settings.strict_report
                        && let Some(body) = extract_fallback(&clean)
                            .filter(|body| !looks_like_placeholder(body, member))
                    {
                        info!(pane = target, "accepted undelimited report");
                        return Ok(wrap_report(&clean, &body));
                    }
                    if mgr.is_prompt_ready(&clean) {
                        if self.settings.strict_report {
                            return Err(TurnError::MissingMarkers { last_output: raw }.into());
                        }
                        let idle = last_submit.elapsed() > self.settings.resubmit_after;
                        if submits < MAX_SUBMITS && idle {
                            debug!(pane = target, "prompt idle without a report, pressing enter");
                            mgr.resubmit(&turn_ctx, target)?;
                            submits += 1;
                            last_submit = Instant::now();
                        }
                    }
                    if !raw.trim().is_empty() {
                        last_output = raw;
                    }
                }
                Err(e) => match ctx_error(&e) {
                    Some(CtxError::Cancelled) => return Err(e),
                    Some(CtxError::DeadlineExceeded) => break,
                    None => {
                        debug!(pane = target, error = %e, "capture failed while waiting for report");
                    }
                },
            }
            match turn_ctx.sleep(mgr.settings().poll_interval) {
                Ok(()) => {}
                Err(CtxError::DeadlineExceeded) => break,
                Err(e) => return Err(e.into()),
            }
        }
        Err(TurnError::ReportTimeout { last_output }.into())
    }
}

impl<M: Multiplexer, R: ContainerRuntime> TurnExecutor for CodexTurnExecutor<M, R> {
    fn actor_turn(&mut self, ctx: &Ctx, prompt: &str) -> anyhow::Result<String> {
        self.run_turn(ctx, Member::Actor, prompt)
    }

    fn critic_turn(&mut self, ctx: &Ctx, prompt: &str) -> anyhow::Result<String> {
        self.run_turn(ctx, Member::Critic, prompt)
    }
}

/// Flatten a prompt to one line so the CLI receives it as a single input.
pub fn normalize_prompt(prompt: &str) -> String {
    prompt.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
