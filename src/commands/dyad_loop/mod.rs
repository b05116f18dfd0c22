//! The dyad supervisor: seed turn, alternating actor/critic turns, retries,
//! persistence, and pause/stop control.

pub mod control;
pub mod executor;
pub mod retry;
pub mod state;

use chrono::Utc;
use clap::Args;
use tracing::{info, info_span, warn};

use crate::cancel::Ctx;
use crate::config::LoopConfig;
use crate::container::{ContainerRuntime, DockerCli};
use crate::error::ExitError;
use crate::report::{Member, parse_turn_output};
use crate::template::{PromptBuilder, critic_requests_stop, fallback_critic_feedback};
use crate::terminal::{Multiplexer, TmuxRunner};

use super::DyadSelector;

use control::{ControlWatcher, LoopControl};
use executor::{CodexTurnExecutor, ExecutorSettings, TurnExecutor};
use retry::{RetryPolicy, retry_backoff};
use state::{LoopState, StateStore};

#[derive(Debug, Args)]
pub struct LoopArgs {
    #[command(flatten)]
    pub dyad: DyadSelector,
    /// Stop after this many turns (0 = unbounded)
    #[arg(long)]
    pub max_turns: Option<u64>,
    /// Skip the startup delay
    #[arg(long)]
    pub no_delay: bool,
}

impl LoopArgs {
    pub fn execute(&self, ctx: &Ctx) -> anyhow::Result<()> {
        let mut cfg = self.dyad.resolve()?;
        if let Some(max_turns) = self.max_turns {
            cfg.max_turns = max_turns;
        }
        if self.no_delay {
            cfg.startup_delay = std::time::Duration::ZERO;
        }
        cfg.validate()?;
        if !cfg.enabled {
            info!(dyad = %cfg.dyad_name, member = %cfg.member, "dyad loop disabled");
            return Ok(());
        }
        let actor_mux = TmuxRunner::in_container(&cfg.actor_container)?;
        run_supervisor(ctx, &cfg, DockerCli::default(), actor_mux, TmuxRunner::local())
    }
}

/// Run one dyad until it is stopped, cancelled, or out of turns.
///
/// Errors only for failures that make the loop impossible to run: an
/// unusable state dir, an unknown actor container, a missing multiplexer, or
/// a corrupt state file.
pub fn run_supervisor<M: Multiplexer, R: ContainerRuntime>(
    ctx: &Ctx,
    cfg: &LoopConfig,
    runtime: R,
    actor_mux: M,
    critic_mux: M,
) -> anyhow::Result<()> {
    let _span = info_span!("dyad", dyad = %cfg.dyad_name).entered();
    let store = StateStore::new(&cfg.state_dir, cfg.host_owner);
    store
        .prepare()
        .map_err(|e| ExitError::Preflight(format!("state dir: {e:#}")))?;

    if !cfg.startup_delay.is_zero() && ctx.sleep(cfg.startup_delay).is_err() {
        return Ok(());
    }

    runtime.inspect(ctx, &cfg.actor_container).map_err(|e| {
        ExitError::Preflight(format!("actor container {}: {e:#}", cfg.actor_container))
    })?;

    let executor = CodexTurnExecutor::new(
        cfg,
        ExecutorSettings::from_config(cfg),
        actor_mux,
        critic_mux,
        runtime,
    )?;
    executor.preflight(ctx)?;

    info!(
        actor_container = %cfg.actor_container,
        state_dir = %cfg.state_dir.display(),
        strict_report = cfg.strict_report,
        max_turns = cfg.max_turns,
        "dyad loop starting"
    );
    TurnLoop::new(cfg.clone(), executor)?.run(ctx)
}

/// How a completed turn left the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    Continue,
    /// The critic asked to stop.
    StopRequested,
}

/// Raw output of a step plus the report accepted from it.
#[derive(Debug, Clone)]
struct StepOutput {
    raw: String,
    report: String,
}

/// Turn state machine over any [`TurnExecutor`].
pub struct TurnLoop<E> {
    cfg: LoopConfig,
    executor: E,
    prompts: PromptBuilder,
    store: StateStore,
    retry: RetryPolicy,
}

impl<E: TurnExecutor> TurnLoop<E> {
    pub fn new(cfg: LoopConfig, executor: E) -> anyhow::Result<Self> {
        let prompts = PromptBuilder::from_config(&cfg)?;
        let store = StateStore::new(&cfg.state_dir, cfg.host_owner);
        let retry = RetryPolicy {
            retry_max: cfg.retry_max,
            turn_timeout: cfg.turn_timeout,
            retry_base: cfg.retry_base,
        };
        Ok(Self {
            cfg,
            executor,
            prompts,
            store,
            retry,
        })
    }

    pub const fn executor(&self) -> &E {
        &self.executor
    }

    /// Load state, run the seed turn if needed, then alternate turns until
    /// stopped. Returns `Ok` on every clean shutdown.
    pub fn run(&mut self, ctx: &Ctx) -> anyhow::Result<()> {
        self.store.prepare()?;
        let mut state = self.store.load()?;
        info!(turn = state.turn, "loaded loop state");

        if self.seed(ctx, &mut state) == TurnOutcome::StopRequested {
            info!("critic requested stop during seed turn");
            return Ok(());
        }

        let mut watcher = ControlWatcher::new(self.store.dir());
        let mut turn = state.turn + 1;
        let mut failures: u32 = 0;
        while !ctx.is_done() {
            match watcher.check() {
                LoopControl::Stop => {
                    info!(turn, "stop file present, exiting");
                    return Ok(());
                }
                LoopControl::Pause => {
                    if ctx.sleep(self.cfg.pause_poll).is_err() {
                        break;
                    }
                    continue;
                }
                LoopControl::Run => {}
            }
            if self.cfg.max_turns > 0 && turn > self.cfg.max_turns {
                info!(max_turns = self.cfg.max_turns, "max turns reached");
                return Ok(());
            }

            let _span = info_span!("turn", turn).entered();
            match self.run_single_turn(ctx, turn, &mut state) {
                Ok(TurnOutcome::StopRequested) => {
                    self.persist(&state);
                    info!("critic requested stop");
                    return Ok(());
                }
                Ok(TurnOutcome::Continue) => {
                    self.persist(&state);
                    failures = 0;
                    turn += 1;
                    if ctx.sleep(self.cfg.sleep_interval).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    if ctx.is_done() {
                        break;
                    }
                    failures += 1;
                    let backoff = retry_backoff(self.cfg.retry_base, failures);
                    warn!(
                        failures,
                        backoff_ms = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX),
                        error = %format!("{e:#}"),
                        "turn failed"
                    );
                    if ctx.sleep(backoff).is_err() {
                        break;
                    }
                }
            }
        }
        info!(turn, "loop cancelled");
        Ok(())
    }

    /// Run the seed critic turn when there is a seed prompt and no critic
    /// report yet. A failed seed falls back to canned feedback.
    fn seed(&mut self, ctx: &Ctx, state: &mut LoopState) -> TurnOutcome {
        if !state.last_critic_report.trim().is_empty() {
            return TurnOutcome::Continue;
        }
        let Some(seed) = self.cfg.seed_critic_prompt.clone() else {
            return TurnOutcome::Continue;
        };
        let _span = info_span!("turn", turn = 0).entered();
        let result = self
            .prompts
            .seed_critic_prompt(&seed)
            .and_then(|prompt| Ok((self.run_step(ctx, Member::Critic, &prompt)?, prompt)));
        match result {
            Ok((step, prompt)) => {
                self.store
                    .write_turn_artifacts(0, Member::Critic, &prompt, &step.raw, &step.report);
                state.last_critic_report = step.report;
                state.updated_at = Some(Utc::now());
                self.persist(state);
                info!("seed turn complete");
                if critic_requests_stop(&state.last_critic_report) {
                    return TurnOutcome::StopRequested;
                }
            }
            Err(e) => {
                warn!(error = %format!("{e:#}"), "seed turn failed, using fallback feedback");
                state.last_critic_report = fallback_critic_feedback(Some(&seed));
                state.updated_at = Some(Utc::now());
                self.persist(state);
            }
        }
        TurnOutcome::Continue
    }

    /// One actor turn followed by one critic turn. `state` is updated only
    /// when both succeed.
    pub fn run_single_turn(
        &mut self,
        ctx: &Ctx,
        turn: u64,
        state: &mut LoopState,
    ) -> anyhow::Result<TurnOutcome> {
        let actor_prompt = self.prompts.actor_prompt(turn, &state.last_critic_report)?;
        let actor = self.run_step(ctx, Member::Actor, &actor_prompt)?;
        self.store
            .write_turn_artifacts(turn, Member::Actor, &actor_prompt, &actor.raw, &actor.report);

        let critic_prompt =
            self.prompts
                .critic_prompt(turn, &actor.report, &state.last_critic_report)?;
        let critic = self.run_step(ctx, Member::Critic, &critic_prompt)?;
        self.store.write_turn_artifacts(
            turn,
            Member::Critic,
            &critic_prompt,
            &critic.raw,
            &critic.report,
        );

        state.turn = turn;
        state.last_actor_report = actor.report;
        state.last_critic_report = critic.report;
        state.updated_at = Some(Utc::now());
        info!(turn, "turn complete");

        if critic_requests_stop(&state.last_critic_report) {
            Ok(TurnOutcome::StopRequested)
        } else {
            Ok(TurnOutcome::Continue)
        }
    }

    fn run_step(&mut self, ctx: &Ctx, member: Member, prompt: &str) -> anyhow::Result<StepOutput> {
        let strict = self.cfg.strict_report;
        let executor = &mut self.executor;
        self.retry.run(ctx, member.as_str(), |step_ctx| {
            let raw = match member {
                Member::Actor => executor.actor_turn(step_ctx, prompt)?,
                Member::Critic => executor.critic_turn(step_ctx, prompt)?,
            };
            let report = parse_turn_output(&raw, member, strict)?;
            Ok(StepOutput { raw, report })
        })
    }

    fn persist(&self, state: &LoopState) {
        if let Err(e) = self.store.save(state) {
            warn!(turn = state.turn, error = %format!("{e:#}"), "saving loop state failed");
        }
    }
}
