//! Prompt rendering for actor, critic, and seed turns.

use minijinja::{AutoEscape, Environment};
use serde::Serialize;

use crate::config::LoopConfig;
use crate::report::{REPORT_BEGIN, REPORT_END};

const ACTOR_TEMPLATE: &str = include_str!("templates/actor.md.jinja");
const CRITIC_TEMPLATE: &str = include_str!("templates/critic.md.jinja");
const SEED_CRITIC_TEMPLATE: &str = include_str!("templates/seed-critic.md.jinja");

/// Report body the actor is asked to fill in.
pub const ACTOR_REPORT_SKELETON: &str = "\
Summary:
- ...
Changes:
- ...
Validation:
- ...
Open Questions:
- ...
Next Step for Critic:
- ...";

/// Report body the critic is asked to fill in.
pub const CRITIC_REPORT_SKELETON: &str = "\
Assessment:
- ...
Risks:
- ...
Required Fixes:
- ...
Verification Steps:
- ...
Next Actor Prompt:
- ...
Continue Loop: yes|no";

pub const NO_CRITIC_FEEDBACK: &str =
    "No prior critic feedback. Start with a concrete plan and execution report.";
pub const NO_CRITIC_REPORT: &str = "No prior critic report.";
const DEFAULT_FALLBACK_FEEDBACK: &str =
    "Provide one concrete, low-risk task for the actor and require a substantive work report.";

/// Lines in a critic report that ask the loop to stop.
const STOP_MARKERS: &[&str] = &[
    "continue loop: no",
    "continue_loop=no",
    "loop_continue=false",
    "stop loop: yes",
    "stop_loop=true",
    "#stop_loop",
];

#[derive(Debug, Serialize)]
struct PromptContext<'a> {
    dyad: &'a str,
    role: &'a str,
    department: &'a str,
    goal: &'a str,
    turn: u64,
    critic_feedback: &'a str,
    previous_critic_report: &'a str,
    actor_report: &'a str,
    seed_instruction: &'a str,
    begin_marker: &'static str,
    end_marker: &'static str,
    report_skeleton: &'static str,
}

/// Renders the three prompt kinds for one dyad.
pub struct PromptBuilder {
    env: Environment<'static>,
    dyad: String,
    role: String,
    department: String,
    goal: String,
}

impl PromptBuilder {
    pub fn new(dyad: &str, goal: &str, role: &str, department: &str) -> anyhow::Result<Self> {
        let mut env = Environment::new();
        env.set_auto_escape_callback(|_| AutoEscape::None);
        env.add_template("actor", ACTOR_TEMPLATE)?;
        env.add_template("critic", CRITIC_TEMPLATE)?;
        env.add_template("seed-critic", SEED_CRITIC_TEMPLATE)?;
        Ok(Self {
            env,
            dyad: dyad.to_string(),
            role: role.to_string(),
            department: department.to_string(),
            goal: goal.to_string(),
        })
    }

    pub fn from_config(config: &LoopConfig) -> anyhow::Result<Self> {
        Self::new(
            &config.dyad_name,
            &config.goal,
            &config.role,
            &config.department,
        )
    }

    fn context<'a>(&'a self, turn: u64, report_skeleton: &'static str) -> PromptContext<'a> {
        PromptContext {
            dyad: &self.dyad,
            role: &self.role,
            department: &self.department,
            goal: &self.goal,
            turn,
            critic_feedback: "",
            previous_critic_report: "",
            actor_report: "",
            seed_instruction: "",
            begin_marker: REPORT_BEGIN,
            end_marker: REPORT_END,
            report_skeleton,
        }
    }

    fn render(&self, name: &str, ctx: &PromptContext<'_>) -> anyhow::Result<String> {
        let rendered = self.env.get_template(name)?.render(ctx)?;
        Ok(rendered.trim().to_string())
    }

    /// Prompt for actor turn `turn`, applying the last critic report.
    pub fn actor_prompt(&self, turn: u64, last_critic_report: &str) -> anyhow::Result<String> {
        let feedback = non_empty_or(last_critic_report, NO_CRITIC_FEEDBACK);
        let ctx = PromptContext {
            critic_feedback: feedback,
            ..self.context(turn, ACTOR_REPORT_SKELETON)
        };
        self.render("actor", &ctx)
    }

    /// Prompt for critic turn `turn`, reviewing a fresh actor report.
    pub fn critic_prompt(
        &self,
        turn: u64,
        actor_report: &str,
        last_critic_report: &str,
    ) -> anyhow::Result<String> {
        let ctx = PromptContext {
            actor_report: actor_report.trim(),
            previous_critic_report: non_empty_or(last_critic_report, NO_CRITIC_REPORT),
            ..self.context(turn, CRITIC_REPORT_SKELETON)
        };
        self.render("critic", &ctx)
    }

    /// Prompt for the seed critic turn (turn 0).
    pub fn seed_critic_prompt(&self, seed_instruction: &str) -> anyhow::Result<String> {
        let ctx = PromptContext {
            seed_instruction: seed_instruction.trim(),
            ..self.context(0, CRITIC_REPORT_SKELETON)
        };
        self.render("seed-critic", &ctx)
    }
}

fn non_empty_or<'a>(value: &'a str, fallback: &'a str) -> &'a str {
    let trimmed = value.trim();
    if trimmed.is_empty() { fallback } else { trimmed }
}

/// Feedback handed to the first actor turn when the seed critic turn failed.
pub fn fallback_critic_feedback(seed: Option<&str>) -> String {
    seed.map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_FALLBACK_FEEDBACK)
        .to_string()
}

/// Whether a critic report asks the loop to stop.
pub fn critic_requests_stop(report: &str) -> bool {
    report.to_lowercase().lines().any(|line| {
        let line = line.trim();
        STOP_MARKERS.iter().any(|marker| line.contains(marker))
    })
}
