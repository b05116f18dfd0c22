use chrono::{DateTime, Utc};
use clap::Args;
use serde::{Deserialize, Serialize};

use crate::config::LoopConfig;
use crate::report::Member;
use crate::terminal::session::session_name;

use super::DyadSelector;
use super::doctor::OutputFormat;
use super::dyad_loop::control::{LoopControl, read_loop_control};
use super::dyad_loop::state::StateStore;

const EXCERPT_LINES: usize = 6;

#[derive(Debug, Args)]
pub struct StatusArgs {
    #[command(flatten)]
    pub dyad: DyadSelector,
    /// Output format
    #[arg(long, value_enum)]
    pub format: Option<OutputFormat>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusReport {
    pub dyad: String,
    pub member: String,
    pub enabled: bool,
    pub state_dir: String,
    pub control: String,
    pub turn: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    pub last_actor_report: String,
    pub last_critic_report: String,
    pub artifacts: usize,
    pub sessions: Sessions,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Sessions {
    pub actor: String,
    pub critic: String,
}

impl StatusArgs {
    pub fn execute(&self) -> anyhow::Result<()> {
        let cfg = self.dyad.resolve()?;
        let format = OutputFormat::or_detect(self.format);
        let report = collect(&cfg)?;

        match format {
            OutputFormat::Pretty => print_pretty(&report),
            OutputFormat::Text => print_text(&report),
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        }
        Ok(())
    }
}

fn collect(cfg: &LoopConfig) -> anyhow::Result<StatusReport> {
    let store = StateStore::new(&cfg.state_dir, None);
    let state = store.load()?;
    let artifacts = std::fs::read_dir(store.reports_dir())
        .map(|entries| entries.filter_map(Result::ok).count())
        .unwrap_or(0);
    let control = match read_loop_control(&cfg.state_dir) {
        LoopControl::Run => "run",
        LoopControl::Pause => "pause",
        LoopControl::Stop => "stop",
    };

    Ok(StatusReport {
        dyad: cfg.dyad_name.clone(),
        member: cfg.member.to_string(),
        enabled: cfg.enabled,
        state_dir: cfg.state_dir.display().to_string(),
        control: control.to_string(),
        turn: state.turn,
        updated_at: state.updated_at,
        last_actor_report: state.last_actor_report,
        last_critic_report: state.last_critic_report,
        artifacts,
        sessions: Sessions {
            actor: session_name(&cfg.dyad_name, Member::Actor.as_str()),
            critic: session_name(&cfg.dyad_name, Member::Critic.as_str()),
        },
    })
}

fn excerpt(report: &str) -> Vec<&str> {
    report
        .lines()
        .map(str::trim_end)
        .filter(|l| !l.trim().is_empty())
        .take(EXCERPT_LINES)
        .collect()
}

fn print_pretty(report: &StatusReport) {
    println!("=== Dyad {} ===\n", report.dyad);
    println!("Member:    {}", report.member);
    println!("Enabled:   {}", report.enabled);
    println!("State dir: {}", report.state_dir);
    println!("Control:   {}", report.control);
    println!("Turn:      {}", report.turn);
    if let Some(at) = report.updated_at {
        println!("Updated:   {}", at.to_rfc3339());
    }
    println!("Artifacts: {}", report.artifacts);
    println!(
        "Sessions:  {} / {}",
        report.sessions.actor, report.sessions.critic
    );

    for (title, body) in [
        ("Last actor report", &report.last_actor_report),
        ("Last critic report", &report.last_critic_report),
    ] {
        println!("\n{title}:");
        if body.trim().is_empty() {
            println!("  (none)");
            continue;
        }
        for line in excerpt(body) {
            println!("  {line}");
        }
    }
}

fn print_text(report: &StatusReport) {
    println!(
        "dyad-status  dyad={}  member={}  enabled={}  control={}  turn={}  artifacts={}",
        report.dyad, report.member, report.enabled, report.control, report.turn, report.artifacts
    );
    if let Some(at) = report.updated_at {
        println!("updated  {}", at.to_rfc3339());
    }
    println!("state  {}", report.state_dir);
    println!(
        "sessions  actor={}  critic={}",
        report.sessions.actor, report.sessions.critic
    );
    for (label, body) in [
        ("actor", &report.last_actor_report),
        ("critic", &report.last_critic_report),
    ] {
        for line in excerpt(body) {
            println!("{label}  {line}");
        }
    }
}
