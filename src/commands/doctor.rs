use std::io::IsTerminal;

use clap::Args;
use serde::{Deserialize, Serialize};

use crate::cancel::Ctx;
use crate::config::LoopConfig;
use crate::container::{ContainerRuntime, DockerCli};
use crate::error::ExitError;
use crate::subprocess::Tool;
use crate::terminal::{Multiplexer, TmuxRunner};

use super::DyadSelector;

#[derive(Debug, Args)]
pub struct DoctorArgs {
    #[command(flatten)]
    pub dyad: DyadSelector,
    /// Output format
    #[arg(long, value_enum)]
    pub format: Option<OutputFormat>,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum OutputFormat {
    Pretty,
    Text,
    Json,
}

impl OutputFormat {
    /// Pretty on a terminal, text otherwise.
    pub fn or_detect(format: Option<Self>) -> Self {
        format.unwrap_or_else(|| {
            if std::io::stdout().is_terminal() {
                Self::Pretty
            } else {
                Self::Text
            }
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DoctorReport {
    pub config: ConfigStatus,
    pub tools: Vec<ToolStatus>,
    pub checks: Vec<CheckStatus>,
    pub issues: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ConfigStatus {
    pub dyad: String,
    pub member: String,
    pub enabled: bool,
    pub actor_container: String,
    pub state_dir: String,
    pub strict_report: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ToolStatus {
    pub name: String,
    pub version: Option<String>,
    pub present: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CheckStatus {
    pub name: String,
    pub ok: bool,
    pub detail: String,
}

impl DoctorReport {
    fn check(&mut self, name: &str, result: anyhow::Result<String>) {
        let (ok, detail) = match result {
            Ok(detail) => (true, detail),
            Err(e) => {
                self.issues.push(format!("{name}: {e:#}"));
                (false, format!("{e:#}"))
            }
        };
        self.checks.push(CheckStatus {
            name: name.to_string(),
            ok,
            detail,
        });
    }
}

impl DoctorArgs {
    pub fn execute(&self, ctx: &Ctx) -> anyhow::Result<()> {
        let cfg = self.dyad.resolve()?;
        let format = OutputFormat::or_detect(self.format);
        let report = diagnose(ctx, &cfg);
        let issue_count = report.issues.len();

        match format {
            OutputFormat::Pretty => print_pretty(&report),
            OutputFormat::Text => print_text(&report),
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        }

        if issue_count > 0 {
            return Err(ExitError::new(
                u8::try_from(issue_count.min(125)).unwrap_or(125),
                format!("{issue_count} issue(s) found"),
            )
            .into());
        }
        Ok(())
    }
}

fn diagnose(ctx: &Ctx, cfg: &LoopConfig) -> DoctorReport {
    let mut report = DoctorReport {
        config: ConfigStatus {
            dyad: cfg.dyad_name.clone(),
            member: cfg.member.to_string(),
            enabled: cfg.enabled,
            actor_container: cfg.actor_container.clone(),
            state_dir: cfg.state_dir.display().to_string(),
            strict_report: cfg.strict_report,
        },
        tools: vec![],
        checks: vec![],
        issues: vec![],
    };

    for (name, flag) in [("tmux", "-V"), ("docker", "--version")] {
        match Tool::new(name).arg(flag).run_ok_ctx(ctx) {
            Ok(output) => report.tools.push(ToolStatus {
                name: name.to_string(),
                version: Some(output.stdout.trim().to_string()),
                present: true,
            }),
            Err(_) => {
                report.tools.push(ToolStatus {
                    name: name.to_string(),
                    version: None,
                    present: false,
                });
                report.issues.push(format!("Tool not found: {name}"));
            }
        }
    }

    report.check(
        "start command",
        cfg.start_command().map(|cmd| {
            if cmd.len() > 60 {
                format!("{}...", &cmd[..cmd.char_indices().nth(57).map_or(cmd.len(), |(i, _)| i)])
            } else {
                cmd
            }
        }),
    );
    report.check("state dir", check_state_dir(cfg));

    if cfg.actor_container.trim().is_empty() {
        if cfg.enabled {
            report.issues.push("ACTOR_CONTAINER is not set".to_string());
        }
    } else {
        let docker = DockerCli::default();
        report.check(
            "actor container",
            docker
                .inspect(ctx, &cfg.actor_container)
                .map(|state| if state.running { "running" } else { "stopped" }.to_string()),
        );
        report.check(
            "tmux in actor container",
            TmuxRunner::in_container(&cfg.actor_container).and_then(|mux| mux.probe(ctx)),
        );
    }
    report
}

fn check_state_dir(cfg: &LoopConfig) -> anyhow::Result<String> {
    std::fs::create_dir_all(&cfg.state_dir)?;
    tempfile::NamedTempFile::new_in(&cfg.state_dir)?;
    Ok("writable".to_string())
}

fn print_pretty(report: &DoctorReport) {
    println!("=== Dyad Doctor ===\n");
    println!("Dyad:      {}", report.config.dyad);
    println!("Member:    {}", report.config.member);
    println!("Enabled:   {}", report.config.enabled);
    println!("Container: {}", report.config.actor_container);
    println!("State dir: {}", report.config.state_dir);
    println!();

    println!("Tools:");
    for tool in &report.tools {
        match (&tool.version, tool.present) {
            (Some(version), true) => println!("  ✓ {}: {version}", tool.name),
            _ => println!("  ✗ {}: NOT FOUND", tool.name),
        }
    }

    println!("\nChecks:");
    for check in &report.checks {
        let mark = if check.ok { "✓" } else { "✗" };
        println!("  {mark} {}: {}", check.name, check.detail);
    }

    if report.issues.is_empty() {
        println!("\n✓ No issues found");
    } else {
        println!("\nIssues ({}):", report.issues.len());
        for issue in &report.issues {
            println!("  • {issue}");
        }
    }
}

fn print_text(report: &DoctorReport) {
    println!(
        "dyad-doctor  dyad={}  member={}  enabled={}  container={}",
        report.config.dyad,
        report.config.member,
        report.config.enabled,
        report.config.actor_container
    );
    for tool in &report.tools {
        let status = match &tool.version {
            Some(version) if tool.present => format!("ok  {version}"),
            _ => "missing".to_string(),
        };
        println!("tool  {}  {status}", tool.name);
    }
    for check in &report.checks {
        let status = if check.ok { "ok" } else { "fail" };
        println!("check  {}  {status}  {}", check.name, check.detail);
    }
    if !report.issues.is_empty() {
        println!("issues  count={}", report.issues.len());
        for issue in &report.issues {
            println!("issue  {issue}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_checks_become_issues() {
        let mut report = DoctorReport {
            config: ConfigStatus {
                dyad: "a".into(),
                member: "critic".into(),
                enabled: true,
                actor_container: String::new(),
                state_dir: "/tmp".into(),
                strict_report: true,
            },
            tools: vec![],
            checks: vec![],
            issues: vec![],
        };
        report.check("fine", Ok("ok".into()));
        report.check("broken", Err(anyhow::anyhow!("no such container: x")));
        assert_eq!(report.checks.len(), 2);
        assert!(report.checks[0].ok);
        assert!(!report.checks[1].ok);
        assert_eq!(report.issues, vec!["broken: no such container: x".to_string()]);
    }

    #[test]
    fn state_dir_check_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = LoopConfig {
            state_dir: dir.path().join("nested/state"),
            ..LoopConfig::default()
        };
        assert_eq!(check_state_dir(&cfg).unwrap(), "writable");
        assert!(cfg.state_dir.is_dir());
    }

    #[test]
    fn bad_start_command_is_an_issue() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = LoopConfig {
            state_dir: dir.path().to_path_buf(),
            codex_start_cmd: Some("codex exec".into()),
            ..LoopConfig::default()
        };
        let report = diagnose(&Ctx::background(), &cfg);
        assert!(report.issues.iter().any(|i| i.starts_with("start command")));
    }
}
