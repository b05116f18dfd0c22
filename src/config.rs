//! Loop configuration: defaults, then an optional TOML file, then environment.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ExitError;
use crate::report::Member;
use crate::terminal::CaptureMode;

/// Environment variable that points at a config file.
pub const CONFIG_ENV: &str = "DYAD_CONFIG";
pub const CONFIG_FILE_NAME: &str = "loop.toml";

pub const DEFAULT_GOAL: &str =
    "Continuously improve the task outcome through actor execution and critic review.";

pub const MIN_CAPTURE_LINES: usize = 500;
pub const MAX_CAPTURE_LINES: usize = 50_000;
const DEFAULT_CAPTURE_LINES: usize = 8000;
const DEFAULT_PROMPT_LINES: usize = 3;
const DEFAULT_PAUSE_POLL: Duration = Duration::from_secs(5);

/// Launches the interactive CLI inside its tmux pane.
pub const DEFAULT_START_CMD: &str = "export TERM=xterm-256color COLORTERM=truecolor COLUMNS=160 LINES=60 HOME=/root CODEX_HOME=/root/.codex; cd /workspace 2>/dev/null || true; codex --dangerously-bypass-approvals-and-sandbox";

/// Owner applied to files written under the state dir.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HostOwner {
    pub uid: u32,
    pub gid: u32,
}

/// Settings for one dyad supervisor run. Immutable once resolved.
#[derive(Debug, Clone, Serialize)]
pub struct LoopConfig {
    pub enabled: bool,
    pub dyad_name: String,
    pub member: Member,
    pub role: String,
    pub department: String,
    pub actor_container: String,
    pub goal: String,
    pub state_dir: PathBuf,
    pub sleep_interval: Duration,
    pub startup_delay: Duration,
    pub turn_timeout: Duration,
    pub retry_base: Duration,
    pub pause_poll: Duration,
    /// 0 means unbounded.
    pub max_turns: u64,
    pub retry_max: u32,
    pub seed_critic_prompt: Option<String>,
    pub prompt_lines: usize,
    pub allow_mcp_startup: bool,
    pub capture_mode: CaptureMode,
    pub capture_lines: usize,
    pub strict_report: bool,
    pub codex_start_cmd: Option<String>,
    pub host_owner: Option<HostOwner>,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            dyad_name: "unknown".to_string(),
            member: Member::Critic,
            role: String::new(),
            department: String::new(),
            actor_container: String::new(),
            goal: DEFAULT_GOAL.to_string(),
            state_dir: default_state_dir("unknown"),
            sleep_interval: Duration::from_secs(20),
            startup_delay: Duration::from_secs(2),
            turn_timeout: Duration::from_secs(900),
            retry_base: Duration::from_secs(2),
            pause_poll: DEFAULT_PAUSE_POLL,
            max_turns: 0,
            retry_max: 3,
            seed_critic_prompt: None,
            prompt_lines: DEFAULT_PROMPT_LINES,
            allow_mcp_startup: false,
            capture_mode: CaptureMode::Primary,
            capture_lines: DEFAULT_CAPTURE_LINES,
            strict_report: true,
            codex_start_cmd: None,
            host_owner: None,
        }
    }
}

/// On-disk form of the config. Every field is optional; environment
/// variables override whatever is set here.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigFile {
    /// Dyad name, used in prompts and session names.
    pub dyad: Option<String>,
    /// Which member this process runs as. Only the critic drives the loop.
    pub member: Option<Member>,
    pub role: Option<String>,
    pub department: Option<String>,
    /// Container that hosts the actor CLI.
    pub actor_container: Option<String>,
    /// Run the loop. Defaults to on for a critic with an actor container.
    pub enabled: Option<bool>,
    pub goal: Option<String>,
    pub state_dir: Option<PathBuf>,
    pub sleep_seconds: Option<u64>,
    pub startup_delay_seconds: Option<u64>,
    pub turn_timeout_seconds: Option<u64>,
    pub retry_base_seconds: Option<u64>,
    pub pause_poll_seconds: Option<u64>,
    pub max_turns: Option<u64>,
    pub retry_max: Option<u32>,
    pub seed_critic_prompt: Option<String>,
    /// Trailing non-empty lines (times four) scanned for a ready prompt.
    pub prompt_lines: Option<usize>,
    pub allow_mcp_startup: Option<bool>,
    pub capture_mode: Option<CaptureMode>,
    /// History window for pane captures, clamped to 500..=50000.
    pub capture_lines: Option<usize>,
    /// Require delimited report markers.
    pub strict_report: Option<bool>,
    pub codex_start_cmd: Option<String>,
    pub host_uid: Option<u32>,
    pub host_gid: Option<u32>,
}

impl ConfigFile {
    /// Load a config file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::parse_toml(&contents)
            .with_context(|| format!("loading {}", path.display()))
    }

    /// Parse config from a TOML string.
    pub fn parse_toml(toml_str: &str) -> anyhow::Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| ExitError::Config(format!("invalid {CONFIG_FILE_NAME}: {e}")).into())
    }
}

/// Default location of the config file: `$DYAD_CONFIG`, else
/// `<config dir>/dyad/loop.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var(CONFIG_ENV)
        && !path.trim().is_empty()
    {
        return Some(PathBuf::from(path));
    }
    dirs::config_dir().map(|dir| dir.join("dyad").join(CONFIG_FILE_NAME))
}

pub fn default_state_dir(dyad: &str) -> PathBuf {
    PathBuf::from("/workspace/.si/dyad").join(dyad)
}

/// Typed reads over an environment-like lookup. Unparsable values are
/// reported and ignored.
struct EnvReader<'a> {
    lookup: &'a dyn Fn(&str) -> Option<String>,
}

impl EnvReader<'_> {
    fn string(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parsed<T: std::str::FromStr>(&self, key: &str) -> Option<T> {
        let raw = self.string(key)?;
        match raw.parse() {
            Ok(v) => Some(v),
            Err(_) => {
                warn!(key, value = %raw, "ignoring unparsable value");
                None
            }
        }
    }

    fn bool(&self, key: &str) -> Option<bool> {
        let raw = self.string(key)?;
        let parsed = parse_bool(&raw);
        if parsed.is_none() {
            warn!(key, value = %raw, "ignoring unparsable boolean");
        }
        parsed
    }
}

/// Accepts `1/true/yes/on` and `0/false/no/off`, case-insensitively.
pub fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

impl LoopConfig {
    /// Resolve from the process environment and an optional config file.
    ///
    /// `path` wins over [`default_config_path`]; a missing default file is
    /// fine, a missing explicit one is an error.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let file = match path {
            Some(p) => ConfigFile::load(p)?,
            None => match default_config_path() {
                Some(p) if p.exists() => ConfigFile::load(&p)?,
                _ => ConfigFile::default(),
            },
        };
        Ok(Self::resolve(&file, &|key| std::env::var(key).ok()))
    }

    /// Layer `file` and then `env` over the defaults and normalize.
    pub fn resolve(file: &ConfigFile, env: &dyn Fn(&str) -> Option<String>) -> Self {
        let env = EnvReader { lookup: env };
        let mut cfg = Self::default();

        cfg.dyad_name = env
            .string("DYAD_NAME")
            .or_else(|| file.dyad.clone())
            .unwrap_or(cfg.dyad_name);
        cfg.member = match env.string("DYAD_MEMBER") {
            Some(raw) => match raw.to_ascii_lowercase().as_str() {
                "actor" => Member::Actor,
                "critic" => Member::Critic,
                _ => {
                    warn!(value = %raw, "unknown DYAD_MEMBER, assuming critic");
                    Member::Critic
                }
            },
            None => file.member.unwrap_or(cfg.member),
        };
        cfg.role = env.string("ROLE").or_else(|| file.role.clone()).unwrap_or_default();
        cfg.department = env
            .string("DEPARTMENT")
            .or_else(|| file.department.clone())
            .unwrap_or_default();
        cfg.actor_container = env
            .string("ACTOR_CONTAINER")
            .or_else(|| file.actor_container.clone())
            .unwrap_or_default();
        cfg.enabled = env
            .bool("DYAD_LOOP_ENABLED")
            .or(file.enabled)
            .unwrap_or(cfg.member == Member::Critic && !cfg.actor_container.is_empty());
        cfg.goal = env
            .string("DYAD_LOOP_GOAL")
            .or_else(|| file.goal.clone())
            .unwrap_or(cfg.goal);
        cfg.state_dir = env
            .string("DYAD_STATE_DIR")
            .map(PathBuf::from)
            .or_else(|| file.state_dir.clone())
            .unwrap_or_else(|| default_state_dir(&cfg.dyad_name));

        let secs = |key: &str, from_file: Option<u64>, default: Duration| {
            env.parsed::<u64>(key)
                .or(from_file)
                .map_or(default, Duration::from_secs)
        };
        cfg.sleep_interval = secs(
            "DYAD_LOOP_SLEEP_SECONDS",
            file.sleep_seconds,
            cfg.sleep_interval,
        );
        cfg.startup_delay = secs(
            "DYAD_LOOP_STARTUP_DELAY_SECONDS",
            file.startup_delay_seconds,
            cfg.startup_delay,
        );
        cfg.turn_timeout = secs(
            "DYAD_LOOP_TURN_TIMEOUT_SECONDS",
            file.turn_timeout_seconds,
            cfg.turn_timeout,
        );
        cfg.retry_base = secs(
            "DYAD_LOOP_RETRY_BASE_SECONDS",
            file.retry_base_seconds,
            cfg.retry_base,
        );
        cfg.pause_poll = secs(
            "DYAD_LOOP_PAUSE_POLL_SECONDS",
            file.pause_poll_seconds,
            cfg.pause_poll,
        );

        cfg.max_turns = env
            .parsed("DYAD_LOOP_MAX_TURNS")
            .or(file.max_turns)
            .unwrap_or(cfg.max_turns);
        cfg.retry_max = env
            .parsed("DYAD_LOOP_RETRY_MAX")
            .or(file.retry_max)
            .unwrap_or(cfg.retry_max);
        cfg.seed_critic_prompt = env
            .string("DYAD_LOOP_SEED_CRITIC_PROMPT")
            .or_else(|| file.seed_critic_prompt.clone());
        cfg.prompt_lines = env
            .parsed("DYAD_LOOP_PROMPT_LINES")
            .or(file.prompt_lines)
            .unwrap_or(cfg.prompt_lines);
        cfg.allow_mcp_startup = env
            .bool("DYAD_LOOP_ALLOW_MCP_STARTUP")
            .or(file.allow_mcp_startup)
            .unwrap_or(cfg.allow_mcp_startup);
        cfg.capture_mode = env
            .string("DYAD_LOOP_TMUX_CAPTURE")
            .and_then(|raw| match raw.parse::<CaptureMode>() {
                Ok(mode) => Some(mode),
                Err(e) => {
                    warn!(error = %e, "ignoring DYAD_LOOP_TMUX_CAPTURE");
                    None
                }
            })
            .or(file.capture_mode)
            .unwrap_or(cfg.capture_mode);
        cfg.capture_lines = env
            .parsed("DYAD_LOOP_TMUX_CAPTURE_LINES")
            .or(file.capture_lines)
            .unwrap_or(cfg.capture_lines);
        cfg.strict_report = env
            .bool("DYAD_LOOP_STRICT_REPORT")
            .or(file.strict_report)
            .unwrap_or(cfg.strict_report);
        cfg.codex_start_cmd = env
            .string("DYAD_CODEX_START_CMD")
            .or_else(|| file.codex_start_cmd.clone());

        let uid = env.parsed::<u32>("SI_HOST_UID").or(file.host_uid);
        let gid = env.parsed::<u32>("SI_HOST_GID").or(file.host_gid);
        cfg.host_owner = match (uid, gid) {
            (Some(uid), Some(gid)) if uid > 0 && gid > 0 => Some(HostOwner { uid, gid }),
            _ => None,
        };

        cfg.normalize();
        cfg
    }

    /// Clamp values into their valid ranges.
    pub fn normalize(&mut self) {
        self.retry_max = self.retry_max.max(1);
        if self.prompt_lines == 0 {
            self.prompt_lines = DEFAULT_PROMPT_LINES;
        }
        if self.capture_lines == 0 {
            self.capture_lines = DEFAULT_CAPTURE_LINES;
        }
        self.capture_lines = self.capture_lines.clamp(MIN_CAPTURE_LINES, MAX_CAPTURE_LINES);
        if self.pause_poll.is_zero() {
            self.pause_poll = DEFAULT_PAUSE_POLL;
        }
        if self
            .seed_critic_prompt
            .as_deref()
            .is_some_and(|s| s.trim().is_empty())
        {
            self.seed_critic_prompt = None;
        }
    }

    /// Check what the loop needs before it can start.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.enabled && self.actor_container.trim().is_empty() {
            return Err(ExitError::Config(
                "ACTOR_CONTAINER is required when the dyad loop is enabled".to_string(),
            )
            .into());
        }
        self.start_command()?;
        Ok(())
    }

    /// Shell line that launches the interactive CLI.
    ///
    /// Custom commands that run the CLI's non-interactive `exec` mode are
    /// rejected; the loop needs a prompt to type into.
    pub fn start_command(&self) -> anyhow::Result<String> {
        let Some(custom) = self.codex_start_cmd.as_deref().map(str::trim) else {
            return Ok(DEFAULT_START_CMD.to_string());
        };
        if custom.is_empty() {
            return Ok(DEFAULT_START_CMD.to_string());
        }
        let lower = custom.to_lowercase();
        if lower.contains("codex exec") || lower.contains("codex-exec") {
            return Err(ExitError::Config(format!(
                "DYAD_CODEX_START_CMD must start an interactive session, got {custom:?}"
            ))
            .into());
        }
        Ok(custom.to_string())
    }

    /// How long to wait for a ready prompt: a third of the turn timeout, at
    /// least 30 seconds.
    pub fn ready_timeout(&self) -> Duration {
        (self.turn_timeout / 3).max(Duration::from_secs(30))
    }
}
