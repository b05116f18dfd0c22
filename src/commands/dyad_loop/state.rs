//! Persisted loop state and per-turn artifacts.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::HostOwner;
use crate::report::Member;

pub const STATE_FILE: &str = "loop-state.json";
pub const REPORTS_DIR: &str = "reports";

/// Progress of one dyad, saved after every completed turn.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopState {
    /// Last completed turn. 0 until the first actor/critic exchange finishes.
    pub turn: u64,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub last_actor_report: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub last_critic_report: String,
    pub updated_at: Option<DateTime<Utc>>,
}

impl LoopState {
    /// Read state from `path`. A missing file is an empty state; a corrupt
    /// one is an error.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = match fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
        };
        serde_json::from_str(&contents).with_context(|| format!("parsing {}", path.display()))
    }
}

/// Paths of the three artifacts written for one member's turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub prompt: PathBuf,
    pub raw: PathBuf,
    pub report: PathBuf,
}

/// The files under one dyad's state directory.
#[derive(Debug, Clone)]
pub struct StateStore {
    dir: PathBuf,
    owner: Option<HostOwner>,
}

impl StateStore {
    pub fn new(dir: impl Into<PathBuf>, owner: Option<HostOwner>) -> Self {
        Self {
            dir: dir.into(),
            owner,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn state_path(&self) -> PathBuf {
        self.dir.join(STATE_FILE)
    }

    pub fn reports_dir(&self) -> PathBuf {
        self.dir.join(REPORTS_DIR)
    }

    /// Create the state and reports directories.
    pub fn prepare(&self) -> anyhow::Result<()> {
        let reports = self.reports_dir();
        fs::create_dir_all(&reports)
            .with_context(|| format!("creating {}", reports.display()))?;
        self.chown(&self.dir);
        self.chown(&reports);
        Ok(())
    }

    pub fn load(&self) -> anyhow::Result<LoopState> {
        LoopState::load(&self.state_path())
    }

    /// Write `state` as pretty JSON through a temp file in the same
    /// directory, then rename it over the state file.
    pub fn save(&self, state: &LoopState) -> anyhow::Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("creating {}", self.dir.display()))?;
        let mut payload = serde_json::to_string_pretty(state)?;
        payload.push('\n');

        let path = self.state_path();
        let mut tmp = tempfile::Builder::new()
            .prefix("state-")
            .suffix(".json")
            .tempfile_in(&self.dir)
            .with_context(|| format!("creating temp file in {}", self.dir.display()))?;
        tmp.write_all(payload.as_bytes())?;
        tmp.as_file().sync_all()?;
        set_mode(tmp.path(), 0o644)?;
        tmp.persist(&path)
            .with_context(|| format!("renaming state into {}", path.display()))?;
        self.chown(&path);
        Ok(())
    }

    pub fn artifact_paths(&self, turn: u64, member: Member) -> ArtifactPaths {
        let base = format!("turn-{turn:04}-{member}");
        let reports = self.reports_dir();
        ArtifactPaths {
            prompt: reports.join(format!("{base}.prompt.txt")),
            raw: reports.join(format!("{base}.raw.txt")),
            report: reports.join(format!("{base}.report.md")),
        }
    }

    /// Write the prompt, raw capture, and accepted report for one turn.
    /// Failures are logged; the state file remains the source of truth.
    pub fn write_turn_artifacts(
        &self,
        turn: u64,
        member: Member,
        prompt: &str,
        raw: &str,
        report: &str,
    ) {
        let paths = self.artifact_paths(turn, member);
        let files = [
            (&paths.prompt, prompt),
            (&paths.raw, raw),
            (&paths.report, report),
        ];
        for (path, contents) in files {
            if let Err(e) = self.write_artifact(path, contents) {
                warn!(
                    turn,
                    %member,
                    path = %path.display(),
                    error = %format!("{e:#}"),
                    "artifact write failed"
                );
            }
        }
    }

    fn write_artifact(&self, path: &Path, contents: &str) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, format!("{}\n", contents.trim()))
            .with_context(|| format!("writing {}", path.display()))?;
        set_mode(path, 0o644)?;
        self.chown(path);
        Ok(())
    }

    fn chown(&self, path: &Path) {
        if let Some(owner) = self.owner
            && let Err(e) = chown_path(path, owner)
        {
            debug!(path = %path.display(), error = %e, "chown failed");
        }
    }
}

#[cfg(unix)]
fn chown_path(path: &Path, owner: HostOwner) -> std::io::Result<()> {
    std::os::unix::fs::chown(path, Some(owner.uid), Some(owner.gid))
}

#[cfg(not(unix))]
fn chown_path(_path: &Path, _owner: HostOwner) -> std::io::Result<()> {
    Ok(())
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> anyhow::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
        .with_context(|| format!("setting mode on {}", path.display()))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> anyhow::Result<()> {
    Ok(())
}
