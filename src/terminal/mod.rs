//! Terminal multiplexer access: the raw tmux primitives, ANSI cleanup, and
//! the session lifecycle built on top of them.

pub mod ansi;
pub mod session;
pub mod tmux;

use std::fmt;
use std::str::FromStr;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::cancel::Ctx;

pub use ansi::strip_ansi;
pub use session::{SessionManager, SessionSettings};
pub use tmux::TmuxRunner;

/// Symbolic keys interpreted by the multiplexer rather than pasted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlKey {
    /// Clear the current input line.
    ClearLine,
    /// Submit the current input (enter).
    Submit,
}

impl ControlKey {
    /// tmux key name for `send-keys`.
    pub const fn key_name(self) -> &'static str {
        match self {
            Self::ClearLine => "C-u",
            Self::Submit => "C-m",
        }
    }
}

/// Which screen buffer to capture.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum CaptureMode {
    #[default]
    #[serde(alias = "main")]
    Primary,
    #[serde(alias = "alt")]
    Alternate,
}

impl FromStr for CaptureMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "main" | "primary" => Ok(Self::Primary),
            "alt" | "alternate" => Ok(Self::Alternate),
            other => Err(format!(
                "unknown capture mode {other:?} (expected main, primary, alt or alternate)"
            )),
        }
    }
}

impl fmt::Display for CaptureMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primary => f.write_str("primary"),
            Self::Alternate => f.write_str("alternate"),
        }
    }
}

/// The multiplexer operations the supervisor relies on.
///
/// `session` arguments name a whole session; `target` arguments name a pane
/// (`<session>:0.0`). Every call is bounded by the supplied context.
pub trait Multiplexer {
    /// Version string of the multiplexer binary; fails when it is unusable.
    fn probe(&self, ctx: &Ctx) -> anyhow::Result<String>;

    fn has_session(&self, ctx: &Ctx, session: &str) -> anyhow::Result<bool>;

    /// Create a detached session running `start_cmd` in a login shell.
    fn new_session(&self, ctx: &Ctx, session: &str, start_cmd: &str) -> anyhow::Result<()>;

    fn kill_session(&self, ctx: &Ctx, session: &str) -> anyhow::Result<()>;

    fn set_option(&self, ctx: &Ctx, session: &str, option: &str, value: &str)
    -> anyhow::Result<()>;

    /// Whether the pane's process has exited.
    fn pane_dead(&self, ctx: &Ctx, target: &str) -> anyhow::Result<bool>;

    fn resize_pane(&self, ctx: &Ctx, target: &str, cols: u16, rows: u16) -> anyhow::Result<()>;

    fn send_control_sequence(
        &self,
        ctx: &Ctx,
        target: &str,
        keys: &[ControlKey],
    ) -> anyhow::Result<()>;

    /// Paste `text` verbatim, bypassing key-name interpretation.
    fn send_literal(&self, ctx: &Ctx, target: &str, text: &str) -> anyhow::Result<()>;

    /// Last `lines` lines of the pane, ANSI sequences included.
    fn capture(
        &self,
        ctx: &Ctx,
        target: &str,
        mode: CaptureMode,
        lines: usize,
    ) -> anyhow::Result<String>;
}

/// Pane address of the single pane in `session`.
pub fn pane_target(session: &str) -> String {
    format!("{session}:0.0")
}
