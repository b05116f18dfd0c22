use std::process::ExitCode;

use crate::report::Member;

/// Errors that cause dyad to exit with a specific code.
#[derive(Debug, thiserror::Error)]
pub enum ExitError {
    #[error("config error: {0}")]
    Config(String),

    #[error("tool not found: {tool}")]
    ToolNotFound { tool: String },

    #[error("{tool} failed (exit {code}): {message}")]
    ToolFailed {
        tool: String,
        code: i32,
        message: String,
    },

    #[error("{tool} timed out after {timeout_secs}s")]
    Timeout { tool: String, timeout_secs: u64 },

    #[error("{message}")]
    WithCode { code: u8, message: String },

    #[error("preflight failed: {0}")]
    Preflight(String),
}

impl ExitError {
    pub const fn new(code: u8, message: String) -> Self {
        Self::WithCode { code, message }
    }

    pub fn exit_code(&self) -> ExitCode {
        match self {
            Self::Config(_) => ExitCode::from(2),
            Self::ToolNotFound { .. } => ExitCode::from(3),
            Self::ToolFailed { .. } => ExitCode::from(4),
            Self::Timeout { .. } => ExitCode::from(5),
            Self::WithCode { code, .. } => ExitCode::from(*code),
            Self::Preflight(_) => ExitCode::from(7),
        }
    }
}

/// Failures of a single interactive CLI turn.
///
/// The display strings are matched by the recoverability check, so the
/// wording of the timeout variants must keep the `timeout waiting for codex`
/// prefix.
#[derive(Debug, thiserror::Error)]
pub enum TurnError {
    #[error("timeout waiting for codex prompt")]
    PromptTimeout { last_output: String },

    #[error("timeout waiting for codex report")]
    ReportTimeout { last_output: String },

    #[error("codex prompt ready but missing work report markers")]
    MissingMarkers { last_output: String },

    #[error("{member} output missing work report markers")]
    StrictReport { member: Member },

    #[error("{member} output missing report")]
    MissingReport { member: Member },
}

impl TurnError {
    /// Last captured pane output attached to the failure, if any.
    pub fn last_output(&self) -> Option<&str> {
        match self {
            Self::PromptTimeout { last_output }
            | Self::ReportTimeout { last_output }
            | Self::MissingMarkers { last_output } => Some(last_output.as_str()),
            Self::StrictReport { .. } | Self::MissingReport { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn turn_error_messages_are_stable() {
        let err = TurnError::PromptTimeout {
            last_output: "boot".into(),
        };
        assert_eq!(err.to_string(), "timeout waiting for codex prompt");
        assert_eq!(err.last_output(), Some("boot"));

        let err = TurnError::MissingReport {
            member: Member::Critic,
        };
        assert_eq!(err.to_string(), "critic output missing report");
        assert!(err.last_output().is_none());
    }

    #[test]
    fn strict_report_message_mentions_markers() {
        let err = TurnError::StrictReport {
            member: Member::Actor,
        };
        assert!(err.to_string().contains("missing work report markers"));
    }
}
