//! Work reports scraped from interactive CLI output.
//!
//! A report is the body between [`REPORT_BEGIN`] and [`REPORT_END`]. The
//! parser lives in [`parser`]; the unfilled-template check lives in
//! [`placeholder`].

pub mod parser;
pub mod placeholder;

use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::TurnError;

pub use parser::{
    clean_capture, extract_delimited, extract_delimited_after, extract_fallback,
    last_end_offset, normalize_tagged_markers, wrap_report,
};
pub use placeholder::looks_like_placeholder;

pub const REPORT_BEGIN: &str = "<<WORK_REPORT_BEGIN>>";
pub const REPORT_END: &str = "<<WORK_REPORT_END>>";

/// Which side of the dyad produced (or will produce) a report.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    JsonSchema,
    clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Member {
    Actor,
    Critic,
}

impl Member {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Actor => "actor",
            Self::Critic => "critic",
        }
    }
}

impl fmt::Display for Member {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Turn the raw output of a turn into an accepted report body.
///
/// Strict mode only accepts a delimited body. Otherwise the fallback scraper
/// runs, and as a last resort the whole trimmed output is used. Empty or
/// placeholder bodies are rejected either way.
pub fn parse_turn_output(raw: &str, member: Member, strict: bool) -> Result<String, TurnError> {
    let clean = clean_capture(raw);
    let body = match extract_delimited(&clean) {
        Some(body) => body,
        None if strict => return Err(TurnError::StrictReport { member }),
        None => extract_fallback(&clean).unwrap_or_else(|| clean.trim().to_string()),
    };
    if body.is_empty() || looks_like_placeholder(&body, member) {
        return Err(TurnError::MissingReport { member });
    }
    Ok(body)
}
