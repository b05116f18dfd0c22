use std::io::Read;
use std::path::PathBuf;

use anyhow::Context;
use clap::Args;

use crate::error::ExitError;
use crate::report::{Member, parse_turn_output};

/// Pull the work report out of a saved pane capture.
#[derive(Debug, Args)]
pub struct ExtractArgs {
    /// Capture file, or `-` for stdin
    pub input: PathBuf,
    /// Whose report the capture holds
    #[arg(long, value_enum, default_value_t = Member::Actor)]
    pub member: Member,
    /// Require report markers
    #[arg(long)]
    pub strict: bool,
}

impl ExtractArgs {
    pub fn execute(&self) -> anyhow::Result<()> {
        let raw = if self.input.as_os_str() == "-" {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("reading stdin")?;
            buf
        } else {
            std::fs::read_to_string(&self.input)
                .with_context(|| format!("reading {}", self.input.display()))?
        };

        let report = parse_turn_output(&raw, self.member, self.strict)
            .map_err(|e| ExitError::new(6, e.to_string()))?;
        println!("{report}");
        Ok(())
    }
}
