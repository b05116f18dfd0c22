pub mod control;
pub mod doctor;
pub mod dyad_loop;
pub mod extract;
pub mod schema;
pub mod status;

use std::path::PathBuf;

use clap::Args;

use crate::config::LoopConfig;

/// Picks the dyad a command works on.
#[derive(Debug, Clone, Default, Args)]
pub struct DyadSelector {
    /// Config file (default: $DYAD_CONFIG, then <config dir>/dyad/loop.toml)
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// State directory, overriding the configured one
    #[arg(long)]
    pub state_dir: Option<PathBuf>,
}

impl DyadSelector {
    pub fn resolve(&self) -> anyhow::Result<LoopConfig> {
        let mut cfg = LoopConfig::load(self.config.as_deref())?;
        if let Some(dir) = &self.state_dir {
            cfg.state_dir.clone_from(dir);
        }
        Ok(cfg)
    }
}
