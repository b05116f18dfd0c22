use std::fs;
use std::path::Path;

use anyhow::Context;
use clap::Subcommand;
use tracing::info;

use super::DyadSelector;
use super::dyad_loop::control::{PAUSE_FILE, STOP_FILE};

#[derive(Debug, Subcommand)]
pub enum ControlCommand {
    /// Pause the loop before its next turn
    Pause {
        #[command(flatten)]
        dyad: DyadSelector,
    },
    /// Lift a pause
    Resume {
        #[command(flatten)]
        dyad: DyadSelector,
    },
    /// Stop the loop before its next turn
    Stop {
        #[command(flatten)]
        dyad: DyadSelector,
    },
    /// Remove both the pause and the stop flag
    Clear {
        #[command(flatten)]
        dyad: DyadSelector,
    },
}

impl ControlCommand {
    pub fn execute(&self) -> anyhow::Result<()> {
        match self {
            Self::Pause { dyad } => {
                let dir = dyad.resolve()?.state_dir;
                raise(&dir, PAUSE_FILE)
            }
            Self::Resume { dyad } => {
                let dir = dyad.resolve()?.state_dir;
                lower(&dir, PAUSE_FILE)
            }
            Self::Stop { dyad } => {
                let dir = dyad.resolve()?.state_dir;
                raise(&dir, STOP_FILE)
            }
            Self::Clear { dyad } => {
                let dir = dyad.resolve()?.state_dir;
                lower(&dir, PAUSE_FILE)?;
                lower(&dir, STOP_FILE)
            }
        }
    }
}

fn raise(state_dir: &Path, flag: &str) -> anyhow::Result<()> {
    fs::create_dir_all(state_dir)
        .with_context(|| format!("creating {}", state_dir.display()))?;
    let path = state_dir.join(flag);
    fs::write(&path, "").with_context(|| format!("writing {}", path.display()))?;
    info!(path = %path.display(), "flag set");
    Ok(())
}

fn lower(state_dir: &Path, flag: &str) -> anyhow::Result<()> {
    let path = state_dir.join(flag);
    match fs::remove_file(&path) {
        Ok(()) => {
            info!(path = %path.display(), "flag removed");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("removing {}", path.display())),
    }
}
