use std::process::ExitCode;

use clap::{Parser, Subcommand};

use dyad::cancel::{CancelToken, Ctx};
use dyad::commands::control::ControlCommand;
use dyad::commands::doctor::DoctorArgs;
use dyad::commands::dyad_loop::LoopArgs;
use dyad::commands::extract::ExtractArgs;
use dyad::commands::schema::run_schema;
use dyad::commands::status::StatusArgs;
use dyad::error::ExitError;
use dyad::telemetry;

#[derive(Debug, Parser)]
#[command(
    name = "dyad",
    version,
    about = "Supervisor for actor/critic pairs of interactive LLM CLIs"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the actor/critic turn loop until stopped
    Loop(LoopArgs),
    /// Show saved turn state and control flags
    Status(StatusArgs),
    /// Pause, resume, or stop a running loop
    Control {
        #[command(subcommand)]
        command: ControlCommand,
    },
    /// Check tmux, docker, the actor container, and the state dir
    Doctor(DoctorArgs),
    /// Extract a work report from a saved pane capture
    Extract(ExtractArgs),
    /// Print the JSON Schema for loop.toml
    Schema,
}

impl Commands {
    const fn name(&self) -> &'static str {
        match self {
            Self::Loop(_) => "loop",
            Self::Status(_) => "status",
            Self::Control { .. } => "control",
            Self::Doctor(_) => "doctor",
            Self::Extract(_) => "extract",
            Self::Schema => "schema",
        }
    }
}

fn main() -> ExitCode {
    telemetry::init();

    let cli = Cli::parse();

    let token = CancelToken::new();
    let handler_token = token.clone();
    if let Err(e) = ctrlc::set_handler(move || handler_token.cancel()) {
        tracing::warn!(error = %e, "signal handler not installed");
    }
    let ctx = Ctx::with_token(token);

    let _span = tracing::info_span!("command", name = cli.command.name()).entered();

    let result = match cli.command {
        Commands::Loop(args) => args.execute(&ctx),
        Commands::Status(args) => args.execute(),
        Commands::Control { command } => command.execute(),
        Commands::Doctor(args) => args.execute(&ctx),
        Commands::Extract(args) => args.execute(),
        Commands::Schema => run_schema(),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if let Some(exit_err) = e.downcast_ref::<ExitError>() {
                eprintln!("error: {exit_err}");
                exit_err.exit_code()
            } else {
                eprintln!("error: {e:#}");
                ExitCode::FAILURE
            }
        }
    }
}
