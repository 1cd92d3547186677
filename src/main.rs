//! provisor - declarative provisioning of image filesystem roots.
//!
//! Runs a manifest of installer steps in dependency order against a target
//! root, skips tracked steps that already succeeded, and writes the image's
//! runtime environment profile once every step has succeeded.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use provisor::commands;
use provisor::config::Config;
use provisor::error::ProvisionError;

#[derive(Parser)]
#[command(name = "provisor")]
#[command(about = "Dependency-ordered provisioning of image filesystem roots")]
#[command(
    after_help = "QUICK START:\n  provisor plan --manifest image.json                 Validate and show step order\n  provisor apply --manifest image.json --root rootfs  Provision the root\n  provisor status --manifest image.json --root rootfs Show completed steps\n  provisor reset --root rootfs                        Forget completed steps\n\nEXIT CODES:\n  0 completed, 3 invalid manifest, 4 dependency cycle, 5 unknown dependency,\n  6 step failed or timed out, 7 I/O error, 8 root locked, 130 cancelled"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Provision a target root from a manifest
    Apply {
        /// Step manifest (JSON)
        #[arg(long)]
        manifest: PathBuf,

        /// Filesystem root being provisioned
        #[arg(long)]
        root: PathBuf,

        /// Keep running steps that do not depend on a failed one
        #[arg(long)]
        continue_on_error: bool,

        /// Default per-step timeout in seconds (overrides PROVISOR_STEP_TIMEOUT)
        #[arg(long)]
        timeout: Option<u64>,

        /// Stream installer output while steps run
        #[arg(short, long)]
        verbose: bool,
    },

    /// Validate a manifest and show the execution order
    Plan {
        /// Step manifest (JSON)
        #[arg(long)]
        manifest: PathBuf,
    },

    /// Show which steps a target root has already completed
    Status {
        /// Step manifest (JSON)
        #[arg(long)]
        manifest: PathBuf,

        /// Filesystem root being provisioned
        #[arg(long)]
        root: PathBuf,
    },

    /// Remove success markers so tracked steps run again
    Reset {
        /// Filesystem root being provisioned
        #[arg(long)]
        root: PathBuf,

        /// Only reset this step (default: all steps)
        #[arg(long)]
        step: Option<String>,
    },

    /// Show current configuration
    Config,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Load .env if present; real environment variables win.
    dotenvy::dotenv().ok();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {:#}", err);
            ExitCode::from(exit_code_for(&err))
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = Config::load()?;
    init_tracing(&config);

    match cli.command {
        Commands::Apply {
            manifest,
            root,
            continue_on_error,
            timeout,
            verbose,
        } => {
            let opts = commands::apply::ApplyOptions {
                continue_on_error,
                timeout: timeout.filter(|&t| t > 0).map(Duration::from_secs),
                verbose,
            };
            commands::cmd_apply(&manifest, &root, opts, &config)?;
        }

        Commands::Plan { manifest } => {
            commands::cmd_plan(&manifest, &config)?;
        }

        Commands::Status { manifest, root } => {
            commands::cmd_status(&manifest, &root)?;
        }

        Commands::Reset { root, step } => {
            commands::cmd_reset(&root, step.as_deref())?;
        }

        Commands::Config => {
            config.print();
        }
    }

    Ok(())
}

fn init_tracing(config: &Config) {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| config.log_filter.clone());
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

/// Typed provisioning errors carry their own code; anything else is 1.
fn exit_code_for(err: &anyhow::Error) -> u8 {
    err.downcast_ref::<ProvisionError>()
        .map_or(1, ProvisionError::exit_code)
}
