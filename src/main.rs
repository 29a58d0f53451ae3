use anyhow::Result;
use clap::{Parser, Subcommand};
use convoy::config::ConvoyConfig;
use convoy::logging::init_logging;
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "convoy")]
#[command(version, about = "Multi-resource application lifecycle orchestrator")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to convoy.toml. Defaults to ./convoy.toml, then the user config directory.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Load a spec directory and list its applications
    Check {
        /// Directory with one sub-directory per application
        spec_dir: PathBuf,
    },
    /// Show the phase order each application's objects are created in
    Plan {
        spec_dir: PathBuf,

        /// Only plan this application
        #[arg(long)]
        app: Option<String>,
    },
    /// Schedule, validate and destroy applications against an in-memory cluster
    Simulate {
        spec_dir: PathBuf,

        /// Instance id; each app runs in namespace <app>-<instance id>
        #[arg(long)]
        instance_id: String,

        /// Only simulate this application
        #[arg(long)]
        app: Option<String>,

        /// Worker nodes in the simulated cluster
        #[arg(long, default_value = "3")]
        workers: usize,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Write a default convoy.toml
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Config { command } = &cli.command {
        return cmd::cmd_config(cli.config.as_deref(), command.clone());
    }

    let config = ConvoyConfig::resolve(cli.config.as_deref())?;
    init_logging(&config.logging, cli.verbose)?;

    match &cli.command {
        Commands::Check { spec_dir } => cmd::cmd_check(spec_dir)?,
        Commands::Plan { spec_dir, app } => cmd::cmd_plan(spec_dir, app.as_deref())?,
        Commands::Simulate {
            spec_dir,
            instance_id,
            app,
            workers,
        } => {
            cmd::cmd_simulate(config, spec_dir, instance_id, app.as_deref(), *workers).await?;
        }
        Commands::Config { .. } => {}
    }

    Ok(())
}
