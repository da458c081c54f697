//! Palisade CLI - evaluate, validate and inspect access policies.

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;

use commands::check::CheckArgs;
use commands::effective::EffectiveArgs;

#[derive(Parser)]
#[command(name = "palisade")]
#[command(author, version, about = "Palisade - attribute-based access control for operational records", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Project directory holding palisade.toml
    #[arg(short = 'C', long, global = true, default_value = ".")]
    project: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate one permission check and print the decision as JSON
    Check(CheckArgs),

    /// Validate a policy document
    Validate {
        /// Policy document (JSON array of policies)
        #[arg(short, long)]
        policies: String,
    },

    /// Print every (resource type, action) pair a user is granted
    Effective(EffectiveArgs),

    /// Configuration management
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show the merged configuration
    Show {
        /// Output format (text, json, toml)
        #[arg(short, long, default_value = "text")]
        format: String,
    },
}

fn main() -> Result<()> {
    // Logs go to stderr; stdout carries command output.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Check(args) => commands::check::run(&cli.project, &args),
        Commands::Validate { policies } => commands::validate::run(&policies),
        Commands::Effective(args) => commands::effective::run(&cli.project, &args),
        Commands::Config(cmd) => match cmd {
            ConfigCommands::Show { format } => commands::config::show(&cli.project, &format),
        },
    }
}
