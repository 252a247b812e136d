//! Sift CLI: the main entry point.
//!
//! Commands:
//! - `ask`: Answer a question over a records file (interactive without one)
//! - `classify`: Show how a query would be routed
//! - `config`: Show, create or validate the configuration

use clap::{Parser, Subcommand};
use sift_config::AppConfig;
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(
    name = "sift",
    about = "Sift — conversational retrieval over your workplace data",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Use this config file instead of ~/.sift/config.toml
    #[arg(long, global = true, env = "SIFT_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask a question; starts an interactive session when none is given
    Ask {
        /// The question
        question: Option<String>,

        /// JSON file of records to search (an array, or {"records": [...], "acl": {...}})
        #[arg(short, long)]
        records: PathBuf,

        /// Identity results are scoped to
        #[arg(short, long)]
        principal: Option<String>,

        /// Print loop events as JSON lines
        #[arg(long)]
        events: bool,
    },

    /// Show how a query would be routed
    Classify {
        /// The query to classify
        query: String,

        /// Ask the model instead of using the word tables
        #[arg(long)]
        model: bool,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Check the configuration for errors
    Validate,
    /// Print the config file path
    Path,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| AppConfig::config_dir().join("config.toml"));

    // `config` subcommands report load errors themselves
    let config = match &cli.command {
        Commands::Config { .. } => AppConfig::load_from(&config_path).unwrap_or_default(),
        _ => commands::load_config(&config_path)?,
    };
    init_tracing(&config, cli.verbose);

    match cli.command {
        Commands::Ask {
            question,
            records,
            principal,
            events,
        } => commands::ask::run(&config, question, &records, principal, events).await?,
        Commands::Classify { query, model } => commands::classify::run(&config, &query, model).await?,
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config_cmd::show(&config_path)?,
            ConfigAction::Init { force } => commands::config_cmd::init(&config_path, force)?,
            ConfigAction::Validate => commands::config_cmd::validate(&config_path)?,
            ConfigAction::Path => println!("{}", config_path.display()),
        },
    }

    Ok(())
}

fn init_tracing(config: &AppConfig, verbose: bool) {
    let level = if verbose { "debug" } else { config.logging.level.as_str() };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if config.logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}
