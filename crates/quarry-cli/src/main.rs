//! Quarry CLI
//!
//! Developer tool for scaffolding, validating and compiling projects.

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

use commands::ProjectArgs;

/// Quarry - declarative project compiler
#[derive(Parser)]
#[command(name = "quarry")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Project directory
    #[arg(short, long, env = "QUARRY_PROJECT", default_value = ".", global = true)]
    project: String,

    /// Active environment (e.g., dev, prod)
    #[arg(short, long, env = "QUARRY_ENV", global = true)]
    environment: Option<String>,

    /// OLAP connector used when the manifest does not set one
    #[arg(long, global = true)]
    olap_connector: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new Quarry project
    Init {
        /// Directory to initialize (defaults to current directory)
        #[arg(default_value = ".")]
        path: String,

        /// Project display name (defaults to directory name)
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Parse the project and report errors
    Validate,

    /// Print the compiled resources as JSON
    Compile {
        /// Only print resources of this kind
        #[arg(short, long)]
        kind: Option<String>,
    },

    /// Show resource counts per kind
    Status,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging; stdout is reserved for command output
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let registry = tracing_subscriber::registry().with(filter);
    if cli.log_json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry.with(fmt::layer().with_writer(std::io::stderr)).init();
    }

    let project = ProjectArgs {
        path: &cli.project,
        environment: cli.environment.as_deref(),
        olap_connector: cli.olap_connector.as_deref(),
    };

    match cli.command {
        Commands::Init { path, name } => {
            commands::init::run(&path, name.as_deref())?;
        }
        Commands::Validate => {
            commands::validate::run(&project)?;
        }
        Commands::Compile { kind } => {
            commands::compile::run(&project, kind.as_deref())?;
        }
        Commands::Status => {
            commands::status::run(&project)?;
        }
    }

    Ok(())
}
