//! mindloop CLI: the main entry point.
//!
//! Commands:
//! - `ask`            : Run one turn through the agent loop
//! - `memory show`    : Print everything the agent remembers
//! - `memory forget`  : Remove a saved memory entry
//! - `config`         : Print the default, effective or path of the config

use clap::{Parser, Subcommand, ValueEnum};

mod commands;

#[derive(Parser)]
#[command(
    name = "mindloop",
    about = "mindloop: a memory-aware LLM agent",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log line format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask the agent something
    Ask {
        /// The message to send
        message: String,

        /// Print the model's private reasoning to stderr
        #[arg(long)]
        show_thoughts: bool,
    },

    /// Inspect or edit the memory store
    Memory {
        #[command(subcommand)]
        action: MemoryAction,
    },

    /// Configuration commands (prints the default config when no action is given)
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },
}

#[derive(Subcommand)]
enum MemoryAction {
    /// Print every memory region
    Show,

    /// Remove a saved memory entry
    Forget {
        /// Entry key
        key: String,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the default configuration
    Default,

    /// Print the effective configuration (API key redacted)
    Show,

    /// Print the config file path
    Path,
}

fn init_tracing(verbose: bool, format: LogFormat) {
    let filter = if verbose { "debug" } else { "warn" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_format);

    match cli.command {
        Commands::Ask {
            message,
            show_thoughts,
        } => commands::ask::run(message, show_thoughts).await?,
        Commands::Memory { action } => match action {
            MemoryAction::Show => commands::memory::show().await?,
            MemoryAction::Forget { key } => commands::memory::forget(&key).await?,
        },
        Commands::Config { action } => match action {
            None | Some(ConfigAction::Default) => commands::config_cmd::default(),
            Some(ConfigAction::Show) => commands::config_cmd::show()?,
            Some(ConfigAction::Path) => commands::config_cmd::path(),
        },
    }

    Ok(())
}
