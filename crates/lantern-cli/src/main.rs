//! Lantern CLI - ask a local or remote model to explain files and directories.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;
mod manifest;
mod session;

/// Lantern - explain files and directories with a local or remote model
#[derive(Parser)]
#[command(name = "lantern")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Explain one or more files or directories
    Explain {
        /// Files or directories to explain
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Ask a general question
    Ask {
        /// The question
        question: String,
        /// File whose content is attached as context
        #[arg(long)]
        context: Option<PathBuf>,
    },

    /// Manage local models
    Model {
        #[command(subcommand)]
        action: ModelAction,
    },

    /// Show or change the AI provider
    Provider {
        #[command(subcommand)]
        action: ProviderAction,
    },

    /// Manage the token used for gated model downloads
    Token {
        #[command(subcommand)]
        action: TokenAction,
    },
}

#[derive(Subcommand)]
enum ModelAction {
    /// List available models
    List,
    /// Show paths, hardware and the active model
    Info,
    /// Download a model (default: the active one)
    Pull {
        /// Model id
        id: Option<String>,
    },
    /// Switch to a model by id or list index, downloading it if needed
    Use {
        /// Model id or 1-based index from `lantern model list`
        model: String,
    },
}

#[derive(Subcommand)]
enum ProviderAction {
    /// Show the effective provider settings
    Show,
    /// Make a provider active, keeping stored credentials
    Use {
        /// local, selfhost, gpt, gemini or copilot
        provider: String,
    },
    /// Store an API key and make the provider active
    Set {
        provider: String,
        key: String,
        /// Replace an existing key
        #[arg(long)]
        overwrite: bool,
    },
    /// Configure an OpenAI-compatible server of your own
    Selfhost {
        /// Base URL, e.g. http://gpu-box:8080/v1
        url: String,
        key: Option<String>,
        model: Option<String>,
        /// Replace existing values
        #[arg(long)]
        overwrite: bool,
    },
}

#[derive(Subcommand)]
enum TokenAction {
    /// Store a download token
    Set { token: String },
    /// Remove the stored download token
    Clear,
}

fn main() -> miette::Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .finish();
    tracing::subscriber::set_global_default(subscriber).ok();

    match cli.command {
        Commands::Explain { paths } => commands::explain::run(&paths),
        Commands::Ask { question, context } => commands::ask::run(&question, context.as_deref()),
        Commands::Model { action } => match action {
            ModelAction::List => commands::model::list(),
            ModelAction::Info => commands::model::info(),
            ModelAction::Pull { id } => commands::model::pull(id.as_deref()),
            ModelAction::Use { model } => commands::model::select(&model),
        },
        Commands::Provider { action } => match action {
            ProviderAction::Show => commands::provider::show(),
            ProviderAction::Use { provider } => commands::provider::activate(&provider),
            ProviderAction::Set {
                provider,
                key,
                overwrite,
            } => commands::provider::set_key(&provider, &key, overwrite),
            ProviderAction::Selfhost {
                url,
                key,
                model,
                overwrite,
            } => commands::provider::selfhost(&url, key.as_deref(), model.as_deref(), overwrite),
        },
        Commands::Token { action } => match action {
            TokenAction::Set { token } => commands::token::set(Some(&token)),
            TokenAction::Clear => commands::token::set(None),
        },
    }
}
