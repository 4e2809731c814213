//! Wayfarer: multi-agent travel assistant console.
//!
//! Usage:
//!   wayfarer chat                         Interactive chat with the assistant
//!   wayfarer ask -q "Weather in Mumbai?"  One-shot question
//!   wayfarer route "Best biryani nearby"  Classify and hand off to a specialist
//!   wayfarer plan "3 days in Goa, vegan"  Draft, critique and refine a plan
//!   wayfarer sessions                     List saved sessions
//!   wayfarer agents                       List the agent catalog

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;
mod setup;

#[derive(Parser)]
#[command(name = "wayfarer")]
#[command(about = "Wayfarer — multi-agent travel assistant console")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Agent catalog to load on top of the built-in agents
    #[arg(long, global = true, env = "WAYFARER_AGENTS_FILE")]
    agents: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start an interactive chat session
    Chat {
        /// Catalog agent to talk to
        #[arg(short, long, default_value = "assistant")]
        agent: String,

        /// Keep the conversation in the SQLite session store
        #[arg(long)]
        persist: bool,

        /// Resume (or create) the session with this id
        #[arg(short, long)]
        session: Option<String>,
    },

    /// Ask a single question and print the answer
    Ask {
        /// The question
        #[arg(short, long)]
        query: String,

        /// Catalog agent to ask
        #[arg(short, long, default_value = "assistant")]
        agent: String,
    },

    /// Route requests to the specialist agent the router picks
    Route {
        /// Requests to route; reads from stdin when none are given
        queries: Vec<String>,
    },

    /// Draft a plan, then critique and refine it until approved
    Plan {
        /// The trip to plan
        query: String,

        /// Refinement cycles before settling for the best effort
        #[arg(short, long)]
        max_iterations: Option<u32>,
    },

    /// List or delete saved sessions
    Sessions {
        /// Delete the session with this id
        #[arg(long)]
        delete: Option<String>,
    },

    /// List the agents in the catalog
    Agents,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();

    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    let workspace = setup::Workspace::load(cli.agents)?;

    match cli.command {
        Commands::Chat { agent, persist, session } => commands::chat::run(&workspace, &agent, persist, session).await,
        Commands::Ask { query, agent } => commands::ask::run(&workspace, &agent, &query).await,
        Commands::Route { queries } => commands::route::run(&workspace, queries).await,
        Commands::Plan { query, max_iterations } => commands::plan::run(&workspace, &query, max_iterations).await,
        Commands::Sessions { delete } => commands::sessions::run(&workspace, delete).await,
        Commands::Agents => commands::agents::run(&workspace),
    }
}
