//! CLI argument parsing and command definitions.
//!
//! The `agora` binary is an operator tool: it checks readiness, maintains
//! collections, backfills the index from JSONL exports and runs ad-hoc
//! searches against the configured store.

use std::path::PathBuf;

use agora_retrieval::{EntityKind, FusionMethod, SearchScope};
use clap::{Args, Parser, Subcommand};

// ============================================================================
// CLI argument types
// ============================================================================

/// Top-level CLI arguments.
#[derive(Parser, Debug)]
#[command(name = "agora", author, about, long_about = None)]
pub struct CliArgs {
    /// Path to configuration file.
    #[arg(short, long, env = "AGORA_CONFIG")]
    pub config: Option<String>,

    /// Enable verbose output.
    #[arg(short, long)]
    pub verbose: bool,

    /// Suppress non-essential output.
    #[arg(short, long)]
    pub quiet: bool,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Operator commands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Show store readiness and embedding provider state.
    Status {
        /// Print as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Collection maintenance.
    Collections(CollectionsCommand),

    /// Index entities from a JSONL file, one entity per line.
    Index {
        /// JSONL file with `{"type": "post", ...}` records.
        file: PathBuf,
    },

    /// Remove one entity from the index.
    Delete {
        /// Entity kind (post, comment, category, user).
        kind: EntityKind,

        /// Primary-store id.
        id: i64,
    },

    /// Run a search.
    Search(SearchArgs),

    /// Configuration operations.
    Config(ConfigCommand),

    /// Print version information.
    Version,
}

/// Collection subcommands.
#[derive(Parser, Debug)]
pub struct CollectionsCommand {
    /// Collection subcommand to execute.
    #[command(subcommand)]
    pub command: CollectionsAction,
}

/// Available collection subcommands.
#[derive(Subcommand, Debug)]
pub enum CollectionsAction {
    /// Create any missing collections.
    Ensure,

    /// Drop and recreate every collection.
    Reset {
        /// Confirm the reset. Without it nothing is deleted.
        #[arg(long)]
        yes: bool,
    },
}

/// Arguments for `agora search`.
#[derive(Args, Debug)]
pub struct SearchArgs {
    /// Query text.
    pub query: String,

    /// Collections to search: `all`, `multimodal`, or a comma list of kinds.
    #[arg(short, long, default_value = "posts")]
    pub scope: SearchScope,

    /// Maximum results.
    #[arg(short, long, default_value_t = 10)]
    pub limit: usize,

    /// Fusion method for hybrid results (rrf or dbsf).
    #[arg(short, long, default_value = "rrf")]
    pub fusion: FusionMethod,

    /// Use only the dense index.
    #[arg(long, conflicts_with = "sparse_only")]
    pub dense_only: bool,

    /// Use only the sparse index.
    #[arg(long)]
    pub sparse_only: bool,

    /// Sparse candidates rescored by dense similarity.
    #[arg(long, conflicts_with_all = ["dense_only", "sparse_only", "fusion"])]
    pub multi_stage: bool,

    /// Print hits as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Config-specific subcommands.
#[derive(Parser, Debug)]
pub struct ConfigCommand {
    /// Config subcommand to execute.
    #[command(subcommand)]
    pub command: ConfigAction,
}

/// Available config subcommands.
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show the resolved config file path.
    Path,

    /// Print the effective configuration as TOML.
    Show,

    /// Export configuration as environment variables.
    Export {
        /// Format as Docker --env flags.
        #[arg(long)]
        docker_env: bool,
    },
}

// ============================================================================
// Tests
// ============================================================================
