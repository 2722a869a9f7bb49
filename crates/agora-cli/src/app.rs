//! The `agora` application.
//!
//! Loads configuration, installs logging and dispatches commands. The
//! retrieval service is built lazily so `version` and `config` work without
//! a reachable store.

use std::sync::Arc;

use agora_core::Result;
use agora_retrieval::{AgoraConfig, MemoryContentSource, RetrievalService};
use tracing_subscriber::EnvFilter;

use crate::cli::{CliArgs, CollectionsAction, Command};
use crate::{config_handlers, service_handlers};

// ============================================================================
// AgoraCli
// ============================================================================

/// CLI application over a loaded configuration.
pub struct AgoraCli {
    name: String,
    config: AgoraConfig,
    version: String,
}

impl AgoraCli {
    /// Create from CLI args, loading config from file/env.
    pub fn from_args(name: impl Into<String>, args: &CliArgs) -> Result<Self> {
        let config = AgoraConfig::load(args.config.as_deref())?;
        Ok(Self::new(name, config))
    }

    /// Create a new CLI application.
    pub fn new(name: impl Into<String>, config: AgoraConfig) -> Self {
        Self {
            name: name.into(),
            config,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// Override the version string.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// The loaded configuration.
    pub fn config(&self) -> &AgoraConfig {
        &self.config
    }

    /// Initialise tracing-based logging.
    ///
    /// Uses `RUST_LOG` env var if set, otherwise defaults based on verbosity flags.
    /// Library crates log through `log`; the subscriber picks those records up.
    pub fn init_logging(&self, verbose: bool, quiet: bool) {
        let filter = if std::env::var("RUST_LOG").is_ok() {
            EnvFilter::from_default_env()
        } else if quiet {
            EnvFilter::new("warn")
        } else if verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        };

        // Ignore error if a subscriber is already set (e.g. in tests).
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init();
    }

    /// The operator CLI has no primary store to read from, so signal
    /// refreshes and profiles see an empty source.
    fn service(&self) -> Result<RetrievalService> {
        RetrievalService::from_config(&self.config, Arc::new(MemoryContentSource::new()))
    }

    /// Run the CLI with the given arguments.
    pub async fn run(&self, args: CliArgs) -> Result<()> {
        self.init_logging(args.verbose, args.quiet);

        match args.command {
            Some(Command::Version) => {
                println!("{} {}", self.name, self.version);
                Ok(())
            }
            Some(Command::Config(config_cmd)) => {
                config_handlers::handle_config_command(args.config.as_deref(), config_cmd.command)
            }
            Some(Command::Status { json }) => {
                service_handlers::handle_status(&self.service()?, json).await
            }
            Some(Command::Collections(cmd)) => {
                let service = self.service()?;
                match cmd.command {
                    CollectionsAction::Ensure => service_handlers::handle_ensure(&service).await,
                    CollectionsAction::Reset { yes } => {
                        service_handlers::handle_reset(&service, yes).await
                    }
                }
            }
            Some(Command::Index { file }) => {
                service_handlers::handle_index(&self.service()?, &file).await
            }
            Some(Command::Delete { kind, id }) => {
                service_handlers::handle_delete(&self.service()?, kind, id).await
            }
            Some(Command::Search(search)) => {
                service_handlers::handle_search(
                    &self.service()?,
                    search,
                    self.config.search.default_candidate_limit,
                )
                .await
            }
            None => {
                println!("{} {}: use --help for usage", self.name, self.version);
                Ok(())
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use agora_retrieval::StoreBackend;
    use clap::Parser;

    fn memory_config() -> AgoraConfig {
        let mut config = AgoraConfig::default();
        config.store.backend = StoreBackend::Memory;
        config.store.dense_dimension = 32;
        config
    }

    #[test]
    fn test_agora_cli_new() {
        let cli = AgoraCli::new("agora", memory_config()).with_version("1.2.3");
        assert_eq!(cli.name, "agora");
        assert_eq!(cli.version, "1.2.3");
        assert_eq!(cli.config().store.dense_dimension, 32);
    }

    #[test]
    fn test_from_args_with_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[store]\nbackend = \"memory\"\ndense_dimension = 16\n").unwrap();

        let args = CliArgs::parse_from(["agora", "--config", path.to_str().unwrap()]);
        let cli = AgoraCli::from_args("agora", &args).unwrap();
        assert_eq!(cli.config().store.backend, StoreBackend::Memory);
        assert_eq!(cli.config().store.dense_dimension, 16);
    }

    #[tokio::test]
    async fn test_run_version_and_no_command() {
        let cli = AgoraCli::new("agora", memory_config());
        assert!(cli.run(CliArgs::parse_from(["agora", "version"])).await.is_ok());
        assert!(cli.run(CliArgs::parse_from(["agora"])).await.is_ok());
    }

    #[tokio::test]
    async fn test_run_store_commands_on_memory_backend() {
        let cli = AgoraCli::new("agora", memory_config());
        for argv in [
            vec!["agora", "status"],
            vec!["agora", "collections", "ensure"],
            vec!["agora", "collections", "reset", "--yes"],
        ] {
            assert!(cli.run(CliArgs::parse_from(argv)).await.is_ok());
        }
    }

    #[tokio::test]
    async fn test_run_delete_on_fresh_memory_store_fails() {
        // Each run builds its own memory store, so no collection exists yet.
        let cli = AgoraCli::new("agora", memory_config());
        let result = cli
            .run(CliArgs::parse_from(["agora", "delete", "post", "1"]))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_run_reset_without_confirmation_fails() {
        let cli = AgoraCli::new("agora", memory_config());
        let result = cli
            .run(CliArgs::parse_from(["agora", "collections", "reset"]))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_run_search_without_collections_fails() {
        let cli = AgoraCli::new("agora", memory_config());
        let result = cli
            .run(CliArgs::parse_from(["agora", "search", "quantum"]))
            .await;
        assert!(result.is_err());
    }

    #[test]
    fn test_init_logging_is_idempotent() {
        let cli = AgoraCli::new("agora", memory_config());
        cli.init_logging(true, false);
        cli.init_logging(false, true);
    }
}
