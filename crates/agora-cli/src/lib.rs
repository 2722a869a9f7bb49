//! Operator command line for the Agora retrieval index.
//!
//! # Key Abstractions
//!
//! - [`CliArgs`]: clap argument tree for the `agora` binary
//! - [`AgoraCli`]: loads configuration, installs logging and runs commands

pub mod app;
pub mod cli;
pub mod config_handlers;
pub mod service_handlers;

pub use app::AgoraCli;
pub use cli::CliArgs;
