//! Handler functions for config CLI commands.
//!
//! Implements `agora config {path,show,export}`.

use agora_core::{Error, Result};
use agora_retrieval::AgoraConfig;

use crate::cli::ConfigAction;

// ============================================================================
// Command dispatch
// ============================================================================

/// Handle a config subcommand.
///
/// Receives the raw `--config` path (not a loaded config) because `path`
/// works before a config file exists.
pub fn handle_config_command(config_path: Option<&str>, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Path => cmd_config_path(config_path),
        ConfigAction::Show => {
            let config = AgoraConfig::load(config_path)?;
            print!("{}", render_config(&config)?);
            Ok(())
        }
        ConfigAction::Export { docker_env } => {
            let config = AgoraConfig::load(config_path)?;
            for line in export_lines(&config, docker_env)? {
                println!("{line}");
            }
            Ok(())
        }
    }
}

// ============================================================================
// Command handlers
// ============================================================================

/// Show the resolved config file path.
fn cmd_config_path(config_path: Option<&str>) -> Result<()> {
    match AgoraConfig::resolve_config_path(config_path) {
        Some(path) => {
            println!("{}", path.display());
            if !path.exists() {
                eprintln!("(file does not exist; built-in defaults apply)");
            }
            Ok(())
        }
        None => Err(Error::config(
            "Could not determine config directory for this platform",
        )),
    }
}

/// The effective configuration as TOML.
fn render_config(config: &AgoraConfig) -> Result<String> {
    config.to_toml_string()
}

/// `KEY=value` lines, or Docker `--env` flags.
fn export_lines(config: &AgoraConfig, docker_env: bool) -> Result<Vec<String>> {
    Ok(config
        .to_env_vars()?
        .into_iter()
        .map(|(key, value)| {
            if docker_env {
                format!("--env {key}={value}")
            } else {
                format!("{key}={value}")
            }
        })
        .collect())
}

// ============================================================================
// Tests
// ============================================================================
