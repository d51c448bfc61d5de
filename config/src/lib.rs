//! Configuration for arbiter: process-env bootstrap plus the typed base document.
//!
//! Two concerns live here:
//!
//! - [`load_and_apply`]: fills missing environment variables from a project
//!   `.env` and from `$XDG_CONFIG_HOME/<app>/config.toml` `[env]`, with
//!   priority **existing env > .env > XDG**. Used for API keys and base URLs
//!   before any client is constructed.
//! - [`SystemConfig`]: the base key-value document (`system.*` orchestration
//!   options and `security.*` sandbox policy), loaded from YAML with
//!   defaults when absent.

mod document;
mod dotenv;
mod xdg_toml;

use std::path::Path;
use thiserror::Error;

pub use document::{SecuritySection, SystemConfig, SystemSection};

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("xdg config path: {0}")]
    XdgPath(String),
    #[error("read xdg config: {0}")]
    XdgRead(std::io::Error),
    #[error("parse xdg toml: {0}")]
    XdgParse(#[from] toml::de::Error),
    #[error("read .env: {0}")]
    DotenvRead(std::io::Error),
    #[error("read config document: {0}")]
    DocumentRead(std::io::Error),
    #[error("parse config document: {0}")]
    DocumentParse(#[from] serde_yaml::Error),
}

/// Loads env keys from XDG `config.toml` and an optional project `.env`, then
/// sets each key **only when it is not already present** in the process
/// environment (existing env always wins).
///
/// Precedence for a key missing from the environment:
/// 1. project `.env` (current directory, or `override_dir` when given)
/// 2. `$XDG_CONFIG_HOME/<app_name>/config.toml` `[env]` table
pub fn load_and_apply(app_name: &str, override_dir: Option<&Path>) -> Result<(), LoadError> {
    let xdg_map = xdg_toml::load_env_map(app_name)?;
    let dotenv_map = dotenv::load_env_map(override_dir).map_err(LoadError::DotenvRead)?;

    let mut keys: std::collections::HashSet<String> = xdg_map.keys().cloned().collect();
    keys.extend(dotenv_map.keys().cloned());

    for key in keys {
        if std::env::var(&key).is_ok() {
            continue;
        }
        if let Some(v) = dotenv_map.get(&key).or_else(|| xdg_map.get(&key)) {
            std::env::set_var(&key, v);
        }
    }

    Ok(())
}
