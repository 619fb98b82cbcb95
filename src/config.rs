//! Server configuration from the environment

use crate::state_machine::DEFAULT_MAX_ROUNDS;
use std::path::PathBuf;

const DEFAULT_PORT: u16 = 8000;

/// Settings read once at start-up
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub db_path: PathBuf,
    pub port: u16,
    /// Gateway calls allowed per turn, at least 1
    pub max_rounds: u32,
    /// Root directory for the file tools
    pub workspace: PathBuf,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unparseable values fall back to defaults
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let home = lookup("HOME").unwrap_or_else(|| "/tmp".to_string());
        let data_dir = PathBuf::from(home).join(".toolchat");

        let db_path = lookup("TOOLCHAT_DB_PATH")
            .map_or_else(|| data_dir.join("toolchat.db"), PathBuf::from);
        let workspace = lookup("TOOLCHAT_WORKSPACE")
            .map_or_else(|| data_dir.join("workspace"), PathBuf::from);
        let port = lookup("TOOLCHAT_PORT")
            .and_then(|p| p.parse().ok())
            .unwrap_or(DEFAULT_PORT);
        let max_rounds = lookup("TOOLCHAT_MAX_ROUNDS")
            .and_then(|r| r.parse::<u32>().ok())
            .unwrap_or(DEFAULT_MAX_ROUNDS)
            .max(1);

        Self {
            db_path,
            port,
            max_rounds,
            workspace,
        }
    }
}
