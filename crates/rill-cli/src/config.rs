//! Configuration file and local persistence

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Configuration for rill
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Chat endpoint URL
    pub chat_url: Option<String>,
    /// Base URL for the identity endpoint
    pub auth_base: Option<String>,
    /// Bearer token (the RILL_TOKEN env var takes precedence)
    pub token: Option<String>,
    /// Default model id
    pub model: Option<String>,
    /// Default mode (deep or fast)
    pub mode: Option<String>,
    /// Enable web search by default
    pub web_search: Option<bool>,
}

impl Config {
    /// Get the config directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("rill")
    }

    /// Get the config file path
    pub fn config_path() -> PathBuf {
        // Check for RILL_CONFIG_PATH env var first
        if let Ok(path) = std::env::var("RILL_CONFIG_PATH") {
            return PathBuf::from(path);
        }
        Self::config_dir().join("config.toml")
    }

    /// Load config from file
    pub fn load() -> Self {
        let path = Self::config_path();
        if !path.exists() {
            return Self::default();
        }

        match fs::read_to_string(&path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("Warning: Failed to parse config file: {}", e);
                    Self::default()
                }
            },
            Err(e) => {
                eprintln!("Warning: Failed to read config file: {}", e);
                Self::default()
            }
        }
    }

    /// Save config to file
    pub fn save(&self) -> std::io::Result<()> {
        let path = Self::config_path();
        let dir = path.parent().unwrap();
        fs::create_dir_all(dir)?;

        let content = toml::to_string_pretty(self).map_err(std::io::Error::other)?;
        fs::write(path, content)
    }

    /// Create a default config file if it doesn't exist
    pub fn init() -> std::io::Result<PathBuf> {
        let path = Self::config_path();
        if path.exists() {
            return Ok(path);
        }

        let default_config = Config {
            chat_url: Some("http://localhost:3001/api/ai_talk/Doubao".to_string()),
            auth_base: Some("http://localhost:3001".to_string()),
            token: None,
            model: Some("doubao-seed-1-6-vision".to_string()),
            mode: Some("deep".to_string()),
            web_search: Some(false),
        };

        default_config.save()?;
        Ok(path)
    }
}

/// Generate example config content
pub fn example_config() -> &'static str {
    r#"# rill configuration file
# Place at ~/.config/rill/config.toml (Linux/Mac) or %APPDATA%\rill\config.toml (Windows)

# Chat endpoint URL
chat_url = "http://localhost:3001/api/ai_talk/Doubao"

# Base URL for the identity endpoint
auth_base = "http://localhost:3001"

# Bearer token (it's recommended to use the RILL_TOKEN env var instead)
# token = "..."

# Default model (doubao-seed-1-6-vision, doubao-seed-code, doubao-seed-1-6)
model = "doubao-seed-1-6-vision"

# Default mode (deep or fast)
mode = "deep"

# Enable web search by default (only doubao-seed-1-6-vision supports it)
web_search = false
"#
}

// --- conversation identity persistence ---
//
// A single value under a fixed name, used to resume the last active
// conversation across restarts. Not a transcript cache.

const CONVERSATION_ID_FILE: &str = "conversation-id";

/// Get the data directory
pub fn data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("rill")
}

/// Load the last active conversation id, if one was persisted
pub fn load_conversation_id() -> Option<String> {
    let id = fs::read_to_string(data_dir().join(CONVERSATION_ID_FILE)).ok()?;
    let id = id.trim().to_string();
    (!id.is_empty()).then_some(id)
}

/// Persist the active conversation id for the next start
pub fn store_conversation_id(id: &str) -> std::io::Result<()> {
    let dir = data_dir();
    fs::create_dir_all(&dir)?;
    fs::write(dir.join(CONVERSATION_ID_FILE), id)
}
