use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{KakeiboError, Result};
use crate::models::Member;

pub const DEFAULT_OCR_ENDPOINT: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_OCR_MODEL: &str = "gemini-2.0-flash";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub data_dir: String,
    #[serde(default = "default_member")]
    pub default_member: String,
    /// Base URL of the remote store. Unset means sync is simulated.
    #[serde(default)]
    pub remote_url: Option<String>,
    #[serde(default)]
    pub remote_token: Option<String>,
    #[serde(default = "default_success_rate")]
    pub simulated_success_rate: f64,
    #[serde(default = "default_ocr_endpoint")]
    pub ocr_endpoint: String,
    #[serde(default = "default_ocr_model")]
    pub ocr_model: String,
}

fn default_member() -> String {
    Member::default_member().id.to_string()
}

fn default_success_rate() -> f64 {
    0.9
}

fn default_ocr_endpoint() -> String {
    DEFAULT_OCR_ENDPOINT.to_string()
}

fn default_ocr_model() -> String {
    DEFAULT_OCR_MODEL.to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir().to_string_lossy().to_string(),
            default_member: default_member(),
            remote_url: None,
            remote_token: None,
            simulated_success_rate: default_success_rate(),
            ocr_endpoint: default_ocr_endpoint(),
            ocr_model: default_ocr_model(),
        }
    }
}

impl Settings {
    /// Bearer token for the remote store; the environment wins over the file.
    pub fn remote_token(&self) -> Option<String> {
        first_secret([std::env::var("KAKEIBO_REMOTE_TOKEN").ok(), self.remote_token.clone()])
    }

    /// `GEMINI_API_KEY`, then `API_KEY`.
    pub fn ocr_api_key(&self) -> Option<String> {
        first_secret([std::env::var("GEMINI_API_KEY").ok(), std::env::var("API_KEY").ok()])
    }

    pub fn db_path(&self) -> PathBuf {
        PathBuf::from(&self.data_dir).join(crate::db::DB_FILE)
    }
}

fn settings_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("kakeibo")
        .join("settings.json")
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("Documents")
        .join("kakeibo")
}

/// First candidate that is set and non-empty.
fn first_secret<const N: usize>(candidates: [Option<String>; N]) -> Option<String> {
    candidates.into_iter().flatten().find(|s| !s.is_empty())
}

pub fn load_settings() -> Settings {
    load_settings_from(&settings_path())
}

fn load_settings_from(path: &Path) -> Settings {
    if path.exists() {
        let content = std::fs::read_to_string(path).unwrap_or_default();
        match serde_json::from_str(&content) {
            Ok(settings) => settings,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "unreadable settings; using defaults");
                Settings::default()
            }
        }
    } else {
        Settings::default()
    }
}

pub fn save_settings(settings: &Settings) -> Result<()> {
    save_settings_to(&settings_path(), settings)
}

fn save_settings_to(path: &Path, settings: &Settings) -> Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let json = serde_json::to_string_pretty(settings)
        .map_err(|e| KakeiboError::Settings(e.to_string()))?;
    std::fs::write(path, format!("{json}\n"))?;
    Ok(())
}

pub fn shellexpand_path(path: &str) -> String {
    if path.starts_with('~') {
        if let Some(home) = dirs::home_dir() {
            return path.replacen('~', &home.to_string_lossy(), 1);
        }
    }
    std::fs::canonicalize(path)
        .unwrap_or_else(|_| PathBuf::from(path))
        .to_string_lossy()
        .to_string()
}
