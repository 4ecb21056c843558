use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use moodboard_contracts::chat::CaptionKeywords;

use crate::gemini::{GeminiSettings, DEFAULT_API_BASE, DEFAULT_IMAGE_MODEL};
use crate::store::{StoreBackend, StoreSettings};

pub const DEFAULT_SQLITE_PATH: &str = "moodboard.db";
pub const DEFAULT_STYLES_DIR: &str = "styles";
const DEFAULT_REQUEST_TIMEOUT_S: u64 = 120;

#[derive(Debug, Clone)]
pub struct BotConfig {
    pub telegram_token: Option<String>,
    pub gemini: GeminiSettings,
    pub store: StoreSettings,
    pub events_path: Option<PathBuf>,
    pub caption_keywords: CaptionKeywords,
}

impl BotConfig {
    /// Reads `.env` (when present) and then the process environment.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(non_empty_env)
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let backend = match lookup("MOODBOARD_STORE") {
            Some(raw) => raw
                .parse::<StoreBackend>()
                .map_err(anyhow::Error::msg)
                .context("invalid MOODBOARD_STORE")?,
            None => StoreBackend::default(),
        };
        let request_timeout_s = match lookup("MOODBOARD_REQUEST_TIMEOUT") {
            Some(raw) => raw
                .trim()
                .parse::<u64>()
                .with_context(|| format!("invalid MOODBOARD_REQUEST_TIMEOUT '{raw}'"))?,
            None => DEFAULT_REQUEST_TIMEOUT_S,
        };
        let caption_keywords = lookup("MOODBOARD_CAPTION_KEYWORDS")
            .map(|raw| CaptionKeywords::new(raw.split(',')))
            .unwrap_or_default();

        Ok(Self {
            telegram_token: lookup("TELEGRAM_BOT_TOKEN"),
            gemini: GeminiSettings {
                api_base: lookup("GEMINI_API_BASE")
                    .map(|value| value.trim_end_matches('/').to_string())
                    .unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
                api_key: lookup("GEMINI_API_KEY").or_else(|| lookup("GOOGLE_API_KEY")),
                model: lookup("MOODBOARD_IMAGE_MODEL")
                    .unwrap_or_else(|| DEFAULT_IMAGE_MODEL.to_string()),
                request_timeout: Duration::from_secs(request_timeout_s.max(1)),
            },
            store: StoreSettings {
                backend,
                sqlite_path: lookup("MOODBOARD_SQLITE_PATH")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_SQLITE_PATH)),
                styles_dir: lookup("MOODBOARD_STYLES_DIR")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_STYLES_DIR)),
            },
            events_path: lookup("MOODBOARD_EVENTS").map(PathBuf::from),
            caption_keywords,
        })
    }
}

pub fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
