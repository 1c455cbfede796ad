use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

const DEFAULT_ENV_PREFIX: &str = "SPRINGRAM";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub tracking: TrackingConfig,
    #[serde(default)]
    pub profile: ProfileConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            user_agent: default_user_agent(),
            timeout: default_timeout(),
        }
    }
}

fn default_base_url() -> String {
    "http://localhost:8080".into()
}

fn default_user_agent() -> String {
    format!("springram/{}", env!("CARGO_PKG_VERSION"))
}

fn default_timeout() -> Duration {
    Duration::from_secs(20)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeedConfig {
    #[serde(default = "default_page_size")]
    pub page_size: i32,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
        }
    }
}

fn default_page_size() -> i32 {
    20
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchConfig {
    #[serde(default = "default_debounce", with = "humantime_serde")]
    pub debounce: Duration,
    #[serde(default = "default_suggestion_limit")]
    pub suggestion_limit: u32,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            debounce: default_debounce(),
            suggestion_limit: default_suggestion_limit(),
        }
    }
}

fn default_debounce() -> Duration {
    Duration::from_millis(240)
}

fn default_suggestion_limit() -> u32 {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrackingConfig {
    #[serde(default = "default_dwell", with = "humantime_serde")]
    pub dwell: Duration,
    #[serde(default = "default_visibility_threshold")]
    pub visibility_threshold: f64,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            dwell: default_dwell(),
            visibility_threshold: default_visibility_threshold(),
        }
    }
}

fn default_dwell() -> Duration {
    Duration::from_millis(250)
}

fn default_visibility_threshold() -> f64 {
    0.6
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProfileConfig {
    #[serde(default = "default_recent_posts_limit")]
    pub recent_posts_limit: u32,
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            recent_posts_limit: default_recent_posts_limit(),
        }
    }
}

fn default_recent_posts_limit() -> u32 {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct StorageConfig {
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    pub config_file: Option<PathBuf>,
    pub env_prefix: Option<String>,
}

/// File first (missing fields fall back to the serde defaults), then the
/// environment on top; an env key only touches the field it names.
pub fn load(options: LoadOptions) -> Result<Config> {
    let mut cfg = Config::default();

    if let Some(path) = options.config_file.as_ref() {
        if path.exists() {
            cfg = read_config_file(path)?;
        }
    } else if let Some(default_path) = default_config_path() {
        if default_path.exists() {
            cfg = read_config_file(&default_path)?;
        }
    }

    let prefix = options.env_prefix.as_deref().unwrap_or(DEFAULT_ENV_PREFIX);
    apply_env(&mut cfg, prefix);

    Ok(cfg)
}

fn read_config_file(path: &Path) -> Result<Config> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file at {}", path.display()))?;
    let config: Config = serde_yaml::from_str(&data)
        .with_context(|| format!("Failed to parse config file at {}", path.display()))?;
    Ok(config)
}

fn apply_env(cfg: &mut Config, prefix: &str) {
    let mut map: HashMap<String, String> = HashMap::new();
    let upper_prefix = format!("{}_", prefix.to_uppercase());

    for (key, value) in env::vars() {
        if let Some(stripped) = key.strip_prefix(&upper_prefix) {
            let normalized = stripped.to_ascii_lowercase().replace("__", ".");
            map.insert(normalized, value);
        }
    }

    for (key, value) in map {
        apply_env_value(cfg, &key, value);
    }
}

fn apply_env_value(cfg: &mut Config, key: &str, value: String) {
    match key {
        "api.base_url" => cfg.api.base_url = value,
        "api.user_agent" => cfg.api.user_agent = value,
        "api.timeout" => {
            if let Ok(duration) = humantime::parse_duration(&value) {
                cfg.api.timeout = duration;
            }
        }
        "feed.page_size" => {
            if let Ok(parsed) = value.parse::<i32>() {
                cfg.feed.page_size = parsed;
            }
        }
        "search.debounce" => {
            if let Ok(duration) = humantime::parse_duration(&value) {
                cfg.search.debounce = duration;
            }
        }
        "search.suggestion_limit" => {
            if let Ok(parsed) = value.parse::<u32>() {
                cfg.search.suggestion_limit = parsed;
            }
        }
        "tracking.dwell" => {
            if let Ok(duration) = humantime::parse_duration(&value) {
                cfg.tracking.dwell = duration;
            }
        }
        "tracking.visibility_threshold" => {
            if let Ok(parsed) = value.parse::<f64>() {
                cfg.tracking.visibility_threshold = parsed;
            }
        }
        "profile.recent_posts_limit" => {
            if let Ok(parsed) = value.parse::<u32>() {
                cfg.profile.recent_posts_limit = parsed;
            }
        }
        "storage.path" => cfg.storage.path = Some(PathBuf::from(value)),
        _ => {}
    }
}

pub fn default_path() -> Option<PathBuf> {
    default_config_path()
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("springram").join("config.yaml"))
}
