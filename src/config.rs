use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::errors::{AppError, AppResult};

pub const DEFAULT_API_BASE_URL: &str = "https://yschaffler.de/api/Vatsim/traineemanager/training";
pub const DEFAULT_SHARE_BASE_URL: &str = "https://yschaffler.de/vatsim/traineemanager/training";

const APP_DIR_NAME: &str = "Debrief Capture";
const MAX_SETTLE_DELAY_MS: u64 = 60_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Folder holding `<trainee>/<training>` session folders.
    pub session_root: Option<PathBuf>,
    /// Output folder of the screenshot tool.
    pub screenshot_source: Option<PathBuf>,
    pub api_base_url: String,
    pub share_base_url: String,
    pub settle_delay_ms: u64,
    pub request_timeout_secs: u64,
    pub image_extensions: Vec<String>,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            session_root: None,
            screenshot_source: get_default_screenshot_source(),
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            share_base_url: DEFAULT_SHARE_BASE_URL.to_string(),
            settle_delay_ms: 500,
            request_timeout_secs: 120,
            image_extensions: ["png", "jpg", "jpeg", "bmp", "gif", "webp"]
                .iter()
                .map(|ext| ext.to_string())
                .collect(),
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn log_filter(&self) -> log::LevelFilter {
        self.log_level.parse().unwrap_or(log::LevelFilter::Info)
    }
}

pub fn get_config_path() -> AppResult<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or_else(|| AppError::Config("Could not find config directory".to_string()))?
        .join(APP_DIR_NAME);

    fs::create_dir_all(&config_dir)?;
    Ok(config_dir.join("config.json"))
}

/// Load the configuration from the platform config directory.
pub fn load_config() -> AppResult<Config> {
    load_config_from(&get_config_path()?)
}

/// Load the configuration from `config_path`, writing defaults if the file
/// does not exist yet. An unparsable file falls back to defaults.
pub fn load_config_from(config_path: &Path) -> AppResult<Config> {
    if config_path.exists() {
        let config_str = fs::read_to_string(config_path)?;
        let config: Config = serde_json::from_str(&config_str).unwrap_or_else(|e| {
            log::warn!("Failed to parse config file: {}. Using defaults.", e);
            Config::default()
        });

        validate_config(&config).map_err(|e| {
            AppError::Config(format!("Invalid configuration in {}: {}", config_path.display(), e))
        })?;
        Ok(config)
    } else {
        let default_config = Config::default();
        save_config_to(config_path, &default_config)?;
        Ok(default_config)
    }
}

pub fn save_config_to(config_path: &Path, config: &Config) -> AppResult<()> {
    validate_config(config)?;

    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent)?;
    }

    // Create backup of existing config
    if config_path.exists() {
        let backup_path = config_path.with_extension("json.bak");
        if let Err(e) = fs::copy(config_path, &backup_path) {
            log::warn!("Failed to create config backup: {}", e);
        }
    }

    let config_str = serde_json::to_string_pretty(config)?;
    fs::write(config_path, config_str)?;

    log::info!("Configuration saved to {}", config_path.display());
    Ok(())
}

/// Default output folder of the OS screenshot tool, if it exists.
pub fn get_default_screenshot_source() -> Option<PathBuf> {
    if let Some(pictures_dir) = dirs::picture_dir() {
        let screenshots = pictures_dir.join("Screenshots");
        if screenshots.is_dir() {
            return Some(screenshots);
        }
    }

    #[cfg(target_os = "macos")]
    {
        if let Some(desktop) = dirs::desktop_dir() {
            if desktop.is_dir() {
                return Some(desktop);
            }
        }
    }

    None
}

pub fn validate_config(config: &Config) -> AppResult<()> {
    for (field, url) in [
        ("api_base_url", &config.api_base_url),
        ("share_base_url", &config.share_base_url),
    ] {
        if !(url.starts_with("https://") || url.starts_with("http://")) {
            return Err(AppError::validation(field, "Must be an http(s) URL"));
        }
    }

    if config.settle_delay_ms > MAX_SETTLE_DELAY_MS {
        return Err(AppError::validation("settle_delay_ms", "Must be 60000ms or less"));
    }

    if config.request_timeout_secs == 0 {
        return Err(AppError::validation("request_timeout_secs", "Must be greater than 0"));
    }

    if config.image_extensions.iter().all(|ext| ext.trim().is_empty()) {
        return Err(AppError::validation("image_extensions", "At least one extension is required"));
    }

    let valid_log_levels = ["off", "error", "warn", "info", "debug", "trace"];
    if !valid_log_levels.contains(&config.log_level.as_str()) {
        return Err(AppError::validation("log_level", "Must be a valid log level"));
    }

    Ok(())
}

/// Resolve the session root. A path given on the command line wins and is
/// remembered; otherwise the configured one must name an existing directory.
pub fn resolve_session_root(
    config: &mut Config,
    config_path: &Path,
    supplied: Option<PathBuf>,
) -> AppResult<PathBuf> {
    if let Some(path) = supplied {
        if !path.is_dir() {
            return Err(AppError::Config(format!(
                "Session root {} is not a directory",
                path.display()
            )));
        }
        if config.session_root.as_deref() != Some(path.as_path()) {
            config.session_root = Some(path.clone());
            save_config_to(config_path, config)?;
            log::info!("Remembered session root {}", path.display());
        }
        return Ok(path);
    }

    match &config.session_root {
        Some(path) if path.is_dir() => Ok(path.clone()),
        Some(path) => Err(AppError::Config(format!(
            "Configured session root {} does not exist. Pass --session-root to choose another one.",
            path.display()
        ))),
        None => Err(AppError::Config(
            "No session root configured. Pass --session-root to choose one.".to_string(),
        )),
    }
}

/// Resolve the directory the screenshot tool writes into.
pub fn resolve_screenshot_source(config: &Config, supplied: Option<PathBuf>) -> AppResult<PathBuf> {
    let source = supplied
        .or_else(|| config.screenshot_source.clone())
        .ok_or_else(|| {
            AppError::Config(
                "No screenshot folder found. Set screenshot_source or pass --source.".to_string(),
            )
        })?;

    if !source.is_dir() {
        return Err(AppError::Config(format!(
            "Screenshot folder {} does not exist",
            source.display()
        )));
    }

    Ok(source)
}
