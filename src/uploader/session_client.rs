use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::time::Duration;

use crate::config::Config;
use crate::errors::{AppError, AppResult};
use crate::metadata_store::Comments;

/// Body of `POST {api}/v2/{session}/upload`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingPayload {
    pub training_id: String,
    pub training_name: String,
    /// Initials only; the full name never leaves the machine.
    pub trainee_name: String,
    pub date: String,
    pub general_notes: String,
    pub screenshot_comments: Comments,
}

/// Body of `POST {api}/{session}/upload`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreenshotPayload {
    pub file: String,
    pub filename: String,
}

impl ScreenshotPayload {
    pub fn new(filename: &str, bytes: &[u8]) -> Self {
        Self {
            file: STANDARD.encode(bytes),
            filename: filename.to_string(),
        }
    }
}

/// Share links for the debrief pages of one upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebriefLinks {
    pub trainer: String,
    pub trainee: String,
}

/// HTTP boundary to the review service. Holds no per-session state.
#[derive(Debug, Clone)]
pub struct SessionUploader {
    client: Client,
    api_base_url: String,
    share_base_url: String,
}

impl SessionUploader {
    pub fn new(api_base_url: &str, share_base_url: &str, timeout: Duration) -> AppResult<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            api_base_url: api_base_url.trim_end_matches('/').to_string(),
            share_base_url: share_base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &Config) -> AppResult<Self> {
        Self::new(
            &config.api_base_url,
            &config.share_base_url,
            config.request_timeout(),
        )
    }

    pub fn training_data_url(&self, session_id: &str) -> String {
        format!("{}/v2/{}/upload", self.api_base_url, session_id)
    }

    pub fn screenshot_url(&self, session_id: &str) -> String {
        format!("{}/{}/upload", self.api_base_url, session_id)
    }

    pub async fn upload_training_data(
        &self,
        session_id: &str,
        payload: &TrainingPayload,
    ) -> AppResult<()> {
        let url = self.training_data_url(session_id);
        log::debug!("Uploading training data to {}", url);
        let response = self.client.post(&url).json(payload).send().await?;
        check_response(response).await
    }

    pub async fn upload_screenshot(
        &self,
        session_id: &str,
        payload: &ScreenshotPayload,
    ) -> AppResult<()> {
        let url = self.screenshot_url(session_id);
        log::debug!("Uploading {} to {}", payload.filename, url);
        let response = self.client.post(&url).json(payload).send().await?;
        check_response(response).await
    }

    /// Read, encode and upload one capture file.
    pub async fn upload_screenshot_file(&self, session_id: &str, path: &Path) -> AppResult<()> {
        let filename = path
            .file_name()
            .ok_or_else(|| AppError::file_not_found(&path.to_string_lossy()))?
            .to_string_lossy()
            .to_string();
        let bytes = tokio::fs::read(path).await?;
        self.upload_screenshot(session_id, &ScreenshotPayload::new(&filename, &bytes))
            .await
    }

    pub fn debrief_links(&self, session_id: &str) -> DebriefLinks {
        DebriefLinks {
            trainer: format!("{}/trainer/{}", self.share_base_url, session_id),
            trainee: format!("{}/trainee/{}", self.share_base_url, session_id),
        }
    }
}

async fn check_response(response: reqwest::Response) -> AppResult<()> {
    let status = response.status();
    if status == StatusCode::OK {
        return Ok(());
    }

    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    Err(AppError::upload_failed(status.as_u16(), body))
}

/// Short identifier for a display name, sent instead of the name itself.
///
/// Precedence: initials of the first two words, then the first two capital
/// letters of a single word, then its first two letters, then `"XX"`.
pub fn get_initials(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c.is_ascii_alphabetic() { c } else { ' ' })
        .collect();
    let cleaned = cleaned.trim();
    let words: Vec<&str> = cleaned.split_whitespace().collect();

    let initials: String = if words.len() >= 2 {
        words[..2].iter().filter_map(|w| w.chars().next()).collect()
    } else {
        let capitals: Vec<char> = cleaned.chars().filter(|c| c.is_ascii_uppercase()).collect();
        if capitals.len() >= 2 {
            capitals[..2].iter().collect()
        } else {
            cleaned.chars().take(2).collect()
        }
    };

    if initials.is_empty() {
        "XX".to_string()
    } else {
        initials.to_uppercase()
    }
}
