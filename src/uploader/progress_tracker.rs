use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::UnboundedSender;

use super::session_client::DebriefLinks;
use crate::errors::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadPhase {
    Pending,
    TrainingData,
    Screenshots,
    Links,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedUpload {
    /// `"training data"` or a screenshot file name.
    pub item: String,
    pub error: String,
    pub status: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadProgress {
    pub session_id: String,
    pub phase: UploadPhase,
    pub percent: u8,
    pub total_screenshots: usize,
    pub attempted: usize,
    pub successful_uploads: Vec<String>,
    pub failed_uploads: Vec<FailedUpload>,
    pub session_status: SessionStatus,
    pub links: Option<DebriefLinks>,
}

impl UploadProgress {
    pub fn new(session_id: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            phase: UploadPhase::Pending,
            percent: 0,
            total_screenshots: 0,
            attempted: 0,
            successful_uploads: Vec::new(),
            failed_uploads: Vec::new(),
            session_status: SessionStatus::Active,
            links: None,
        }
    }
}

/// Events delivered to whoever drives the upload from the interactive side.
#[derive(Debug, Clone, PartialEq)]
pub enum UploadEvent {
    Progress {
        session_id: String,
        phase: UploadPhase,
        percent: u8,
    },
    ItemUploaded {
        session_id: String,
        item: String,
    },
    ItemFailed {
        session_id: String,
        failure: FailedUpload,
    },
    Completed {
        session_id: String,
        links: DebriefLinks,
    },
}

/// Progress snapshots of every upload started by a coordinator, by session id.
pub type ProgressState = Arc<Mutex<HashMap<String, UploadProgress>>>;

/// Safe progress state update
pub fn safe_progress_update<F>(
    progress_state: &ProgressState,
    session_id: &str,
    operation: &str,
    f: F,
) -> bool
where
    F: FnOnce(&mut UploadProgress),
{
    match progress_state.lock() {
        Ok(mut progress) => {
            if let Some(session_progress) = progress.get_mut(session_id) {
                f(session_progress);
                true
            } else {
                log::warn!(
                    "Session {} not found for {} operation",
                    session_id,
                    operation
                );
                false
            }
        }
        Err(e) => {
            log::error!(
                "Failed to acquire progress lock for {} in session {} (non-critical): {}",
                operation,
                session_id,
                e
            );
            false
        }
    }
}

pub fn safe_progress_read<F, R>(
    progress_state: &ProgressState,
    session_id: &str,
    operation: &str,
    f: F,
) -> Option<R>
where
    F: FnOnce(&UploadProgress) -> R,
{
    match progress_state.lock() {
        Ok(progress) => progress.get(session_id).map(f),
        Err(e) => {
            log::error!(
                "Failed to acquire progress lock for {} in session {} (non-critical): {}",
                operation,
                session_id,
                e
            );
            None
        }
    }
}

/// Emit an upload event; a dropped receiver is not an error for the job.
pub fn safe_emit_event(events: &UnboundedSender<UploadEvent>, event: UploadEvent) -> bool {
    match events.send(event) {
        Ok(()) => true,
        Err(e) => {
            log::debug!("Upload event receiver gone (non-critical): {:?}", e.0);
            false
        }
    }
}

pub fn register_session(progress_state: &ProgressState, session_id: &str) {
    match progress_state.lock() {
        Ok(mut progress) => {
            progress.insert(session_id.to_string(), UploadProgress::new(session_id));
        }
        Err(e) => log::error!(
            "Failed to register upload session {} (non-critical): {}",
            session_id,
            e
        ),
    }
}

/// Remove and return a snapshot once its upload is over and has been read.
pub fn take_progress(progress_state: &ProgressState, session_id: &str) -> Option<UploadProgress> {
    match progress_state.lock() {
        Ok(mut progress) => progress.remove(session_id),
        Err(e) => {
            log::error!(
                "Failed to remove upload session {} (non-critical): {}",
                session_id,
                e
            );
            None
        }
    }
}

pub fn is_session_cancelled(progress_state: &ProgressState, session_id: &str) -> bool {
    safe_progress_read(progress_state, session_id, "cancellation check", |progress| {
        progress.session_status == SessionStatus::Cancelled
    })
    .unwrap_or(false)
}

pub fn mark_session_cancelled(progress_state: &ProgressState, session_id: &str) {
    safe_progress_update(progress_state, session_id, "mark cancelled", |progress| {
        if progress.session_status == SessionStatus::Active {
            progress.session_status = SessionStatus::Cancelled;
            log::info!(
                "Upload {} cancelled at {}% with {} screenshots attempted",
                session_id,
                progress.percent,
                progress.attempted
            );
        }
    });
}

/// Move to `phase` and raise the percentage to `percent`. The stored
/// percentage never goes down; the effective value is returned.
pub fn advance_progress(
    progress_state: &ProgressState,
    session_id: &str,
    phase: UploadPhase,
    percent: u8,
) -> u8 {
    let mut effective = percent.min(100);
    safe_progress_update(progress_state, session_id, "advance", |progress| {
        progress.phase = phase;
        progress.percent = progress.percent.max(percent.min(100));
        effective = progress.percent;
        log::debug!("Upload {}: {:?} at {}%", session_id, phase, effective);
    });
    effective
}

pub fn add_total_screenshots(progress_state: &ProgressState, session_id: &str, count: usize) {
    safe_progress_update(progress_state, session_id, "add total", |progress| {
        progress.total_screenshots += count;
    });
}

pub fn update_progress_success(progress_state: &ProgressState, session_id: &str, item: &str) {
    safe_progress_update(progress_state, session_id, "success update", |progress| {
        progress.attempted += 1;
        progress.successful_uploads.push(item.to_string());
        log::info!(
            "Uploaded {} ({}/{})",
            item,
            progress.attempted,
            progress.total_screenshots
        );
    });
}

/// Record a failed item. `counts_as_screenshot` is false for the training data
/// call, which is not part of the screenshot tally.
pub fn update_progress_failure(
    progress_state: &ProgressState,
    session_id: &str,
    item: &str,
    error: &AppError,
    counts_as_screenshot: bool,
) -> FailedUpload {
    let failure = FailedUpload {
        item: item.to_string(),
        error: error.to_string(),
        status: error.status_code(),
    };

    safe_progress_update(progress_state, session_id, "failure update", |progress| {
        if counts_as_screenshot {
            progress.attempted += 1;
        }
        progress.failed_uploads.push(failure.clone());
    });

    log::warn!("Failed to upload {} for session {}: {}", item, session_id, error);
    failure
}

pub fn mark_session_completed(
    progress_state: &ProgressState,
    session_id: &str,
    links: &DebriefLinks,
) {
    safe_progress_update(progress_state, session_id, "mark completed", |progress| {
        progress.phase = UploadPhase::Done;
        progress.session_status = SessionStatus::Completed;
        progress.links = Some(links.clone());

        log::info!(
            "Upload {} completed: {}/{} screenshots uploaded, {} failures",
            session_id,
            progress.successful_uploads.len(),
            progress.total_screenshots,
            progress.failed_uploads.len()
        );
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_with(session_id: &str) -> ProgressState {
        let state: ProgressState = Arc::new(Mutex::new(HashMap::new()));
        register_session(&state, session_id);
        state
    }

    #[test]
    fn test_take_progress_drops_the_snapshot() {
        let state = state_with("s");
        advance_progress(&state, "s", UploadPhase::Screenshots, 50);

        let taken = take_progress(&state, "s").unwrap();
        assert_eq!(taken.percent, 50);
        assert!(take_progress(&state, "s").is_none());
        assert!(!is_session_cancelled(&state, "s"));
        assert!(state.lock().unwrap().is_empty());
    }

    #[test]
    fn test_progress_never_decreases() {
        let state = state_with("s");

        assert_eq!(advance_progress(&state, "s", UploadPhase::TrainingData, 50), 50);
        assert_eq!(advance_progress(&state, "s", UploadPhase::Screenshots, 20), 50);
        assert_eq!(advance_progress(&state, "s", UploadPhase::Screenshots, 250), 100);

        let percent = safe_progress_read(&state, "s", "test", |p| p.percent).unwrap();
        assert_eq!(percent, 100);
    }

    #[test]
    fn test_failures_are_recorded_with_status() {
        let state = state_with("s");
        add_total_screenshots(&state, "s", 2);

        let failure = update_progress_failure(
            &state,
            "s",
            "a.png",
            &AppError::upload_failed(500, "boom"),
            true,
        );
        update_progress_success(&state, "s", "b.png");
        update_progress_failure(&state, "s", "training data", &AppError::upload_failed(404, ""), false);

        assert_eq!(failure.status, Some(500));
        let progress = safe_progress_read(&state, "s", "test", |p| p.clone()).unwrap();
        assert_eq!(progress.attempted, 2);
        assert_eq!(progress.successful_uploads, vec!["b.png"]);
        assert_eq!(progress.failed_uploads.len(), 2);
    }

    #[test]
    fn test_cancel_only_applies_to_active_sessions() {
        let state = state_with("s");
        let links = DebriefLinks {
            trainer: "t".to_string(),
            trainee: "u".to_string(),
        };
        mark_session_completed(&state, "s", &links);
        mark_session_cancelled(&state, "s");

        assert!(!is_session_cancelled(&state, "s"));
        assert!(!is_session_cancelled(&state, "unknown"));

        let other = state_with("o");
        mark_session_cancelled(&other, "o");
        assert!(is_session_cancelled(&other, "o"));
    }

    #[test]
    fn test_unknown_session_updates_are_ignored() {
        let state = state_with("s");
        assert!(!safe_progress_update(&state, "missing", "test", |p| p.percent = 7));
    }
}
