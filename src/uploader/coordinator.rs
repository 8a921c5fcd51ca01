use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::{AbortHandle, JoinHandle};

use super::late_capture::{claim, upload_late_captures, AttemptedSet, LateCaptureGate};
use super::progress_tracker::*;
use super::session_client::{get_initials, DebriefLinks, SessionUploader, TrainingPayload};
use crate::errors::{AppError, AppResult};
use crate::metadata_store::MetadataStore;
use crate::session::Session;

const TRAINING_DATA_ITEM: &str = "training data";

/// Starts finalize uploads and keeps their progress snapshots.
#[derive(Debug, Clone)]
pub struct UploadCoordinator {
    uploader: SessionUploader,
    progress_state: ProgressState,
}

impl UploadCoordinator {
    pub fn new(uploader: SessionUploader) -> Self {
        Self {
            uploader,
            progress_state: ProgressState::default(),
        }
    }

    pub fn progress_state(&self) -> ProgressState {
        self.progress_state.clone()
    }

    /// Latest snapshot of an upload started by this coordinator.
    pub fn progress(&self, session_id: &str) -> Option<UploadProgress> {
        safe_progress_read(&self.progress_state, session_id, "progress query", |p| {
            p.clone()
        })
    }

    /// Forget a finished upload, returning its final snapshot.
    pub fn take_progress(&self, session_id: &str) -> Option<UploadProgress> {
        take_progress(&self.progress_state, session_id)
    }

    /// Ask a running upload to stop before its next item.
    pub fn cancel(&self, session_id: &str) {
        mark_session_cancelled(&self.progress_state, session_id);
    }

    /// Start uploading `session` in the background and return immediately.
    /// While the job runs, captures offered through `gate` are uploaded too.
    pub fn start(&self, session: &Session, gate: LateCaptureGate) -> UploadHandle {
        let session_id = uuid::Uuid::new_v4().to_string();
        register_session(&self.progress_state, &session_id);

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let attempted: AttemptedSet = Arc::new(Mutex::new(Default::default()));

        let late = tokio::spawn(upload_late_captures(
            self.uploader.clone(),
            session_id.clone(),
            gate.open(),
            attempted.clone(),
            self.progress_state.clone(),
            events_tx.clone(),
        ));
        let late_abort = late.abort_handle();
        let handle_late_abort = late_abort.clone();

        let job = UploadJob {
            uploader: self.uploader.clone(),
            session: session.clone(),
            session_id: session_id.clone(),
            progress_state: self.progress_state.clone(),
            events: events_tx,
            attempted,
        };

        let job_gate = gate.clone();
        let task = tokio::spawn(async move {
            let result = job.run(late, &job_gate).await;
            if let Err(e) = &result {
                job_gate.close();
                late_abort.abort();
                log::info!("Upload {} stopped: {}", job.session_id, e);
            }
            result
        });

        log::info!(
            "Started upload {} for {} / {}",
            session_id,
            session.trainee_name,
            session.training_name
        );

        UploadHandle {
            session_id,
            events: events_rx,
            task,
            late_abort: handle_late_abort,
            progress_state: self.progress_state.clone(),
            gate,
        }
    }
}

/// Handle to one running finalize upload.
pub struct UploadHandle {
    session_id: String,
    events: UnboundedReceiver<UploadEvent>,
    task: JoinHandle<AppResult<DebriefLinks>>,
    late_abort: AbortHandle,
    progress_state: ProgressState,
    gate: LateCaptureGate,
}

impl UploadHandle {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Next progress, item or completion event. `None` once the job is over
    /// and every event has been read.
    pub async fn next_event(&mut self) -> Option<UploadEvent> {
        self.events.recv().await
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Abort the upload immediately. Requests already sent are not undone.
    pub fn cancel(&self) {
        self.gate.close();
        self.task.abort();
        self.late_abort.abort();
        mark_session_cancelled(&self.progress_state, &self.session_id);
    }

    /// Wait for the job to end and return the share links.
    pub async fn wait(self) -> AppResult<DebriefLinks> {
        match self.task.await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => {
                Err(AppError::upload_cancelled("upload", &self.session_id))
            }
            Err(e) => Err(AppError::Internal(format!("upload task failed: {}", e))),
        }
    }
}

struct UploadJob {
    uploader: SessionUploader,
    session: Session,
    session_id: String,
    progress_state: ProgressState,
    events: UnboundedSender<UploadEvent>,
    attempted: AttemptedSet,
}

impl UploadJob {
    async fn run(&self, late: JoinHandle<()>, gate: &LateCaptureGate) -> AppResult<DebriefLinks> {
        self.emit_progress(UploadPhase::TrainingData, 0);
        self.upload_training_data().await;
        self.emit_progress(UploadPhase::TrainingData, 50);
        self.ensure_not_cancelled("training data")?;

        self.emit_progress(UploadPhase::Screenshots, 50);
        self.upload_screenshots().await?;
        self.emit_progress(UploadPhase::Screenshots, 100);
        self.ensure_not_cancelled("screenshots")?;

        self.emit_progress(UploadPhase::Links, 100);
        let links = self.uploader.debrief_links(&self.session_id);

        gate.close();
        if let Err(e) = late.await {
            log::warn!("Late capture uploads for {} ended abnormally: {}", self.session_id, e);
        }

        mark_session_completed(&self.progress_state, &self.session_id, &links);
        safe_emit_event(
            &self.events,
            UploadEvent::Completed {
                session_id: self.session_id.clone(),
                links: links.clone(),
            },
        );
        Ok(links)
    }

    async fn upload_training_data(&self) {
        let store = MetadataStore::for_session(&self.session);
        let payload = TrainingPayload {
            training_id: self.session_id.clone(),
            training_name: self.session.training_name.clone(),
            trainee_name: get_initials(&self.session.trainee_name),
            date: self.session.date.clone(),
            general_notes: store.load_notes(),
            screenshot_comments: store.get_all_comments(),
        };

        match self
            .uploader
            .upload_training_data(&self.session_id, &payload)
            .await
        {
            Ok(()) => {
                log::info!("Training data uploaded for {}", self.session_id);
                safe_emit_event(
                    &self.events,
                    UploadEvent::ItemUploaded {
                        session_id: self.session_id.clone(),
                        item: TRAINING_DATA_ITEM.to_string(),
                    },
                );
            }
            Err(e) => {
                let failure = update_progress_failure(
                    &self.progress_state,
                    &self.session_id,
                    TRAINING_DATA_ITEM,
                    &e,
                    false,
                );
                safe_emit_event(
                    &self.events,
                    UploadEvent::ItemFailed {
                        session_id: self.session_id.clone(),
                        failure,
                    },
                );
            }
        }
    }

    /// Uploads every regular file in the capture folder, not only images.
    async fn upload_screenshots(&self) -> AppResult<()> {
        let screenshots = self
            .session
            .list_capture_files()
            .unwrap_or_else(|e| {
                log::error!(
                    "Failed to list screenshots in {}: {}",
                    self.session.screenshots_dir().display(),
                    e
                );
                Vec::new()
            });

        if screenshots.is_empty() {
            log::warn!("No screenshots to upload for session {}", self.session_id);
        }

        // Late captures may already have claimed some of these.
        let pending: Vec<String> = screenshots
            .into_iter()
            .filter(|filename| claim(&self.attempted, filename))
            .collect();
        add_total_screenshots(&self.progress_state, &self.session_id, pending.len());

        let dir = self.session.screenshots_dir();
        for filename in pending {
            self.ensure_not_cancelled("screenshots")?;
            upload_capture(
                &self.uploader,
                &self.session_id,
                &dir.join(&filename),
                &filename,
                &self.progress_state,
                &self.events,
            )
            .await;
        }

        Ok(())
    }

    fn emit_progress(&self, phase: UploadPhase, percent: u8) {
        let percent = advance_progress(&self.progress_state, &self.session_id, phase, percent);
        safe_emit_event(
            &self.events,
            UploadEvent::Progress {
                session_id: self.session_id.clone(),
                phase,
                percent,
            },
        );
    }

    fn ensure_not_cancelled(&self, phase: &str) -> AppResult<()> {
        if is_session_cancelled(&self.progress_state, &self.session_id) {
            return Err(AppError::upload_cancelled(phase, &self.session_id));
        }
        Ok(())
    }
}

/// Upload one capture file and record the outcome. Failures never propagate.
pub(super) async fn upload_capture(
    uploader: &SessionUploader,
    session_id: &str,
    path: &Path,
    filename: &str,
    progress_state: &ProgressState,
    events: &UnboundedSender<UploadEvent>,
) {
    match uploader.upload_screenshot_file(session_id, path).await {
        Ok(()) => {
            update_progress_success(progress_state, session_id, filename);
            safe_emit_event(
                events,
                UploadEvent::ItemUploaded {
                    session_id: session_id.to_string(),
                    item: filename.to_string(),
                },
            );
        }
        Err(e) => {
            let failure = update_progress_failure(progress_state, session_id, filename, &e, true);
            safe_emit_event(
                events,
                UploadEvent::ItemFailed {
                    session_id: session_id.to_string(),
                    failure,
                },
            );
        }
    }
}
