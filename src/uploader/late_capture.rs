use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use super::coordinator::upload_capture;
use super::progress_tracker::{add_total_screenshots, ProgressState, UploadEvent};
use super::session_client::SessionUploader;

/// File names already handed to the uploader during one job.
pub(crate) type AttemptedSet = Arc<Mutex<HashSet<String>>>;

/// Claim `filename` for upload. Returns false if it was already claimed.
pub(crate) fn claim(attempted: &AttemptedSet, filename: &str) -> bool {
    match attempted.lock() {
        Ok(mut set) => set.insert(filename.to_string()),
        Err(e) => {
            log::warn!("Failed to lock attempted uploads (non-critical): {}", e);
            true
        }
    }
}

/// Connects the relocator to an active upload. Captures offered while the
/// gate is open are uploaded into the running job; otherwise they are ignored.
#[derive(Debug, Clone, Default)]
pub struct LateCaptureGate {
    inner: Arc<Mutex<Option<UnboundedSender<PathBuf>>>>,
}

impl LateCaptureGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open the gate for a new job. A previously open gate is replaced.
    pub fn open(&self) -> UnboundedReceiver<PathBuf> {
        let (tx, rx) = mpsc::unbounded_channel();
        match self.inner.lock() {
            Ok(mut slot) => *slot = Some(tx),
            Err(e) => log::error!("Failed to open late capture gate (non-critical): {}", e),
        }
        rx
    }

    pub fn close(&self) {
        match self.inner.lock() {
            Ok(mut slot) => {
                if slot.take().is_some() {
                    log::debug!("Late capture gate closed");
                }
            }
            Err(e) => log::error!("Failed to close late capture gate (non-critical): {}", e),
        }
    }

    pub fn is_open(&self) -> bool {
        self.inner
            .lock()
            .map(|slot| slot.as_ref().is_some_and(|tx| !tx.is_closed()))
            .unwrap_or(false)
    }

    /// Hand a freshly relocated capture to the active upload, if any.
    pub fn offer(&self, path: &Path) -> bool {
        let Ok(slot) = self.inner.lock() else {
            log::warn!("Late capture gate lock poisoned, not offering {}", path.display());
            return false;
        };
        match slot.as_ref() {
            Some(tx) => tx.send(path.to_path_buf()).is_ok(),
            None => false,
        }
    }
}

/// Upload captures arriving through the gate until it closes.
pub(crate) async fn upload_late_captures(
    uploader: SessionUploader,
    session_id: String,
    mut captures: UnboundedReceiver<PathBuf>,
    attempted: AttemptedSet,
    progress_state: ProgressState,
    events: UnboundedSender<UploadEvent>,
) {
    while let Some(path) = captures.recv().await {
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();

        if filename.is_empty() || !claim(&attempted, &filename) {
            log::debug!("Skipping late capture {} (already handled)", path.display());
            continue;
        }

        log::info!("New screenshot {} during upload {}, uploading", filename, session_id);
        add_total_screenshots(&progress_state, &session_id, 1);

        upload_capture(&uploader, &session_id, &path, &filename, &progress_state, &events).await;
    }

    log::debug!("Late capture uploads for {} finished", session_id);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offer_requires_open_gate() {
        let gate = LateCaptureGate::new();
        assert!(!gate.is_open());
        assert!(!gate.offer(Path::new("/tmp/a.png")));

        let mut rx = gate.open();
        assert!(gate.is_open());
        assert!(gate.offer(Path::new("/tmp/a.png")));
        assert_eq!(rx.try_recv().unwrap(), PathBuf::from("/tmp/a.png"));

        gate.close();
        assert!(!gate.is_open());
        assert!(!gate.offer(Path::new("/tmp/b.png")));
    }

    #[test]
    fn test_reopening_replaces_previous_receiver() {
        let gate = LateCaptureGate::new();
        let mut first = gate.open();
        let mut second = gate.open();

        assert!(gate.offer(Path::new("x.png")));
        assert!(first.try_recv().is_err());
        assert_eq!(second.try_recv().unwrap(), PathBuf::from("x.png"));
    }

    #[test]
    fn test_claim_is_once_per_name() {
        let attempted: AttemptedSet = Arc::default();
        assert!(claim(&attempted, "a.png"));
        assert!(!claim(&attempted, "a.png"));
        assert!(claim(&attempted, "b.png"));
    }
}
