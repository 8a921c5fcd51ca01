//! An open session: watcher, relocator, metadata and uploads wired together.

use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::errors::AppResult;
use crate::metadata_store::MetadataStore;
use crate::relocator::{RefreshCallback, RelocatedScreenshot, ScreenshotRelocator};
use crate::session::Session;
use crate::uploader::{LateCaptureGate, SessionUploader, UploadCoordinator, UploadHandle};
use crate::watcher::DirectoryWatcher;

pub struct CaptureSession {
    session: Session,
    store: MetadataStore,
    extensions: Vec<String>,
    settle_delay: std::time::Duration,
    watcher: DirectoryWatcher,
    relocator_task: Option<JoinHandle<()>>,
    gate: LateCaptureGate,
    coordinator: UploadCoordinator,
}

impl CaptureSession {
    pub fn open(config: &Config, session: Session) -> AppResult<Self> {
        let uploader = SessionUploader::from_config(config)?;
        Ok(Self {
            store: MetadataStore::for_session(&session),
            extensions: config.image_extensions.clone(),
            settle_delay: config.settle_delay(),
            watcher: DirectoryWatcher::new(config.image_extensions.clone()),
            relocator_task: None,
            gate: LateCaptureGate::new(),
            coordinator: UploadCoordinator::new(uploader),
            session,
        })
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn store(&self) -> &MetadataStore {
        &self.store
    }

    pub fn coordinator(&self) -> &UploadCoordinator {
        &self.coordinator
    }

    pub fn screenshots(&self) -> AppResult<Vec<String>> {
        self.session.list_screenshots(&self.extensions)
    }

    pub fn delete_screenshot(&self, name: &str) -> AppResult<()> {
        self.session.delete_screenshot(name, &self.extensions)
    }

    pub fn is_watching(&self) -> bool {
        self.watcher.is_running()
    }

    /// Watch `source` and move new captures into this session. The returned
    /// stream yields one item per screenshot that became available.
    pub async fn start_watching(
        &mut self,
        source: &Path,
    ) -> AppResult<UnboundedReceiver<RelocatedScreenshot>> {
        self.stop_watching().await;

        let events = self.watcher.start(source)?;
        let (available_tx, available_rx) = mpsc::unbounded_channel();
        let on_relocated: RefreshCallback = Arc::new(move |relocated: &RelocatedScreenshot| {
            if available_tx.send(relocated.clone()).is_err() {
                log::debug!("No listener for new screenshot {}", relocated.filename);
            }
        });

        let relocator = ScreenshotRelocator::new(
            self.session.screenshots_dir(),
            self.settle_delay,
            self.gate.clone(),
            Some(on_relocated),
        );
        self.relocator_task = Some(relocator.spawn(events));
        Ok(available_rx)
    }

    /// Stop the watcher and wait until every pending move has finished.
    pub async fn stop_watching(&mut self) {
        self.watcher.stop();
        if let Some(task) = self.relocator_task.take() {
            if let Err(e) = task.await {
                log::error!("Relocator task ended abnormally: {}", e);
            }
        }
    }

    /// Start the finalize upload. New captures are included while it runs.
    pub fn finalize(&self) -> UploadHandle {
        self.coordinator.start(&self.session, self.gate.clone())
    }

    pub async fn close(mut self) {
        self.stop_watching().await;
        self.gate.close();
        log::info!("Closed session {}", self.session.folder.display());
    }
}
