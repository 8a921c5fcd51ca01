//! Watches the screenshot tool's output folder for new image files.

use chrono::{DateTime, Local};
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::errors::{AppError, AppResult};
use crate::security::InputValidator;

/// A new image file appeared in the watched folder.
#[derive(Debug, Clone, PartialEq)]
pub struct ScreenshotEvent {
    pub path: PathBuf,
    pub detected_at: DateTime<Local>,
}

impl ScreenshotEvent {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            detected_at: Local::now(),
        }
    }
}

/// Non-recursive watch on one folder. Dropping the watcher stops it.
pub struct DirectoryWatcher {
    extensions: Vec<String>,
    watcher: Option<RecommendedWatcher>,
    watched: Option<PathBuf>,
}

impl DirectoryWatcher {
    pub fn new(extensions: Vec<String>) -> Self {
        Self {
            extensions,
            watcher: None,
            watched: None,
        }
    }

    /// Start watching `dir`. A previous watch is stopped first, so events are
    /// only ever delivered to the receiver returned by the latest call.
    pub fn start(&mut self, dir: &Path) -> AppResult<UnboundedReceiver<ScreenshotEvent>> {
        self.stop();

        if !dir.is_dir() {
            return Err(AppError::Config(format!(
                "Screenshot folder {} does not exist",
                dir.display()
            )));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let extensions = self.extensions.clone();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            match res {
                Ok(event) => forward_event(&tx, &event, &extensions),
                Err(e) => log::warn!("Screenshot watcher error: {}", e),
            }
        })?;
        watcher.watch(dir, RecursiveMode::NonRecursive)?;

        log::info!("Watching {} for screenshots", dir.display());
        self.watcher = Some(watcher);
        self.watched = Some(dir.to_path_buf());
        Ok(rx)
    }

    /// Stop watching. Safe to call repeatedly or before `start`.
    pub fn stop(&mut self) {
        if let Some(mut watcher) = self.watcher.take() {
            if let Some(dir) = self.watched.take() {
                if let Err(e) = watcher.unwatch(&dir) {
                    log::debug!("Failed to unwatch {} (non-critical): {}", dir.display(), e);
                }
                log::info!("Stopped watching {}", dir.display());
            }
            // Shuts down the OS event thread, which drops the sender.
            drop(watcher);
        }
        self.watched = None;
    }

    pub fn is_running(&self) -> bool {
        self.watcher.is_some()
    }

    pub fn watched_dir(&self) -> Option<&Path> {
        self.watched.as_deref()
    }
}

impl Drop for DirectoryWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

fn is_creation(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Modify(ModifyKind::Name(RenameMode::To))
    )
}

fn forward_event(tx: &UnboundedSender<ScreenshotEvent>, event: &Event, extensions: &[String]) {
    if !is_creation(&event.kind) {
        return;
    }

    for path in &event.paths {
        if path.is_dir() || !InputValidator::is_image_file(path, extensions) {
            continue;
        }
        log::debug!("Detected new screenshot {}", path.display());
        if tx.send(ScreenshotEvent::new(path.clone())).is_err() {
            log::debug!("Screenshot receiver dropped, ignoring {}", path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::CreateKind;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::time::timeout;

    fn extensions() -> Vec<String> {
        vec!["png".to_string(), "jpg".to_string()]
    }

    #[test]
    fn test_forward_event_filters_kind_and_extension() {
        let (tx, mut rx) = mpsc::unbounded_channel();

        let created = Event::new(EventKind::Create(CreateKind::File))
            .add_path(PathBuf::from("/shots/a.PNG"))
            .add_path(PathBuf::from("/shots/b.txt"));
        forward_event(&tx, &created, &extensions());

        let renamed = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::To)))
            .add_path(PathBuf::from("/shots/c.jpg"));
        forward_event(&tx, &renamed, &extensions());

        let removed = Event::new(EventKind::Remove(notify::event::RemoveKind::File))
            .add_path(PathBuf::from("/shots/d.png"));
        forward_event(&tx, &removed, &extensions());

        assert_eq!(rx.try_recv().unwrap().path, PathBuf::from("/shots/a.PNG"));
        assert_eq!(rx.try_recv().unwrap().path, PathBuf::from("/shots/c.jpg"));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_stop_is_idempotent_without_start() {
        let mut watcher = DirectoryWatcher::new(extensions());
        watcher.stop();
        watcher.stop();
        assert!(!watcher.is_running());
    }

    #[test]
    fn test_start_on_missing_directory_fails() {
        let dir = TempDir::new().unwrap();
        let mut watcher = DirectoryWatcher::new(extensions());

        let result = watcher.start(&dir.path().join("missing"));
        assert!(matches!(result, Err(AppError::Config(_))));
        assert!(!watcher.is_running());
        watcher.stop();
    }

    #[tokio::test]
    async fn test_delivers_image_creations() {
        let dir = TempDir::new().unwrap();
        let mut watcher = DirectoryWatcher::new(extensions());
        let mut rx = watcher.start(dir.path()).unwrap();

        std::fs::write(dir.path().join("ignored.txt"), b"x").unwrap();
        std::fs::write(dir.path().join("capture.png"), b"png").unwrap();

        let event = timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("watcher event")
            .expect("open channel");
        assert_eq!(event.path.file_name().unwrap(), "capture.png");

        watcher.stop();
    }

    #[tokio::test]
    async fn test_stop_twice_then_restart_delivers_once() {
        let dir = TempDir::new().unwrap();
        let mut watcher = DirectoryWatcher::new(extensions());

        let mut first = watcher.start(dir.path()).unwrap();
        watcher.stop();
        watcher.stop();
        let closed = timeout(Duration::from_secs(5), first.recv()).await;
        assert!(matches!(closed, Ok(None)), "stopped stream must close");

        let mut second = watcher.start(dir.path()).unwrap();
        assert_eq!(watcher.watched_dir(), Some(dir.path()));
        std::fs::write(dir.path().join("again.png"), b"png").unwrap();

        let event = timeout(Duration::from_secs(5), second.recv())
            .await
            .expect("watcher event")
            .expect("open channel");
        assert_eq!(event.path.file_name().unwrap(), "again.png");

        // A single file write may surface as one create plus content events;
        // only the create is forwarded.
        tokio::time::sleep(Duration::from_millis(300)).await;
        while let Ok(extra) = second.try_recv() {
            assert_ne!(extra.path.file_name().unwrap(), "again.png");
        }

        watcher.stop();
    }
}
