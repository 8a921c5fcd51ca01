//! Moves freshly captured screenshots into the session's capture folder.
//!
//! Each watcher event is handled on its own task: wait the settle delay,
//! normalize the name, move the file, then notify. The settle delay is a
//! fixed wait; the file is not checked for completeness.

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{sleep, Duration};

use crate::errors::{AppError, AppResult};
use crate::security::InputValidator;
use crate::uploader::LateCaptureGate;
use crate::watcher::ScreenshotEvent;

/// Called synchronously after every successful move.
pub type RefreshCallback = Arc<dyn Fn(&RelocatedScreenshot) + Send + Sync>;

#[derive(Debug, Clone, PartialEq)]
pub struct RelocatedScreenshot {
    pub source: PathBuf,
    pub destination: PathBuf,
    /// Normalized name inside the capture folder; also the comment key.
    pub filename: String,
}

#[derive(Clone)]
pub struct ScreenshotRelocator {
    shared: Arc<RelocatorShared>,
}

struct RelocatorShared {
    capture_dir: PathBuf,
    settle_delay: Duration,
    /// Source paths with a move in flight.
    in_flight: Mutex<HashSet<PathBuf>>,
    /// Held from choosing a destination name until the file is in place.
    placement: tokio::sync::Mutex<()>,
    on_relocated: Option<RefreshCallback>,
    late_capture: LateCaptureGate,
}

impl ScreenshotRelocator {
    pub fn new(
        capture_dir: PathBuf,
        settle_delay: Duration,
        late_capture: LateCaptureGate,
        on_relocated: Option<RefreshCallback>,
    ) -> Self {
        Self {
            shared: Arc::new(RelocatorShared {
                capture_dir,
                settle_delay,
                in_flight: Mutex::new(HashSet::new()),
                placement: tokio::sync::Mutex::new(()),
                on_relocated,
                late_capture,
            }),
        }
    }

    pub fn capture_dir(&self) -> &Path {
        &self.shared.capture_dir
    }

    /// Move the file behind `event` into the capture folder. Returns `None`
    /// when a move of the same source path is already in flight.
    pub async fn relocate(&self, event: &ScreenshotEvent) -> AppResult<Option<RelocatedScreenshot>> {
        if !self.begin_move(&event.path) {
            log::debug!("Ignoring repeated event for {}", event.path.display());
            return Ok(None);
        }

        let result = self.move_into_session(event).await;
        self.finish_move(&event.path);
        result.map(Some)
    }

    async fn move_into_session(&self, event: &ScreenshotEvent) -> AppResult<RelocatedScreenshot> {
        sleep(self.shared.settle_delay).await;

        let original_name = event
            .path
            .file_name()
            .ok_or_else(|| AppError::file_not_found(&event.path.to_string_lossy()))?
            .to_string_lossy()
            .to_string();
        let normalized = InputValidator::normalize_filename(&original_name);

        tokio::fs::create_dir_all(&self.shared.capture_dir).await?;
        let destination = {
            let _placing = self.shared.placement.lock().await;
            let destination = unique_destination(&self.shared.capture_dir, &normalized).await?;
            move_file(&event.path, &destination).await?;
            destination
        };

        let filename = destination
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or(normalized);

        Ok(RelocatedScreenshot {
            source: event.path.clone(),
            destination,
            filename,
        })
    }

    /// Relocate and fire the hooks. Failures are logged and the event dropped.
    pub async fn handle_event(&self, event: ScreenshotEvent) {
        match self.relocate(&event).await {
            Ok(Some(relocated)) => {
                log::info!(
                    "Screenshot moved: {} -> {}",
                    relocated.source.display(),
                    relocated.destination.display()
                );

                if let Some(on_relocated) = &self.shared.on_relocated {
                    on_relocated(&relocated);
                }

                if self.shared.late_capture.offer(&relocated.destination) {
                    log::info!("Queued {} for the running upload", relocated.filename);
                }
            }
            Ok(None) => {}
            Err(e) => {
                log::error!("Failed to move screenshot {}: {}", event.path.display(), e);
            }
        }
    }

    /// Consume watcher events until the stream closes, then wait for every
    /// in-flight move to finish.
    pub fn spawn(self, mut events: UnboundedReceiver<ScreenshotEvent>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut in_flight = JoinSet::new();

            loop {
                tokio::select! {
                    event = events.recv() => match event {
                        Some(event) => {
                            let relocator = self.clone();
                            in_flight.spawn(async move { relocator.handle_event(event).await });
                        }
                        None => break,
                    },
                    Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                        if let Err(e) = joined {
                            log::error!("Screenshot move task failed: {}", e);
                        }
                    }
                }
            }

            while let Some(joined) = in_flight.join_next().await {
                if let Err(e) = joined {
                    log::error!("Screenshot move task failed: {}", e);
                }
            }

            log::debug!(
                "Relocator for {} stopped",
                self.shared.capture_dir.display()
            );
        })
    }

    fn begin_move(&self, path: &Path) -> bool {
        match self.shared.in_flight.lock() {
            Ok(mut in_flight) => in_flight.insert(path.to_path_buf()),
            Err(e) => {
                log::warn!("Failed to lock in-flight moves (non-critical): {}", e);
                true
            }
        }
    }

    fn finish_move(&self, path: &Path) {
        match self.shared.in_flight.lock() {
            Ok(mut in_flight) => {
                in_flight.remove(path);
            }
            Err(e) => log::warn!("Failed to lock in-flight moves (non-critical): {}", e),
        }
    }
}

/// First free name for `filename` in `dir`: `name.ext`, `name_1.ext`, ...
async fn unique_destination(dir: &Path, filename: &str) -> AppResult<PathBuf> {
    let candidate = dir.join(filename);
    if !tokio::fs::try_exists(&candidate).await? {
        return Ok(candidate);
    }

    let path = Path::new(filename);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| filename.to_string());
    let extension = path.extension().map(|e| e.to_string_lossy().to_string());

    let mut n = 1;
    loop {
        let name = match &extension {
            Some(ext) => format!("{}_{}.{}", stem, n, ext),
            None => format!("{}_{}", stem, n),
        };
        let candidate = dir.join(name);
        if !tokio::fs::try_exists(&candidate).await? {
            return Ok(candidate);
        }
        n += 1;
    }
}

/// Rename, or copy and delete when rename is not possible (other volume).
async fn move_file(source: &Path, destination: &Path) -> io::Result<()> {
    let rename_err = match tokio::fs::rename(source, destination).await {
        Ok(()) => return Ok(()),
        Err(e) => e,
    };

    if !tokio::fs::try_exists(source).await.unwrap_or(false) {
        return Err(rename_err);
    }

    log::debug!(
        "Rename of {} failed ({}), falling back to copy",
        source.display(),
        rename_err
    );
    tokio::fs::copy(source, destination).await?;
    if let Err(e) = tokio::fs::remove_file(source).await {
        log::warn!(
            "Copied {} but could not remove the original: {}",
            source.display(),
            e
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn relocator(capture_dir: PathBuf, gate: LateCaptureGate) -> ScreenshotRelocator {
        ScreenshotRelocator::new(capture_dir, Duration::from_millis(10), gate, None)
    }

    #[tokio::test]
    async fn test_relocate_normalizes_and_moves() {
        let source = TempDir::new().unwrap();
        let session = TempDir::new().unwrap();
        let capture_dir = session.path().join("screenshots");
        let file = source.path().join("Screenshot 2024 05 01.png");
        fs::write(&file, b"png").unwrap();

        let relocated = relocator(capture_dir.clone(), LateCaptureGate::new())
            .relocate(&ScreenshotEvent::new(file.clone()))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(relocated.filename, "Screenshot_2024_05_01.png");
        assert_eq!(relocated.destination, capture_dir.join("Screenshot_2024_05_01.png"));
        assert!(!file.exists());
        assert_eq!(fs::read(&relocated.destination).unwrap(), b"png");
    }

    #[tokio::test]
    async fn test_repeated_event_during_move_is_ignored() {
        let source = TempDir::new().unwrap();
        let session = TempDir::new().unwrap();
        let file = source.path().join("a.png");
        fs::write(&file, b"png").unwrap();
        let relocator = ScreenshotRelocator::new(
            session.path().to_path_buf(),
            Duration::from_millis(100),
            LateCaptureGate::new(),
            None,
        );

        // Same path shows up twice, e.g. a second OS notification.
        let event = ScreenshotEvent::new(file.clone());
        let (first, second) = tokio::join!(relocator.relocate(&event), relocator.relocate(&event));

        assert!(first.unwrap().is_some());
        assert!(second.unwrap().is_none());
        assert_eq!(fs::read_dir(session.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_reused_source_name_is_moved_again() {
        let source = TempDir::new().unwrap();
        let session = TempDir::new().unwrap();
        let file = source.path().join("screenshot.png");
        let relocator = relocator(session.path().to_path_buf(), LateCaptureGate::new());

        fs::write(&file, b"first").unwrap();
        let first = relocator
            .relocate(&ScreenshotEvent::new(file.clone()))
            .await
            .unwrap()
            .unwrap();

        fs::write(&file, b"second").unwrap();
        let second = relocator
            .relocate(&ScreenshotEvent::new(file.clone()))
            .await
            .unwrap()
            .unwrap();

        assert!(!file.exists());
        assert_eq!(first.filename, "screenshot.png");
        assert_eq!(second.filename, "screenshot_1.png");
        assert_eq!(fs::read(session.path().join("screenshot.png")).unwrap(), b"first");
        assert_eq!(fs::read(session.path().join("screenshot_1.png")).unwrap(), b"second");
    }

    #[tokio::test]
    async fn test_existing_capture_is_not_overwritten() {
        let source = TempDir::new().unwrap();
        let session = TempDir::new().unwrap();
        fs::write(session.path().join("a.png"), b"old").unwrap();
        let file = source.path().join("a.png");
        fs::write(&file, b"new").unwrap();

        let relocated = relocator(session.path().to_path_buf(), LateCaptureGate::new())
            .relocate(&ScreenshotEvent::new(file))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(relocated.filename, "a_1.png");
        assert_eq!(fs::read(session.path().join("a.png")).unwrap(), b"old");
        assert_eq!(fs::read(session.path().join("a_1.png")).unwrap(), b"new");
    }

    #[tokio::test]
    async fn test_missing_source_fails_without_side_effects() {
        let source = TempDir::new().unwrap();
        let session = TempDir::new().unwrap();
        let relocator = relocator(session.path().to_path_buf(), LateCaptureGate::new());

        let result = relocator
            .relocate(&ScreenshotEvent::new(source.path().join("gone.png")))
            .await;
        assert!(result.is_err());
        assert_eq!(fs::read_dir(session.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_names_normalizing_alike_both_survive_a_burst() {
        for _ in 0..10 {
            let source = TempDir::new().unwrap();
            let session = TempDir::new().unwrap();
            let relocator = relocator(session.path().to_path_buf(), LateCaptureGate::new());

            let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
            let task = relocator.spawn(rx);
            for name in ["a b.png", "a_b.png"] {
                let path = source.path().join(name);
                fs::write(&path, name.as_bytes()).unwrap();
                tx.send(ScreenshotEvent::new(path)).unwrap();
            }
            drop(tx);
            task.await.unwrap();

            assert_eq!(fs::read_dir(source.path()).unwrap().count(), 0);
            let mut contents: Vec<Vec<u8>> = ["a_b.png", "a_b_1.png"]
                .iter()
                .map(|name| fs::read(session.path().join(name)).unwrap())
                .collect();
            contents.sort();
            assert_eq!(contents, vec![b"a b.png".to_vec(), b"a_b.png".to_vec()]);
        }
    }

    #[tokio::test]
    async fn test_burst_of_events_all_land_once_and_fire_hooks() {
        let source = TempDir::new().unwrap();
        let session = TempDir::new().unwrap();
        let capture_dir = session.path().join("screenshots");

        let refreshed = Arc::new(AtomicUsize::new(0));
        let counter = refreshed.clone();
        let callback: RefreshCallback = Arc::new(move |_: &RelocatedScreenshot| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let gate = LateCaptureGate::new();
        let mut late = gate.open();
        let relocator = ScreenshotRelocator::new(
            capture_dir.clone(),
            Duration::from_millis(20),
            gate.clone(),
            Some(callback),
        );

        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let task = relocator.spawn(rx);

        let names: Vec<String> = (0..8).map(|i| format!("shot {}.png", i)).collect();
        for name in &names {
            let path = source.path().join(name);
            fs::write(&path, name.as_bytes()).unwrap();
            tx.send(ScreenshotEvent::new(path.clone())).unwrap();
            tx.send(ScreenshotEvent::new(path)).unwrap();
        }
        drop(tx);
        task.await.unwrap();

        assert_eq!(refreshed.load(Ordering::SeqCst), names.len());
        assert_eq!(fs::read_dir(source.path()).unwrap().count(), 0);
        for name in &names {
            let moved = capture_dir.join(InputValidator::normalize_filename(name));
            assert_eq!(fs::read(moved).unwrap(), name.as_bytes());
        }
        assert_eq!(fs::read_dir(&capture_dir).unwrap().count(), names.len());

        let mut offered = 0;
        while late.try_recv().is_ok() {
            offered += 1;
        }
        assert_eq!(offered, names.len());
    }
}
