use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::errors::{AppError, AppResult};
use crate::security::InputValidator;

pub const SCREENSHOTS_DIR: &str = "screenshots";
pub const COMMENTS_FILE: &str = "comments.json";
pub const NOTES_FILE: &str = "notes.txt";

/// One trainee + training pairing and its folder of artifacts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub trainee_name: String,
    pub training_name: String,
    pub date: String,
    pub folder: PathBuf,
}

impl Session {
    /// Open the session folder `<root>/<trainee>/<training>`, creating the
    /// capture subfolder if needed.
    pub fn open(root: &Path, trainee_name: &str, training_name: &str, date: &str) -> AppResult<Self> {
        InputValidator::validate_session_name("trainee", trainee_name)?;
        InputValidator::validate_session_name("training", training_name)?;

        if !root.is_dir() {
            return Err(AppError::Config(format!(
                "Session root {} does not exist",
                root.display()
            )));
        }

        let folder = root.join(trainee_name.trim()).join(training_name.trim());
        fs::create_dir_all(folder.join(SCREENSHOTS_DIR))?;

        log::info!("Opened session folder {}", folder.display());

        Ok(Self {
            trainee_name: trainee_name.trim().to_string(),
            training_name: training_name.trim().to_string(),
            date: date.to_string(),
            folder,
        })
    }

    pub fn screenshots_dir(&self) -> PathBuf {
        self.folder.join(SCREENSHOTS_DIR)
    }

    pub fn comments_file(&self) -> PathBuf {
        self.folder.join(COMMENTS_FILE)
    }

    pub fn notes_file(&self) -> PathBuf {
        self.folder.join(NOTES_FILE)
    }

    /// Screenshot file names in capture order.
    pub fn list_screenshots(&self, extensions: &[String]) -> AppResult<Vec<String>> {
        self.list_files(|path| InputValidator::is_image_file(path, extensions))
    }

    /// Every regular file in the capture folder, in capture order.
    pub fn list_capture_files(&self) -> AppResult<Vec<String>> {
        self.list_files(|_| true)
    }

    fn list_files<F>(&self, keep: F) -> AppResult<Vec<String>>
    where
        F: Fn(&Path) -> bool,
    {
        let dir = self.screenshots_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut screenshots: Vec<(SystemTime, String)> = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_file() || !keep(&path) {
                continue;
            }

            let captured_at = entry
                .metadata()
                .and_then(|m| m.created().or_else(|_| m.modified()))
                .unwrap_or(SystemTime::UNIX_EPOCH);
            screenshots.push((captured_at, entry.file_name().to_string_lossy().to_string()));
        }

        screenshots.sort();
        Ok(screenshots.into_iter().map(|(_, name)| name).collect())
    }

    /// Delete a screenshot. Its comment entry is left in place.
    pub fn delete_screenshot(&self, name: &str, extensions: &[String]) -> AppResult<()> {
        InputValidator::validate_screenshot_name(name, extensions)?;

        let path = self.screenshots_dir().join(name);
        if !path.is_file() {
            return Err(AppError::file_not_found(&path.to_string_lossy()));
        }

        fs::remove_file(&path)?;
        log::info!("Deleted screenshot {}", path.display());
        Ok(())
    }
}
