//! Per-session comment and notes storage.
//!
//! Comments live in `comments.json` as one flat object keyed by normalized
//! screenshot file name; notes are the raw contents of `notes.txt`. Every
//! write replaces the whole file. A file that cannot be parsed reads as empty
//! and is overwritten by the next save.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::sync::watch;

use crate::errors::AppResult;
use crate::security::InputValidator;
use crate::session::Session;

pub type Comments = BTreeMap<String, String>;

#[derive(Debug)]
pub struct MetadataStore {
    comments_path: PathBuf,
    notes_path: PathBuf,
    notes_tx: watch::Sender<String>,
}

impl MetadataStore {
    pub fn new(comments_path: PathBuf, notes_path: PathBuf) -> Self {
        let initial = read_notes(&notes_path);
        let (notes_tx, _) = watch::channel(initial);
        Self {
            comments_path,
            notes_path,
            notes_tx,
        }
    }

    pub fn for_session(session: &Session) -> Self {
        Self::new(session.comments_file(), session.notes_file())
    }

    pub fn get_all_comments(&self) -> Comments {
        read_comments(&self.comments_path)
    }

    /// Comment for a screenshot, looked up by its normalized name.
    pub fn comment_for(&self, filename: &str) -> Option<String> {
        self.get_all_comments()
            .remove(&InputValidator::normalize_filename(filename))
    }

    pub fn set_comment(&self, filename: &str, text: &str) -> AppResult<()> {
        self.save_all_comments([(filename, text)])
    }

    /// Store several comments with a single read-modify-write.
    pub fn save_all_comments<'a, I>(&self, entries: I) -> AppResult<()>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut comments = read_comments(&self.comments_path);
        for (filename, text) in entries {
            comments.insert(InputValidator::normalize_filename(filename), text.to_string());
        }

        if let Some(parent) = self.comments_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.comments_path, serde_json::to_string_pretty(&comments)?)?;
        log::debug!(
            "Saved {} comments to {}",
            comments.len(),
            self.comments_path.display()
        );
        Ok(())
    }

    pub fn save_notes(&self, text: &str) -> AppResult<()> {
        if let Some(parent) = self.notes_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.notes_path, text)?;
        self.notes_tx.send_replace(text.to_string());
        log::debug!("Saved notes to {}", self.notes_path.display());
        Ok(())
    }

    pub fn load_notes(&self) -> String {
        read_notes(&self.notes_path)
    }

    /// Notes-changed notifications; the receiver always holds the latest save.
    pub fn subscribe_notes(&self) -> watch::Receiver<String> {
        self.notes_tx.subscribe()
    }
}

fn read_comments(path: &Path) -> Comments {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == ErrorKind::NotFound => return Comments::new(),
        Err(e) => {
            log::warn!("Failed to read {}: {}. Treating as empty.", path.display(), e);
            return Comments::new();
        }
    };

    serde_json::from_str(&raw).unwrap_or_else(|e| {
        log::warn!(
            "Comment file {} is malformed ({}). Treating as empty.",
            path.display(),
            e
        );
        Comments::new()
    })
}

fn read_notes(path: &Path) -> String {
    match fs::read(path) {
        Ok(bytes) => String::from_utf8(bytes).unwrap_or_else(|_| {
            log::warn!(
                "Notes file {} is not valid UTF-8. Treating as empty.",
                path.display()
            );
            String::new()
        }),
        Err(e) if e.kind() == ErrorKind::NotFound => String::new(),
        Err(e) => {
            log::warn!("Failed to read {}: {}. Treating as empty.", path.display(), e);
            String::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> MetadataStore {
        MetadataStore::new(dir.path().join("comments.json"), dir.path().join("notes.txt"))
    }

    #[test]
    fn test_absent_files_read_as_empty() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        assert!(store.get_all_comments().is_empty());
        assert_eq!(store.load_notes(), "");
    }

    #[test]
    fn test_last_comment_wins() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        store.set_comment("Screenshot 1.png", "first").unwrap();
        store.set_comment("Screenshot 1.png", "second").unwrap();

        let comments = store.get_all_comments();
        assert_eq!(comments.len(), 1);
        assert_eq!(comments.get("Screenshot_1.png").map(String::as_str), Some("second"));
        assert_eq!(store.comment_for("Screenshot 1.png").as_deref(), Some("second"));
    }

    #[test]
    fn test_comments_keep_other_entries() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        store.set_comment("a.png", "A").unwrap();
        store
            .save_all_comments([("b.png", "B"), ("c c.png", "C")])
            .unwrap();

        let comments = store.get_all_comments();
        assert_eq!(comments.len(), 3);
        assert_eq!(comments["a.png"], "A");
        assert_eq!(comments["c_c.png"], "C");
    }

    #[test]
    fn test_malformed_comments_recover_and_are_overwritten() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        fs::write(dir.path().join("comments.json"), "[1, 2").unwrap();

        assert!(store.get_all_comments().is_empty());

        store.set_comment("x.png", "fresh").unwrap();
        let raw = fs::read_to_string(dir.path().join("comments.json")).unwrap();
        let parsed: Comments = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed["x.png"], "fresh");
    }

    #[test]
    fn test_notes_round_trip_exactly() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        let text = "Line one\n\n  indented ✓\r\nend";
        store.save_notes(text).unwrap();
        assert_eq!(store.load_notes(), text);

        store.save_notes("").unwrap();
        assert_eq!(store.load_notes(), "");
    }

    #[tokio::test]
    async fn test_notes_subscribers_see_latest_save() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let mut rx = store.subscribe_notes();

        store.save_notes("draft").unwrap();
        store.save_notes("final").unwrap();

        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().as_str(), "final");
    }
}
