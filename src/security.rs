use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;

use crate::errors::{AppError, AppResult};

const MAX_NAME_LENGTH: usize = 100;

fn unsafe_name_chars() -> &'static Regex {
    static UNSAFE: OnceLock<Regex> = OnceLock::new();
    UNSAFE.get_or_init(|| Regex::new(r#"[<>:"/\\|?*\x00-\x1f]"#).expect("valid regex"))
}

pub struct InputValidator;

impl InputValidator {
    /// Trainee and training names become folder names under the session root.
    pub fn validate_session_name(field: &str, name: &str) -> AppResult<()> {
        let trimmed = name.trim();

        if trimmed.is_empty() {
            return Err(AppError::validation(field, "Name cannot be empty"));
        }

        if trimmed.chars().count() > MAX_NAME_LENGTH {
            return Err(AppError::validation(field, "Name too long (max 100 characters)"));
        }

        if trimmed == "." || trimmed == ".." || trimmed.contains("..") {
            return Err(AppError::validation(field, "Invalid folder name detected"));
        }

        if unsafe_name_chars().is_match(trimmed) {
            return Err(AppError::validation(field, "Name contains invalid characters"));
        }

        Ok(())
    }

    /// Screenshot file names as they are stored and used as comment keys.
    pub fn normalize_filename(filename: &str) -> String {
        filename
            .chars()
            .map(|c| if c.is_whitespace() { '_' } else { c })
            .collect()
    }

    pub fn is_image_file(path: &Path, extensions: &[String]) -> bool {
        path.extension()
            .map(|ext| ext.to_string_lossy().to_lowercase())
            .map(|ext| {
                extensions
                    .iter()
                    .any(|allowed| allowed.trim_start_matches('.').eq_ignore_ascii_case(&ext))
            })
            .unwrap_or(false)
    }

    /// A screenshot name picked by the operator, e.g. for deletion.
    pub fn validate_screenshot_name(name: &str, extensions: &[String]) -> AppResult<()> {
        if name.trim().is_empty() {
            return Err(AppError::validation("screenshot", "Screenshot name cannot be empty"));
        }

        let path = Path::new(name);
        if path.components().count() != 1 || name.contains("..") {
            return Err(AppError::validation("screenshot", "Invalid screenshot name"));
        }

        if !Self::is_image_file(path, extensions) {
            return Err(AppError::invalid_file_type(name));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extensions() -> Vec<String> {
        vec!["png".to_string(), "jpg".to_string()]
    }

    #[test]
    fn test_normalize_replaces_whitespace() {
        assert_eq!(
            InputValidator::normalize_filename("Screenshot 2024-05-01 at 10.00.png"),
            "Screenshot_2024-05-01_at_10.00.png"
        );
        assert_eq!(InputValidator::normalize_filename("a\tb c.png"), "a_b_c.png");
    }

    #[test]
    fn test_normalize_is_idempotent() {
        for name in ["", "plain.png", "two  spaces.png", " lead and trail ", "tab\there.jpg"] {
            let once = InputValidator::normalize_filename(name);
            assert_eq!(InputValidator::normalize_filename(&once), once);
        }
    }

    #[test]
    fn test_image_extension_match_is_case_insensitive() {
        assert!(InputValidator::is_image_file(Path::new("/tmp/A.PNG"), &extensions()));
        assert!(InputValidator::is_image_file(Path::new("shot.Jpg"), &extensions()));
        assert!(!InputValidator::is_image_file(Path::new("notes.txt"), &extensions()));
        assert!(!InputValidator::is_image_file(Path::new("no_extension"), &extensions()));
    }

    #[test]
    fn test_session_name_validation() {
        assert!(InputValidator::validate_session_name("trainee", "John Smith").is_ok());
        assert!(InputValidator::validate_session_name("trainee", "  ").is_err());
        assert!(InputValidator::validate_session_name("trainee", "../etc").is_err());
        assert!(InputValidator::validate_session_name("training", "a/b").is_err());
        assert!(InputValidator::validate_session_name("training", &"x".repeat(101)).is_err());
    }

    #[test]
    fn test_screenshot_name_validation() {
        assert!(InputValidator::validate_screenshot_name("shot_1.png", &extensions()).is_ok());
        assert!(InputValidator::validate_screenshot_name("../shot.png", &extensions()).is_err());
        assert!(InputValidator::validate_screenshot_name("dir/shot.png", &extensions()).is_err());
        assert!(matches!(
            InputValidator::validate_screenshot_name("notes.txt", &extensions()),
            Err(AppError::InvalidFileType { .. })
        ));
    }
}
