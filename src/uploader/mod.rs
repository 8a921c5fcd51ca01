// Upload module - synchronizes a finished session with the review service
//
// The coordinator drives the session client through the ordered upload
// phases; late captures feed new screenshots into a running upload.

pub mod coordinator;
pub mod late_capture;
pub mod progress_tracker;
pub mod session_client;

pub use coordinator::{UploadCoordinator, UploadHandle};
pub use late_capture::LateCaptureGate;
pub use progress_tracker::{
    FailedUpload, ProgressState, SessionStatus, UploadEvent, UploadPhase, UploadProgress,
};
pub use session_client::{get_initials, DebriefLinks, SessionUploader};
