//! Database query operations organized by entity

pub mod resume;
pub mod upload;
pub mod watched;

// Re-export commonly used query functions
pub use resume::{
    count_resume, find_resume_by_content, get_resume, list_resume, observe_host_resume,
    pending_host_resume, record_host_resume, upsert_resume,
};
pub use upload::{mark_changed, mark_uploaded, upload_state, UploadState};
pub use watched::{
    count_watched, get_watched, list_watched, observe_host_watched, pending_host_watched,
    record_host_watched, upsert_watched,
};
