//! Canonical event topic constants shared across the backend and the
//! UI-facing services.
//!
//! Centralizing the strings keeps both sides of the notification channel in
//! sync. Keep this list alphabetized within sections and favor dot.case
//! names.

// Backgrounds / downloads
pub const TOPIC_BACKGROUNDS_CATALOG_UPDATED: &str = "backgrounds.catalog.updated";
pub const TOPIC_BACKGROUNDS_CLEANUP: &str = "backgrounds.cleanup";
pub const TOPIC_BACKGROUNDS_DOWNLOADS_COMPLETE: &str = "backgrounds.downloads.complete";
pub const TOPIC_BACKGROUNDS_ERROR: &str = "backgrounds.error";
pub const TOPIC_BACKGROUNDS_IMAGE_AVAILABLE: &str = "backgrounds.image.available";
pub const TOPIC_BACKGROUNDS_PROGRESS: &str = "backgrounds.download.progress";

// Service lifecycle
pub const TOPIC_SERVICE_READY: &str = "service.ready";
