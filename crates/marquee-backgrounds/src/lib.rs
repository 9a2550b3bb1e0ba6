//! Background image acquisition and rotation for the marquee kiosk shell.
//!
//! The backend side fetches a remote manifest of decorative images, keeps a
//! local JSON snapshot of it with per-entry download state, downloads missing
//! images into a content-addressed directory, and emits availability events
//! on the bus. The UI-facing side consumes those events and answers
//! "give me a random, currently-available, not-last-shown background".

pub mod catalog;
pub mod downloads;
pub mod http_client;
pub mod manifest;
pub mod paths;
pub mod selector;
pub mod service;
#[cfg(test)]
pub(crate) mod test_support;

pub use catalog::{CatalogEntry, CatalogStore, PersistError};
pub use downloads::{DownloadCoordinator, DownloadError, DownloadTuning};
pub use manifest::FetchError;
pub use selector::{BackgroundSelector, Selection, SelectionError};
pub use service::{BackgroundService, ReadyGate};
