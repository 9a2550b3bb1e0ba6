use once_cell::sync::{Lazy, OnceCell};
use std::path::PathBuf;
use std::sync::Mutex;

static STATE_DIR: Lazy<Mutex<OnceCell<PathBuf>>> = Lazy::new(|| Mutex::new(OnceCell::new()));

/// Application state directory. `MARQUEE_STATE_DIR` wins; otherwise the
/// platform's data-local dir for the app, falling back to the current dir.
pub fn state_dir() -> PathBuf {
    let cell = STATE_DIR.lock().expect("state dir cache lock");
    if let Some(existing) = cell.get() {
        return existing.clone();
    }

    let resolved = if let Ok(dir) = std::env::var("MARQUEE_STATE_DIR") {
        PathBuf::from(dir)
    } else {
        directories::ProjectDirs::from("org", "marquee", "marquee")
            .map(|p| p.data_local_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."))
    };

    // Value cannot be set by another thread while we hold the lock, but ignore
    // the Result to avoid double-panicking should it ever happen.
    let _ = cell.set(resolved.clone());
    resolved
}

/// On-disk catalog snapshot: a JSON array of catalog entries.
pub fn catalog_path() -> PathBuf {
    state_dir().join("backgrounds.json")
}

/// Where downloaded images live, one content-addressed file per entry.
pub fn backgrounds_dir() -> PathBuf {
    state_dir().join("backgrounds")
}

#[cfg(test)]
pub(crate) fn reset_state_dir_for_tests() {
    let mut cell = STATE_DIR.lock().expect("state dir cache lock");
    cell.take();
}
