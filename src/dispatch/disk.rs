//! Standalone-directory sink.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error};

/// Writes received files under `<root>/service<N>/<filename>`.
#[derive(Debug)]
pub struct DiskOutput {
    root: PathBuf,
}

impl DiskOutput {
    /// Create a sink rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Write one object. Failures are logged and swallowed; a broken
    /// disk must not end the broadcast session.
    pub fn write(&self, service_id: u32, filename: &str, data: &[u8]) -> Option<PathBuf> {
        let path = self.root.join(format!("service{service_id}")).join(filename);
        if let Some(parent) = path.parent() {
            if let Err(e) = fs::create_dir_all(parent) {
                error!("Service {service_id} failed to create output directory {parent:?}: {e}");
                return None;
            }
        }
        match fs::write(&path, data) {
            Ok(()) => Some(path),
            Err(e) => {
                error!("Service {service_id} failed to write file {filename}: {e}");
                None
            }
        }
    }

    /// Delete a segment evicted from the retention window.
    pub fn delete(&self, path: &Path) {
        if let Err(e) = fs::remove_file(path) {
            debug!("Failed to delete retained segment {path:?}: {e}");
        }
    }
}
