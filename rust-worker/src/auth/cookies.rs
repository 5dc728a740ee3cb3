//! Saved session file: a JSON array of cookies.

use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::browser::SavedCookie;

/// Cookie jar persisted between runs so the interactive login is skipped.
#[derive(Debug, Clone)]
pub struct CookieJar {
    path: PathBuf,
}

impl CookieJar {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Read the jar. Missing, unreadable or malformed files yield `None`.
    pub fn load(&self) -> Option<Vec<SavedCookie>> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "session_file_absent");
                return None;
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "session_file_unreadable");
                return None;
            }
        };

        match serde_json::from_str::<Vec<SavedCookie>>(&raw) {
            Ok(cookies) => Some(cookies),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "session_file_malformed");
                None
            }
        }
    }

    pub fn save(&self, cookies: &[SavedCookie]) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(cookies)?;
        std::fs::write(&self.path, json)?;
        info!(path = %self.path.display(), cookies = cookies.len(), "session_saved");
        Ok(())
    }

    /// Remove the jar; a missing file is not an error.
    pub fn delete(&self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => info!(path = %self.path.display(), "session_file_deleted"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "session_file_delete_failed"),
        }
    }
}
