//! Persistent bearer-token storage.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TokenError {
    #[error("token file io: {0}")]
    Io(#[from] std::io::Error),
    #[error("token file json: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Serialize, Deserialize)]
struct SessionFile {
    access_token: String,
}

/// The session token, mirrored in memory and in `session.json`.
pub struct TokenStore {
    path: PathBuf,
    token: Mutex<Option<String>>,
}

impl TokenStore {
    /// Open the store, reading any token already on disk. An unreadable
    /// file counts as logged out.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let token = match read_token(&path) {
            Ok(token) => token,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "ignoring unreadable session file");
                None
            }
        };
        Self { path, token: Mutex::new(token) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self) -> Option<String> {
        self.lock().clone()
    }

    pub fn set(&self, token: &str) -> Result<(), TokenError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let body = serde_json::to_vec(&SessionFile { access_token: token.to_string() })?;
        std::fs::write(&self.path, body)?;
        restrict_permissions(&self.path);
        *self.lock() = Some(token.to_string());
        Ok(())
    }

    /// Forget the token in memory and on disk.
    pub fn clear(&self) {
        *self.lock() = None;
        match std::fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!(path = %self.path.display(), "session file removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(error = %e, "failed to remove session file"),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<String>> {
        // A poisoned lock still holds a usable Option.
        self.token.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn read_token(path: &Path) -> Result<Option<String>, TokenError> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let file: SessionFile = serde_json::from_slice(&bytes)?;
    Ok((!file.access_token.is_empty()).then_some(file.access_token))
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Err(e) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)) {
        tracing::warn!(error = %e, "could not restrict session file permissions");
    }
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) {}
