//! Per-interview scratch directories
//!
//! Each in-flight message gets its own directory under the configured
//! scratch root, removed when the guard drops — success or failure. The
//! random suffix keeps two consumers retrying the same interview from
//! clobbering each other's files.

use crate::Result;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Scratch directory that removes itself on drop
#[derive(Debug)]
pub struct ScratchDir {
    path: PathBuf,
}

impl ScratchDir {
    pub fn create(root: &Path, interview_id: &str) -> Result<Self> {
        let dir_name = format!("{}-{}", sanitize(interview_id), Uuid::new_v4().simple());
        let path = root.join(dir_name);
        std::fs::create_dir_all(&path)?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir_all(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %self.path.display(), error = %e, "Scratch cleanup failed");
            }
        } else {
            tracing::debug!(path = %self.path.display(), "Scratch directory removed");
        }
    }
}

/// Interview ids come from the wire; only path-safe characters survive.
fn sanitize(id: &str) -> String {
    id.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
