//! Frame export
//!
//! Writes the currently displayed annotated frame to disk, byte for byte.

use std::path::PathBuf;

use crate::error::{ClientError, Result};

/// Destination for captured frames
pub trait FrameExporter: Send {
    /// Persist one encoded image, returning where it went
    fn export(&mut self, image: &[u8]) -> Result<PathBuf>;
}

/// Writes every capture to the same file in a directory
///
/// The directory is created on first use; each export overwrites the
/// previous one.
#[derive(Debug, Clone)]
pub struct DirectoryExporter {
    dir: PathBuf,
    file_name: String,
}

impl DirectoryExporter {
    pub fn new(dir: impl Into<PathBuf>, file_name: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            file_name: file_name.into(),
        }
    }

    pub fn target(&self) -> PathBuf {
        self.dir.join(&self.file_name)
    }
}

impl FrameExporter for DirectoryExporter {
    fn export(&mut self, image: &[u8]) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)
            .map_err(|e| ClientError::Export(format!("{}: {}", self.dir.display(), e)))?;

        let target = self.target();
        std::fs::write(&target, image)
            .map_err(|e| ClientError::Export(format!("{}: {}", target.display(), e)))?;

        Ok(target)
    }
}
