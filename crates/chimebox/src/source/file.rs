//! Clips from a local directory tree.

use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use super::SoundSource;
use crate::error::{ChimeError, Result};
use crate::types::ClipId;

/// Every non-directory entry below `root` is a clip; its path is the id.
#[derive(Debug, Clone)]
pub struct FileSource {
    root: PathBuf,
}

impl FileSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

fn walk(root: &Path) -> Result<Vec<ClipId>> {
    if !root.is_dir() {
        return Err(ChimeError::listing(
            root.display().to_string(),
            "not a directory",
        ));
    }

    let mut clips = Vec::new();
    for entry in WalkDir::new(root).follow_links(true) {
        let entry = entry.map_err(|e| ChimeError::listing(root.display().to_string(), e))?;
        if !entry.file_type().is_dir() {
            clips.push(ClipId::new(entry.path().to_string_lossy().into_owned()));
        }
    }
    clips.sort();

    Ok(clips)
}

#[async_trait]
impl SoundSource for FileSource {
    async fn list_clips(&self) -> Result<Vec<ClipId>> {
        let root = self.root.clone();
        let clips = tokio::task::spawn_blocking(move || walk(&root))
            .await
            .map_err(|e| ChimeError::listing(self.root.display().to_string(), e))??;

        if clips.is_empty() {
            return Err(ChimeError::listing(
                self.root.display().to_string(),
                "no clips found",
            ));
        }

        tracing::debug!(root = %self.root.display(), count = clips.len(), "listed clips");
        Ok(clips)
    }

    async fn fetch_clip(&self, clip: &ClipId) -> Result<Bytes> {
        let data = tokio::fs::read(clip.as_str())
            .await
            .map_err(|e| ChimeError::fetch(clip.as_str(), e))?;
        Ok(Bytes::from(data))
    }

    fn describe(&self) -> String {
        format!("file://{}", self.root.display())
    }
}
