use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{Error, Result};
use crate::fstools::{classify_file, DirEntryCategory};

#[derive(Clone, Debug, PartialEq)]
pub struct VideoFile {
    pub path: PathBuf,
    pub size: u64,
}

/// Lists convertible files found directly inside a directory.
pub struct FileCatalog {
    extensions: Vec<String>,
}

impl Default for FileCatalog {
    fn default() -> Self {
        FileCatalog::with_extensions(&["mp4"])
    }
}

impl FileCatalog {
    pub fn with_extensions(extensions: &[&str]) -> Self {
        FileCatalog {
            extensions: extensions.iter().map(|e| e.trim_start_matches('.').to_lowercase()).collect(),
        }
    }

    pub fn is_eligible(&self, path: &Path) -> bool {
        match path.extension() {
            Some(ext) => {
                let ext = ext.to_string_lossy().to_lowercase();
                self.extensions.iter().any(|e| *e == ext)
            },
            None => false,
        }
    }

    /// Matching files in `dirpath`, sorted by path, one entry per canonical file.
    /// Subdirectories are not visited.
    pub fn list(&self, dirpath: &Path) -> Result<Vec<VideoFile>> {
        match classify_file(dirpath) {
            DirEntryCategory::Directory => (),
            DirEntryCategory::DoesNotExist => return Err(Error::not_found(dirpath)),
            _ => return Err(Error::NotADirectory { path: dirpath.to_path_buf() }),
        }

        let base = dirpath.canonicalize()?;
        let mut files = vec![];
        for entry in fs::read_dir(&base)?.filter_map(|e| e.ok()) {
            let path = entry.path();
            if !self.is_eligible(&path) {
                continue;
            }
            // follows symlinks, unlike DirEntry::metadata
            match fs::metadata(&path) {
                Ok(metadata) if metadata.is_file() => files.push(VideoFile {
                    path,
                    size: metadata.len(),
                }),
                Ok(_) => (),
                Err(err) => debug!(path = %path.display(), %err, "skipping unreadable entry"),
            }
        }

        files.sort_by(|a, b| a.path.cmp(&b.path));

        let mut seen = HashSet::new();
        files.retain(|f| {
            let key = f.path.canonicalize().unwrap_or_else(|_| f.path.clone());
            seen.insert(key)
        });

        debug!(dir = %base.display(), count = files.len(), "catalog scanned");
        Ok(files)
    }
}
