use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, PartialEq)]
pub enum DirEntryCategory {
    DoesNotExist,
    RegularFile,
    Directory,
    Unknown,
}

/// Symlinks are followed; a dangling link reports `DoesNotExist`.
pub fn classify_file(path: &Path) -> DirEntryCategory {
    match fs::metadata(path) {
        Ok(metadata) => {
            if metadata.is_file() {
                DirEntryCategory::RegularFile
            } else if metadata.is_dir() {
                DirEntryCategory::Directory
            } else {
                DirEntryCategory::Unknown
            }
        },
        Err(_) => DirEntryCategory::DoesNotExist,
    }
}

pub fn file_size(path: &Path) -> Option<u64> {
    fs::metadata(path).ok().map(|m| m.len())
}

/// `<output_dir>/<stem><suffix>.<ext>`, with the source extension lower-cased.
pub fn destination_for(source: &Path, output_dir: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(source.file_stem().unwrap_or(source.as_os_str()));
    name.push(suffix);
    // pushed rather than set_extension: stems may contain dots
    if let Some(ext) = source.extension() {
        name.push(".");
        name.push(ext.to_string_lossy().to_lowercase());
    }
    output_dir.join(name)
}

pub fn display_name(path: &Path) -> String {
    path.file_name()
        .unwrap_or(path.as_os_str())
        .to_string_lossy()
        .into_owned()
}
