use std::env;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

pub mod encoder;
pub mod probe;
pub mod progress;

#[derive(Clone, Debug, PartialEq)]
pub struct FFmpeg {
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
}

impl FFmpeg {
    pub fn new(ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>) -> Self {
        FFmpeg {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
        }
    }

    /// Explicit paths win, then a copy bundled beside the executable
    /// (`ffmpeg/bin/`), then whatever is on `PATH`.
    pub fn locate(ffmpeg: Option<PathBuf>, ffprobe: Option<PathBuf>) -> Self {
        let bundle = env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(|dir| dir.join("ffmpeg").join("bin")));
        FFmpeg {
            ffmpeg: ffmpeg.unwrap_or_else(|| tool_path(bundle.as_deref(), "ffmpeg")),
            ffprobe: ffprobe.unwrap_or_else(|| tool_path(bundle.as_deref(), "ffprobe")),
        }
    }

    pub fn is_installed(&self) -> bool {
        let cmd = Command::new(&self.ffmpeg)
            .arg("-version")
            .stdin(Stdio::null())
            .output();
        match cmd {
            Ok(output) => output.status.success(),
            Err(_) => false,
        }
    }
}

fn tool_path(bundle: Option<&Path>, name: &str) -> PathBuf {
    let file_name = format!("{name}{}", env::consts::EXE_SUFFIX);
    match bundle.map(|dir| dir.join(&file_name)) {
        Some(bundled) if bundled.is_file() => bundled,
        _ => PathBuf::from(file_name),
    }
}
