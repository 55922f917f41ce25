use std::collections::VecDeque;
use std::ffi::OsString;
use std::fs;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStderr, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use crate::ffmpeg::FFmpeg;
use crate::ffmpeg::probe::probe_duration;
use crate::ffmpeg::progress::{read_segment, DiagnosticLine, ProgressTracker};
use crate::fstools::file_size;
use crate::profile::EncodingProfile;

const DIAGNOSTIC_TAIL: usize = 20;
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Result of converting one file.
#[derive(Clone, Debug, PartialEq)]
pub struct ConversionOutcome {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub success: bool,
    pub input_size: u64,
    pub output_size: Option<u64>,
    pub error: Option<String>,
}

impl ConversionOutcome {
    pub fn succeeded(source: &Path, destination: &Path) -> Self {
        ConversionOutcome {
            source: source.to_path_buf(),
            destination: destination.to_path_buf(),
            success: true,
            input_size: file_size(source).unwrap_or(0),
            output_size: file_size(destination),
            error: None,
        }
    }

    pub fn failed(source: &Path, destination: &Path, error: impl Into<String>) -> Self {
        ConversionOutcome {
            source: source.to_path_buf(),
            destination: destination.to_path_buf(),
            success: false,
            input_size: file_size(source).unwrap_or(0),
            output_size: None,
            error: Some(error.into()),
        }
    }
}

/// Converts a single file. Implementations block until the conversion ends
/// and report failures through the outcome rather than panicking.
pub trait Encoder: Send + Sync {
    fn transcode(
        &self,
        source: &Path,
        destination: &Path,
        profile: &EncodingProfile,
        interrupt: &AtomicBool,
        on_progress: &mut dyn FnMut(f64),
    ) -> ConversionOutcome;
}

pub struct FFmpegEncoder {
    tools: FFmpeg,
}

impl FFmpegEncoder {
    pub fn new(tools: FFmpeg) -> Self {
        FFmpegEncoder { tools }
    }

    fn build_args(&self, source: &Path, destination: &Path, profile: &EncodingProfile) -> Vec<OsString> {
        fn os(s: &str) -> OsString { OsString::from(s) }

        let mut args = vec![
            os("-y"),
            os("-hide_banner"),
            os("-loglevel"), os("error"),
            // keeps the time= line coming despite the quiet log level
            os("-stats"),
            os("-i"), source.as_os_str().to_os_string(),
        ];
        args.extend(profile.video_parameters().into_iter().map(OsString::from));
        args.extend([
            os("-movflags"), os("+faststart"),
            os("-c:a"), os("aac"),
            os("-b:a"), os("192k"),
        ]);
        args.push(destination.as_os_str().to_os_string());
        args
    }

    fn probed_duration(&self, source: &Path) -> Option<f64> {
        match probe_duration(&self.tools.ffprobe, source) {
            Ok(duration) => duration,
            Err(err) => {
                debug!(source = %source.display(), %err, "ffprobe gave no duration");
                None
            },
        }
    }
}

impl Encoder for FFmpegEncoder {
    fn transcode(
        &self,
        source: &Path,
        destination: &Path,
        profile: &EncodingProfile,
        interrupt: &AtomicBool,
        on_progress: &mut dyn FnMut(f64),
    ) -> ConversionOutcome {
        let tracker = ProgressTracker::new(self.probed_duration(source));
        let args = self.build_args(source, destination, profile);
        debug!(program = %self.tools.ffmpeg.display(), ?args, "launching encoder");

        let mut command = Command::new(&self.tools.ffmpeg);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        detach(&mut command);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(err) => {
                return ConversionOutcome::failed(
                    source,
                    destination,
                    format!("unable to launch {}: {err}", self.tools.ffmpeg.display()));
            },
        };

        let diagnostics = match child.stderr.take() {
            Some(stderr) => consume_stderr(stderr, tracker, interrupt, on_progress),
            None => vec![],
        };

        let status = match wait_for_exit(&mut child, interrupt) {
            Ok(Some(status)) => status,
            Ok(None) => {
                if let Err(err) = child.kill() {
                    warn!(pid = child.id(), %err, "error killing encoder");
                }
                let _ = child.wait();
                let _ = fs::remove_file(destination);
                return ConversionOutcome::failed(source, destination, "interrupted");
            },
            Err(err) => {
                return ConversionOutcome::failed(
                    source,
                    destination,
                    format!("error waiting for the encoder: {err}"));
            },
        };

        if status.success() {
            if destination.is_file() {
                ConversionOutcome::succeeded(source, destination)
            } else {
                ConversionOutcome::failed(source, destination, "encoder exited cleanly but wrote no output")
            }
        } else {
            let summary = match status.code() {
                Some(code) => format!("encoder exited with {code}"),
                None => String::from("encoder terminated abnormally"),
            };
            let detail = match diagnostics.is_empty() {
                true => summary,
                false => format!("{summary}\n{}", diagnostics.join("\n")),
            };
            ConversionOutcome::failed(source, destination, detail)
        }
    }
}

/// Feeds stderr through the tracker until EOF or until `interrupt` is raised.
/// Reading happens on a helper thread so a silent encoder cannot block the
/// interrupt check. Returns the last non-progress lines seen.
fn consume_stderr(
    stderr: ChildStderr,
    mut tracker: ProgressTracker,
    interrupt: &AtomicBool,
    on_progress: &mut dyn FnMut(f64),
) -> Vec<String> {
    let (tx, rx) = mpsc::channel();
    let reader = thread::spawn(move || forward_segments(stderr, tx));
    let mut tail = VecDeque::with_capacity(DIAGNOSTIC_TAIL);

    loop {
        if interrupt.load(Ordering::SeqCst) {
            // the reader ends on its own once the child is killed
            return tail.into();
        }

        let line = match rx.recv_timeout(POLL_INTERVAL) {
            Ok(line) => line,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        if let Some(fraction) = tracker.observe(&line) {
            on_progress(fraction);
        } else if DiagnosticLine::parse(&line) == DiagnosticLine::Other {
            if tail.len() == DIAGNOSTIC_TAIL {
                tail.pop_front();
            }
            tail.push_back(line);
        }
    }

    let _ = reader.join();
    tail.into()
}

fn forward_segments(stderr: ChildStderr, tx: Sender<String>) {
    let mut reader = BufReader::new(stderr);
    let mut buf = vec![];
    loop {
        buf.clear();
        match read_segment(&mut reader, &mut buf) {
            Ok(0) => break,
            Ok(_) => (),
            Err(err) => {
                debug!(%err, "stopped reading encoder diagnostics");
                break;
            },
        }

        let line = String::from_utf8_lossy(&buf).trim().to_string();
        if line.is_empty() {
            continue;
        }
        if tx.send(line).is_err() {
            break;
        }
    }
}

/// Waits for the child to exit. `None` when `interrupt` was raised first,
/// in which case the child is still to be killed.
fn wait_for_exit(child: &mut Child, interrupt: &AtomicBool) -> io::Result<Option<ExitStatus>> {
    loop {
        if interrupt.load(Ordering::SeqCst) {
            return Ok(None);
        }
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        thread::sleep(POLL_INTERVAL);
    }
}

#[cfg(windows)]
fn detach(command: &mut Command) {
    use std::os::windows::process::CommandExt;
    const CREATE_NO_WINDOW: u32 = 0x0800_0000;
    command.creation_flags(CREATE_NO_WINDOW);
}

// own process group, so a terminal Ctrl-C is left to the orchestrator
#[cfg(unix)]
fn detach(command: &mut Command) {
    use std::os::unix::process::CommandExt;
    command.process_group(0);
}

#[cfg(not(any(unix, windows)))]
fn detach(_command: &mut Command) {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::Tier;

    #[test]
    fn test_build_args() {
        let encoder = FFmpegEncoder::new(FFmpeg::new("ffmpeg", "ffprobe"));
        let args = encoder.build_args(
            Path::new("/in/a.mp4"),
            Path::new("/out/a_comp.mp4"),
            &EncodingProfile::for_tier(Tier::Low));
        let args: Vec<String> = args.iter().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(args, vec![
            "-y", "-hide_banner", "-loglevel", "error", "-stats",
            "-i", "/in/a.mp4",
            "-c:v", "libx264", "-crf", "28", "-preset", "veryfast",
            "-movflags", "+faststart",
            "-c:a", "aac", "-b:a", "192k",
            "/out/a_comp.mp4",
        ]);
    }

    #[test]
    fn test_launch_failure_is_an_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("a.mp4");
        fs::write(&source, b"1234").unwrap();
        let encoder = FFmpegEncoder::new(FFmpeg::new(
            "/nonexistent/ffmpeg-for-tests",
            "/nonexistent/ffprobe-for-tests"));

        let outcome = encoder.transcode(
            &source,
            &dir.path().join("a_comp.mp4"),
            &EncodingProfile::resolve("medium"),
            &AtomicBool::new(false),
            &mut |_| {});
        assert!(!outcome.success);
        assert_eq!(outcome.input_size, 4);
        assert!(outcome.error.unwrap().contains("unable to launch"));
    }

    #[cfg(unix)]
    mod process {
        use super::*;
        use std::os::unix::fs::PermissionsExt;

        fn fake_ffmpeg(dir: &Path, body: &str) -> FFmpegEncoder {
            let script = dir.join("fake-ffmpeg");
            fs::write(&script, format!("#!/bin/sh\nfor last; do :; done\n{body}\n")).unwrap();
            fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
            FFmpegEncoder::new(FFmpeg::new(script, dir.join("no-ffprobe")))
        }

        fn run(encoder: &FFmpegEncoder, dir: &Path, interrupt: bool) -> (ConversionOutcome, Vec<f64>) {
            let source = dir.join("clip.mp4");
            fs::write(&source, vec![0u8; 64]).unwrap();
            let mut fractions = vec![];
            let outcome = encoder.transcode(
                &source,
                &dir.join("clip_comp.mp4"),
                &EncodingProfile::resolve("high"),
                &AtomicBool::new(interrupt),
                &mut |f: f64| fractions.push(f));
            (outcome, fractions)
        }

        #[test]
        fn test_successful_transcode_reports_progress() {
            let dir = tempfile::tempdir().unwrap();
            let encoder = fake_ffmpeg(dir.path(), concat!(
                "echo '  Duration: 00:00:10.00, start: 0.000000, bitrate: 1 kb/s' >&2\n",
                "printf 'frame=1 time=00:00:02.50 bitrate=1\\r' >&2\n",
                "printf 'frame=2 time=00:00:05.00 bitrate=1\\r' >&2\n",
                "printf 'frame=3 time=00:00:10.00 bitrate=1\\n' >&2\n",
                "printf 'compressed' > \"$last\"",
            ));

            let (outcome, fractions) = run(&encoder, dir.path(), false);
            assert!(outcome.success, "{:?}", outcome.error);
            assert_eq!(outcome.input_size, 64);
            assert_eq!(outcome.output_size, Some(10));
            assert_eq!(fractions, vec![0.25, 0.5, 1.0]);
        }

        #[test]
        fn test_nonzero_exit_carries_diagnostics() {
            let dir = tempfile::tempdir().unwrap();
            let encoder = fake_ffmpeg(dir.path(), "echo 'clip.mp4: Invalid data found' >&2\nexit 1");

            let (outcome, fractions) = run(&encoder, dir.path(), false);
            assert!(!outcome.success);
            assert!(fractions.is_empty());
            let error = outcome.error.unwrap();
            assert!(error.contains("exited with 1"));
            assert!(error.contains("Invalid data found"));
        }

        #[test]
        fn test_clean_exit_without_output_fails() {
            let dir = tempfile::tempdir().unwrap();
            let encoder = fake_ffmpeg(dir.path(), "exit 0");

            let (outcome, _) = run(&encoder, dir.path(), false);
            assert!(!outcome.success);
            assert!(outcome.error.unwrap().contains("no output"));
        }

        #[test]
        fn test_interrupt_before_launch_kills_encoder() {
            let dir = tempfile::tempdir().unwrap();
            let encoder = fake_ffmpeg(dir.path(), "printf 'partial' > \"$last\"\nsleep 5");

            let (outcome, _) = run(&encoder, dir.path(), true);
            assert!(!outcome.success);
            assert_eq!(outcome.error.as_deref(), Some("interrupted"));
            assert!(!dir.path().join("clip_comp.mp4").exists());
        }

        #[test]
        fn test_interrupt_kills_silent_encoder() {
            let dir = tempfile::tempdir().unwrap();
            let encoder = fake_ffmpeg(dir.path(), "printf 'partial' > \"$last\"\nsleep 4");
            let source = dir.path().join("clip.mp4");
            let destination = dir.path().join("clip_comp.mp4");
            fs::write(&source, vec![0u8; 64]).unwrap();
            let interrupt = AtomicBool::new(false);

            let started = std::time::Instant::now();
            let outcome = thread::scope(|s| {
                s.spawn(|| {
                    thread::sleep(Duration::from_millis(200));
                    interrupt.store(true, Ordering::SeqCst);
                });
                encoder.transcode(
                    &source,
                    &destination,
                    &EncodingProfile::resolve("medium"),
                    &interrupt,
                    &mut |_| {})
            });

            assert!(started.elapsed() < Duration::from_secs(2), "took {:?}", started.elapsed());
            assert!(!outcome.success);
            assert_eq!(outcome.error.as_deref(), Some("interrupted"));
            assert!(!destination.exists());
        }
    }
}
