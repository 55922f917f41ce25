use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use human_repr::HumanCount;
use tracing::{debug, info, warn};

use crate::batch_state::{BatchProgress, BatchState};
use crate::catalog::FileCatalog;
use crate::error::{Error, Result};
use crate::ffmpeg::encoder::{ConversionOutcome, Encoder};
use crate::fstools::{classify_file, destination_for, display_name, DirEntryCategory};
use crate::profile::{EncodingProfile, Tier};

pub const DEFAULT_SUFFIX: &str = "_comp";

#[derive(Clone, Debug, PartialEq)]
pub enum Outcome {
    Completed,
    Stopped,
    Failed(String),
}

#[derive(Clone, Debug, PartialEq)]
pub enum BatchEvent {
    Started { tier: Tier, total: usize },
    /// Batch-level tick, emitted when a file starts and when it ends.
    Progress { percent: f64, file: Option<String> },
    /// Fraction of the file currently converting.
    FileProgress { file: String, fraction: f64 },
    FileFinished(ConversionOutcome),
    Log(String),
    Finished(Outcome),
}

/// What to do when a single file fails to convert.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub enum FailurePolicy {
    #[default]
    Continue,
    Abort,
}

#[derive(Clone, Debug)]
pub struct BatchRequest {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub tier: String,
}

impl BatchRequest {
    pub fn new(input_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>, tier: &str) -> Self {
        BatchRequest {
            input_dir: input_dir.into(),
            output_dir: output_dir.into(),
            tier: String::from(tier),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct BatchReport {
    pub outcome: Outcome,
    pub total: usize,
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub input_bytes: u64,
    pub output_bytes: u64,
}

impl BatchReport {
    fn new(total: usize) -> Self {
        BatchReport {
            total,
            outcome: Outcome::Completed,
            attempted: 0,
            succeeded: 0,
            failed: 0,
            input_bytes: 0,
            output_bytes: 0,
        }
    }

    fn record(&mut self, outcome: &ConversionOutcome) {
        self.attempted += 1;
        if outcome.success {
            self.succeeded += 1;
            self.input_bytes += outcome.input_size;
            self.output_bytes += outcome.output_size.unwrap_or(0);
        } else {
            self.failed += 1;
        }
    }
}

/// Requests a stop of whichever run the orchestrator is executing.
#[derive(Clone)]
pub struct StopHandle {
    current: Arc<Mutex<Arc<BatchState>>>,
}

impl StopHandle {
    /// The file being converted runs to completion; nothing after it starts.
    pub fn stop(&self) {
        lock(&self.current).request_stop();
    }

    /// Like `stop`, but also kills the encoder working on the current file.
    pub fn abort(&self) {
        lock(&self.current).request_abort();
    }

    pub fn is_running(&self) -> bool {
        lock(&self.current).is_running()
    }

    pub fn progress(&self) -> BatchProgress {
        lock(&self.current).snapshot()
    }
}

struct RunGuard {
    busy: Arc<AtomicBool>,
    state: Arc<BatchState>,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.state.finish();
        self.busy.store(false, Ordering::SeqCst);
    }
}

pub struct BatchOrchestrator<E: Encoder> {
    encoder: E,
    catalog: FileCatalog,
    failure_policy: FailurePolicy,
    suffix: String,
    busy: Arc<AtomicBool>,
    current: Arc<Mutex<Arc<BatchState>>>,
    subscribers: Mutex<Vec<Sender<BatchEvent>>>,
}

impl<E: Encoder> BatchOrchestrator<E> {
    pub fn new(encoder: E) -> Self {
        BatchOrchestrator {
            encoder,
            catalog: FileCatalog::default(),
            failure_policy: FailurePolicy::default(),
            suffix: String::from(DEFAULT_SUFFIX),
            busy: Arc::new(AtomicBool::new(false)),
            current: Arc::new(Mutex::new(Arc::new(BatchState::new()))),
            subscribers: Mutex::new(vec![]),
        }
    }

    pub fn catalog(mut self, catalog: FileCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn failure_policy(mut self, failure_policy: FailurePolicy) -> Self {
        self.failure_policy = failure_policy;
        self
    }

    pub fn suffix(mut self, suffix: &str) -> Self {
        self.suffix = String::from(suffix);
        self
    }

    pub fn subscribe(&self) -> Receiver<BatchEvent> {
        let (tx, rx) = mpsc::channel();
        lock(&self.subscribers).push(tx);
        rx
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            current: Arc::clone(&self.current),
        }
    }

    pub fn stop(&self) {
        self.stop_handle().stop();
    }

    pub fn is_running(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    /// Runs a batch on the calling thread. Returns `Ok(None)` without doing
    /// anything when another run is already in progress.
    pub fn run(&self, request: &BatchRequest) -> Result<Option<BatchReport>> {
        match self.claim() {
            Some(guard) => self.execute(request, &guard.state).map(Some),
            None => Ok(None),
        }
    }

    /// Runs a batch on a worker thread. `None` when a run is already in progress.
    pub fn start(self: &Arc<Self>, request: BatchRequest) -> Option<JoinHandle<Result<BatchReport>>>
    where
        E: 'static,
    {
        let guard = self.claim()?;
        let orchestrator = Arc::clone(self);
        Some(thread::spawn(move || orchestrator.execute(&request, &guard.state)))
    }

    fn claim(&self) -> Option<RunGuard> {
        if self.busy.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_err() {
            debug!("batch already running; ignoring start request");
            return None;
        }
        let state = Arc::new(BatchState::new());
        *lock(&self.current) = Arc::clone(&state);
        Some(RunGuard {
            busy: Arc::clone(&self.busy),
            state,
        })
    }

    fn publish(&self, msg: BatchEvent) {
        for tx in lock(&self.subscribers).iter() {
            let _ = tx.send(msg.clone());
        }
    }

    fn log(&self, message: String) {
        debug!("{message}");
        self.publish(BatchEvent::Log(message));
    }

    fn execute(&self, request: &BatchRequest, state: &BatchState) -> Result<BatchReport> {
        if request.input_dir.as_os_str().is_empty() || request.output_dir.as_os_str().is_empty() {
            return Err(Error::Configuration(String::from("both input and output directories are required")));
        }

        let profile = EncodingProfile::resolve(&request.tier);

        let output_dir = match fs::create_dir_all(&request.output_dir)
            .and_then(|()| request.output_dir.canonicalize())
        {
            Ok(output_dir) => output_dir,
            Err(err) => {
                let reason = Error::Fatal(format!("unable to create {}: {err}", request.output_dir.display()));
                return Ok(self.fail_setup(reason));
            },
        };

        let mut files = self.catalog.list(&request.input_dir)?;
        if request.input_dir.canonicalize().is_ok_and(|dir| dir == output_dir) {
            if self.suffix.is_empty() {
                return Err(Error::Configuration(String::from(
                    "a suffix is required when the output directory is the input directory")));
            }
            // earlier results sit next to their sources
            files.retain(|f| !is_converted(&f.path, &self.suffix));
        }
        if files.is_empty() {
            return Err(Error::NoInput { path: request.input_dir.clone() });
        }

        let total = files.len();
        let mut report = BatchReport::new(total);
        state.begin(total);
        info!(tier = %profile.tier, total, input = %request.input_dir.display(), "batch started");
        self.publish(BatchEvent::Started { tier: profile.tier, total });
        self.log(format!("Converting {total} files with the {} tier", profile.tier));

        let mut failure: Option<Error> = None;
        for (i, file) in files.iter().enumerate() {
            if !state.is_running() {
                break;
            }

            if classify_file(&request.output_dir) != DirEntryCategory::Directory {
                failure = Some(Error::Fatal(format!(
                    "output directory {} is no longer available",
                    request.output_dir.display())));
                break;
            }

            let index = i + 1;
            state.advance(index);
            let name = display_name(&file.path);
            let destination = destination_for(&file.path, &request.output_dir, &self.suffix);

            self.publish(BatchEvent::Progress {
                percent: percent(index - 1, total),
                file: Some(name.clone()),
            });
            self.log(format!("Converting file {index}/{total}: {name} ({})", file.size.human_count_bytes()));

            let outcome = self.encoder.transcode(
                &file.path,
                &destination,
                &profile,
                state.interrupt(),
                &mut |fraction| self.publish(BatchEvent::FileProgress {
                    file: name.clone(),
                    fraction,
                }));
            report.record(&outcome);

            let error = outcome.error.clone();
            if outcome.success {
                self.log(format!(
                    "Converted {name}: {} -> {}",
                    outcome.input_size.human_count_bytes(),
                    outcome.output_size.unwrap_or(0).human_count_bytes()));
            } else {
                let detail = error.as_deref().unwrap_or("unknown error");
                warn!(file = %file.path.display(), error = detail, "conversion failed");
                self.log(format!("Failed to convert {name}: {detail}"));
            }
            self.publish(BatchEvent::FileFinished(outcome));

            self.publish(BatchEvent::Progress {
                percent: percent(index, total),
                file: Some(name),
            });

            if error.is_some() && self.failure_policy == FailurePolicy::Abort && !state.stop_requested() {
                failure = Some(Error::encode(&file.path, error.unwrap_or_default()));
                break;
            }
        }

        report.outcome = match failure {
            Some(err) => Outcome::Failed(err.to_string()),
            None if state.is_running() => Outcome::Completed,
            None => Outcome::Stopped,
        };

        match &report.outcome {
            Outcome::Completed => self.log(format!(
                "Conversion finished: {}/{} files converted", report.succeeded, total)),
            Outcome::Stopped => self.log(format!(
                "Conversion stopped by user after {} of {} files", report.attempted, total)),
            Outcome::Failed(reason) => self.log(format!("Conversion failed: {reason}")),
        }
        info!(outcome = ?report.outcome, succeeded = report.succeeded, failed = report.failed, "batch finished");
        self.publish(BatchEvent::Finished(report.outcome.clone()));

        Ok(report)
    }

    fn fail_setup(&self, reason: Error) -> BatchReport {
        let mut report = BatchReport::new(0);
        report.outcome = Outcome::Failed(reason.to_string());
        warn!(%reason, "batch could not start");
        self.log(format!("Conversion failed: {reason}"));
        self.publish(BatchEvent::Finished(report.outcome.clone()));
        report
    }
}

fn is_converted(path: &Path, suffix: &str) -> bool {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().ends_with(suffix))
        .unwrap_or(false)
}

fn percent(done: usize, total: usize) -> f64 {
    (done as f64) * 100.0 / (total as f64)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
