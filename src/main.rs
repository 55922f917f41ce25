use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::thread::JoinHandle;
use std::time::Duration;

use compress_batch::ffmpeg::FFmpeg;
use compress_batch::ffmpeg::encoder::FFmpegEncoder;
use compress_batch::orchestrator::{
    BatchEvent, BatchOrchestrator, BatchReport, BatchRequest, FailurePolicy, Outcome, StopHandle,
};
use human_repr::HumanCount;
use kdam::{term, tqdm, BarExt};
use rustop::opts;
use signal_hook::consts::TERM_SIGNALS;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let (args, _rest) = opts! {
        synopsis "Compress every mp4 file of a folder with ffmpeg.";
        opt tier:String=String::from("medium"), desc:"Quality tier. [low, medium, high]";
        opt output:Option<String>, desc:"Output directory. (default: <input>/mp4_comp)";
        opt suffix:String=String::from("_comp"), desc:"Suffix appended to converted file names.";
        opt ffmpeg:Option<String>, desc:"Path to the ffmpeg binary.";
        opt ffprobe:Option<String>, desc:"Path to the ffprobe binary.";
        opt abort_on_failure:bool=false, desc:"Stop the batch at the first file that fails.";
        param input:String, desc:"Input directory";
    }.parse_or_exit();

    let tools = FFmpeg::locate(args.ffmpeg.map(PathBuf::from), args.ffprobe.map(PathBuf::from));
    if !tools.is_installed() {
        println!("ffmpeg was not found at {:?}.", tools.ffmpeg);
        return ExitCode::FAILURE;
    }

    let input = PathBuf::from(&args.input);
    let output = match args.output {
        Some(output) => PathBuf::from(output),
        None => input.join("mp4_comp"),
    };
    let policy = match args.abort_on_failure {
        true => FailurePolicy::Abort,
        false => FailurePolicy::Continue,
    };

    let interrupted = Arc::new(AtomicBool::new(false));
    for signal in TERM_SIGNALS {
        if let Err(err) = signal_hook::flag::register(*signal, Arc::clone(&interrupted)) {
            println!("unable to install signal handler: {err}");
            return ExitCode::FAILURE;
        }
    }

    let orchestrator = Arc::new(
        BatchOrchestrator::new(FFmpegEncoder::new(tools))
            .failure_policy(policy)
            .suffix(&args.suffix));
    let events = orchestrator.subscribe();
    let worker = match orchestrator.start(BatchRequest::new(input, output, &args.tier)) {
        Some(worker) => worker,
        None => {
            println!("A conversion is already running.");
            return ExitCode::FAILURE;
        },
    };

    render(events, &worker, &orchestrator.stop_handle(), &interrupted);

    match worker.join() {
        Ok(Ok(report)) => summarize(&report),
        Ok(Err(err)) => {
            println!("{err}");
            ExitCode::FAILURE
        },
        Err(err) => {
            println!("conversion thread panicked: {err:?}");
            ExitCode::FAILURE
        },
    }
}

/// Draws batch progress until the worker finishes. The first signal asks for a
/// stop after the current file, the second kills the encoder.
fn render<T>(events: Receiver<BatchEvent>, worker: &JoinHandle<T>, stop: &StopHandle, interrupted: &AtomicBool) {
    term::init(false);
    let mut pbar = tqdm!(
        total = 100,
        desc = "starting",
        position = 0,
        force_refresh = true
    );
    let mut signals = 0;

    loop {
        match events.recv_timeout(Duration::from_millis(200)) {
            Ok(BatchEvent::Progress { percent, file }) => {
                if let Some(file) = file {
                    pbar.set_description(file);
                }
                pbar.set_postfix("");
                let _ = pbar.update_to(percent.round() as usize);
            },
            Ok(BatchEvent::FileProgress { fraction, .. }) => {
                pbar.set_postfix(format!("file {:.0}%", fraction * 100.0));
                let _ = pbar.refresh();
            },
            Ok(BatchEvent::Log(message)) => {
                let _ = pbar.write(message);
            },
            Ok(BatchEvent::Finished(_)) => break,
            Ok(_) => (),
            Err(RecvTimeoutError::Timeout) => {
                if worker.is_finished() {
                    break;
                }
            },
            Err(RecvTimeoutError::Disconnected) => break,
        }

        if interrupted.swap(false, Ordering::SeqCst) {
            signals += 1;
            if signals == 1 {
                let _ = pbar.write("Stopping after the current file; interrupt again to abort it.");
                stop.stop();
            } else {
                stop.abort();
            }
        }
    }

    eprintln!();
}

fn summarize(report: &BatchReport) -> ExitCode {
    println!(
        "{}/{} files converted, {} -> {}",
        report.succeeded,
        report.total,
        report.input_bytes.human_count_bytes(),
        report.output_bytes.human_count_bytes());
    match &report.outcome {
        Outcome::Completed if report.failed == 0 => {
            println!("Success! ^__^");
            ExitCode::SUCCESS
        },
        Outcome::Completed => {
            println!("{} files failed -__-", report.failed);
            ExitCode::FAILURE
        },
        Outcome::Stopped => {
            println!("Stopped.");
            ExitCode::FAILURE
        },
        Outcome::Failed(reason) => {
            println!("Failure -__-\n{reason}");
            ExitCode::FAILURE
        },
    }
}
