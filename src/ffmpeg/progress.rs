use std::io::{self, BufRead};
use std::sync::LazyLock;

use regex::{Captures, Regex};

static DURATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Duration:\s*(\d+):(\d{1,2}):(\d{1,2}(?:\.\d+)?)").expect("valid duration pattern")
});

static POSITION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"time=\s*(\d+):(\d{1,2}):(\d{1,2}(?:\.\d+)?)").expect("valid position pattern")
});

#[derive(Debug, PartialEq)]
pub enum DiagnosticLine {
    Duration(f64),
    Position(f64),
    Other,
}

impl DiagnosticLine {
    pub fn parse(line: &str) -> Self {
        if let Some(seconds) = DURATION.captures(line).and_then(|c| seconds(&c)) {
            DiagnosticLine::Duration(seconds)
        } else if let Some(seconds) = POSITION.captures(line).and_then(|c| seconds(&c)) {
            DiagnosticLine::Position(seconds)
        } else {
            DiagnosticLine::Other
        }
    }
}

fn seconds(caps: &Captures) -> Option<f64> {
    let h: f64 = caps.get(1)?.as_str().parse().ok()?;
    let m: f64 = caps.get(2)?.as_str().parse().ok()?;
    let s: f64 = caps.get(3)?.as_str().parse().ok()?;
    Some(h * 3600.0 + m * 60.0 + s)
}

/// Turns the encoder's stderr into a completion fraction for a single file.
#[derive(Debug)]
pub struct ProgressTracker {
    duration: Option<f64>,
    duration_from_stream: bool,
    last: f64,
}

impl ProgressTracker {
    /// `probed_duration` is used until the stream announces its own.
    pub fn new(probed_duration: Option<f64>) -> Self {
        ProgressTracker {
            duration: probed_duration.filter(|d| *d > 0.0),
            duration_from_stream: false,
            last: 0.0,
        }
    }

    pub fn duration(&self) -> Option<f64> {
        self.duration
    }

    /// Returns a fraction in [0, 1], never lower than the previous one.
    pub fn observe(&mut self, line: &str) -> Option<f64> {
        match DiagnosticLine::parse(line) {
            DiagnosticLine::Duration(total) => {
                if !self.duration_from_stream && total > 0.0 {
                    self.duration = Some(total);
                    self.duration_from_stream = true;
                }
                None
            },
            DiagnosticLine::Position(position) => {
                let total = self.duration?;
                let fraction = (position / total).clamp(0.0, 1.0).max(self.last);
                self.last = fraction;
                Some(fraction)
            },
            DiagnosticLine::Other => None,
        }
    }
}

/// Reads one segment terminated by `\n` or `\r` into `buf`, without the
/// terminator. Returns the number of bytes consumed; 0 means end of stream.
pub fn read_segment<R: BufRead>(reader: &mut R, buf: &mut Vec<u8>) -> io::Result<usize> {
    let mut consumed = 0;
    loop {
        let (done, used) = {
            let available = match reader.fill_buf() {
                Ok(available) => available,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            };
            match available.iter().position(|b| *b == b'\n' || *b == b'\r') {
                Some(i) => {
                    buf.extend_from_slice(&available[..i]);
                    (true, i + 1)
                },
                None => {
                    buf.extend_from_slice(available);
                    (available.is_empty(), available.len())
                },
            }
        };
        reader.consume(used);
        consumed += used;
        if done {
            return Ok(consumed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_parse_lines() {
        assert_eq!(
            DiagnosticLine::parse("  Duration: 00:01:30.50, start: 0.000000, bitrate: 1205 kb/s"),
            DiagnosticLine::Duration(90.5));
        assert_eq!(
            DiagnosticLine::parse("frame=  100 fps=25.0 q=28.0 size=256kB time=01:00:04.00 bitrate=1500kbits/s speed=1.5x"),
            DiagnosticLine::Position(3604.0));
        assert_eq!(DiagnosticLine::parse("frame=1 time=N/A bitrate=N/A"), DiagnosticLine::Other);
        assert_eq!(DiagnosticLine::parse("Duration: N/A, bitrate: N/A"), DiagnosticLine::Other);
        assert_eq!(DiagnosticLine::parse("garbage"), DiagnosticLine::Other);
    }

    #[test]
    fn test_fraction_requires_duration() {
        let mut tracker = ProgressTracker::new(None);
        assert_eq!(tracker.observe("time=00:00:01.00"), None);
        assert_eq!(tracker.observe("Duration: 00:00:10.00, start: 0"), None);
        assert_eq!(tracker.observe("time=00:00:05.00"), Some(0.5));
    }

    #[test]
    fn test_first_stream_duration_wins() {
        let mut tracker = ProgressTracker::new(Some(100.0));
        tracker.observe("Duration: 00:00:10.00");
        tracker.observe("Duration: 00:00:20.00");
        assert_eq!(tracker.duration(), Some(10.0));
        assert_eq!(tracker.observe("time=00:00:02.50"), Some(0.25));
    }

    #[test]
    fn test_fraction_is_clipped_and_monotonic() {
        let mut tracker = ProgressTracker::new(Some(10.0));
        assert_eq!(tracker.observe("time=00:00:04.00"), Some(0.4));
        assert_eq!(tracker.observe("time=00:00:03.00"), Some(0.4));
        assert_eq!(tracker.observe("time=00:00:30.00"), Some(1.0));
        assert_eq!(tracker.observe("time=-00:00:00.02"), None);
    }

    #[test]
    fn test_zero_probe_duration_is_ignored() {
        let mut tracker = ProgressTracker::new(Some(0.0));
        assert_eq!(tracker.observe("time=00:00:04.00"), None);
    }

    #[test]
    fn test_read_segment_splits_on_carriage_returns() {
        let mut reader = Cursor::new(b"one\rtwo\r\nthree".to_vec());
        let mut segments = vec![];
        loop {
            let mut buf = vec![];
            if read_segment(&mut reader, &mut buf).unwrap() == 0 {
                break;
            }
            segments.push(String::from_utf8(buf).unwrap());
        }
        assert_eq!(segments, vec!["one", "two", "", "three"]);
    }
}
