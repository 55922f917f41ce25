use std::path::Path;
use std::process::{Command, Stdio};

use serde::Deserialize;

use crate::error::{Error, Result};

#[derive(Deserialize, Debug)]
struct FFProbeJsonOutput {
    pub format: Option<FFProbeJsonFormat>,
}

#[derive(Deserialize, Debug)]
struct FFProbeJsonFormat {
    pub duration: Option<String>,
}

/// Container duration in seconds as reported by ffprobe.
pub fn probe_duration(ffprobe: &Path, path: &Path) -> Result<Option<f64>> {
    let output = Command::new(ffprobe)
        .args(["-v", "error", "-show_entries", "format=duration", "-of", "json"])
        .arg(path)
        .stdin(Stdio::null())
        .output()?;
    if output.status.success() {
        parse_duration(&String::from_utf8_lossy(&output.stdout))
    } else {
        Err(Error::encode(path, String::from_utf8_lossy(&output.stderr).trim()))
    }
}

fn parse_duration(json: &str) -> Result<Option<f64>> {
    let deserialized = serde_json::from_str::<FFProbeJsonOutput>(json)?;
    Ok(deserialized
        .format
        .and_then(|f| f.duration)
        .and_then(|d| d.parse::<f64>().ok())
        .filter(|d| *d > 0.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        let json = r#"{ "format": { "duration": "12.480000" } }"#;
        assert_eq!(parse_duration(json).unwrap(), Some(12.48));
    }

    #[test]
    fn test_parse_duration_missing() {
        assert_eq!(parse_duration(r#"{ "format": {} }"#).unwrap(), None);
        assert_eq!(parse_duration(r#"{}"#).unwrap(), None);
        assert_eq!(parse_duration(r#"{ "format": { "duration": "N/A" } }"#).unwrap(), None);
    }

    #[test]
    fn test_parse_duration_invalid_json() {
        assert!(matches!(parse_duration("not json"), Err(Error::Json(_))));
    }

    #[test]
    fn test_probe_missing_binary() {
        let missing = Path::new("/nonexistent/ffprobe-for-tests");
        assert!(matches!(probe_duration(missing, Path::new("a.mp4")), Err(Error::Io(_))));
    }
}
