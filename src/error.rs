use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Input or output directory was not supplied.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("{} does not exist", path.display())]
    NotFound { path: PathBuf },

    #[error("{} is not a directory", path.display())]
    NotADirectory { path: PathBuf },

    /// The catalog found nothing to convert.
    #[error("no eligible video files in {}", path.display())]
    NoInput { path: PathBuf },

    #[error("error converting {}: {message}", path.display())]
    Encode { path: PathBuf, message: String },

    /// Conditions that end a run regardless of policy.
    #[error("fatal: {0}")]
    Fatal(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn not_found(path: impl Into<PathBuf>) -> Self {
        Error::NotFound { path: path.into() }
    }

    pub fn encode(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Error::Encode {
            path: path.into(),
            message: message.into(),
        }
    }
}
