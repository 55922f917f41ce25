pub mod batch_state;
pub mod catalog;
pub mod error;
pub mod ffmpeg;
pub mod fstools;
pub mod orchestrator;
pub mod profile;

pub use error::{Error, Result};
