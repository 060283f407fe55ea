pub mod listener;
pub mod screen;
pub mod store;
pub mod trigger;

use chrono::{DateTime, Local};
use image::RgbaImage;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("Failed to capture screen: {0}")]
    Screen(String),
    #[error("Failed to encode image: {0}")]
    Encode(String),
    #[error("Failed to save screenshot to {path}: {source}")]
    Save {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// A fired capture chord and the screenshot it produced.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureEvent {
    pub captured_at: DateTime<Local>,
    pub path: PathBuf,
}

/// Something that can produce a full-screen image on demand.
pub trait ScreenSource: Send + Sync {
    fn grab(&self) -> Result<RgbaImage, CaptureError>;
}
