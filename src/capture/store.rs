use chrono::{DateTime, Local};
use std::path::PathBuf;

use super::CaptureError;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// Writes screenshots as `screenshot_<timestamp>.png` under one directory.
#[derive(Debug, Clone)]
pub struct ScreenshotStore {
    dir: PathBuf,
}

impl ScreenshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// First free path for `captured_at`; same-second captures get `_1`, `_2`, ...
    pub fn path_for(&self, captured_at: &DateTime<Local>) -> PathBuf {
        let stamp = captured_at.format(TIMESTAMP_FORMAT);
        let first = self.dir.join(format!("screenshot_{}.png", stamp));
        if !first.exists() {
            return first;
        }
        (1..)
            .map(|n| self.dir.join(format!("screenshot_{}_{}.png", stamp, n)))
            .find(|p| !p.exists())
            .unwrap_or(first)
    }

    pub fn save(
        &self,
        captured_at: &DateTime<Local>,
        png: &[u8],
    ) -> Result<PathBuf, CaptureError> {
        std::fs::create_dir_all(&self.dir).map_err(|source| CaptureError::Save {
            path: self.dir.clone(),
            source,
        })?;

        let path = self.path_for(captured_at);
        std::fs::write(&path, png).map_err(|source| CaptureError::Save {
            path: path.clone(),
            source,
        })?;

        log::info!("Screenshot saved at {}", path.display());
        Ok(path)
    }
}
