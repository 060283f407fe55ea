use image::{imageops::FilterType, DynamicImage, ImageFormat, RgbaImage};
use std::io::Cursor;

use super::{CaptureError, ScreenSource};

/// Captures the first monitor xcap reports.
pub struct PrimaryMonitor;

impl ScreenSource for PrimaryMonitor {
    fn grab(&self) -> Result<RgbaImage, CaptureError> {
        let monitors = xcap::Monitor::all()
            .map_err(|e| CaptureError::Screen(format!("Failed to list monitors: {}", e)))?;

        let monitor = monitors
            .first()
            .ok_or_else(|| CaptureError::Screen("No monitors found".to_string()))?;

        monitor
            .capture_image()
            .map_err(|e| CaptureError::Screen(e.to_string()))
    }
}

pub fn encode_png(image: &RgbaImage) -> Result<Vec<u8>, CaptureError> {
    let mut buffer = Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(image.clone())
        .write_to(&mut buffer, ImageFormat::Png)
        .map_err(|e| CaptureError::Encode(e.to_string()))?;
    Ok(buffer.into_inner())
}

/// PNG for upload, scaled down to `max_width` keeping the aspect ratio.
pub fn encode_upload_png(image: &RgbaImage, max_width: u32) -> Result<Vec<u8>, CaptureError> {
    let (width, height) = image.dimensions();
    if max_width == 0 || width <= max_width {
        return encode_png(image);
    }

    let scale = max_width as f64 / width as f64;
    let new_height = ((height as f64 * scale) as u32).max(1);
    let resized = image::imageops::resize(image, max_width, new_height, FilterType::Triangle);
    encode_png(&resized)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_image_keeps_dimensions() {
        let img = RgbaImage::new(40, 20);
        let png = encode_upload_png(&img, 1280).unwrap();
        let loaded = image::load_from_memory(&png).unwrap();
        assert_eq!((loaded.width(), loaded.height()), (40, 20));
    }

    #[test]
    fn wide_image_is_downscaled() {
        let img = RgbaImage::new(400, 100);
        let png = encode_upload_png(&img, 200).unwrap();
        let loaded = image::load_from_memory(&png).unwrap();
        assert_eq!((loaded.width(), loaded.height()), (200, 50));
    }

    #[test]
    #[ignore = "requires a display and screen recording permission"]
    fn primary_monitor_captures_something() {
        let img = PrimaryMonitor.grab().unwrap();
        assert!(img.width() > 0 && img.height() > 0);
    }
}
