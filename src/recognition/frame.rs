//! Frame data structure for captured camera content

use chrono::{DateTime, Utc};

/// A captured frame handed to the recognition pipeline
#[derive(Debug, Clone)]
pub struct Frame {
    /// Raw RGBA pixel data
    pub data: Vec<u8>,
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Timestamp when the frame was captured
    pub captured_at: DateTime<Utc>,
}

impl Frame {
    /// Create a new frame timestamped now
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            data,
            width,
            height,
            captured_at: Utc::now(),
        }
    }

    /// Load a frame from an image file
    pub fn from_file(path: &std::path::Path) -> anyhow::Result<Self> {
        let img = image::open(path)?.to_rgba8();
        let (width, height) = img.dimensions();
        Ok(Self::new(img.into_raw(), width, height))
    }

    /// Get frame dimensions as (width, height)
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}
