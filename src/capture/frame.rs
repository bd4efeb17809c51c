use std::fmt;

use serde::{Deserialize, Serialize};

/// Pixel formats produced by the acquisition core
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    ColorMjpeg,
    ColorYuyv,
    DepthRaw,
    DepthRgb,
    DepthGray24,
}

impl PixelFormat {
    /// Worst-case payload size in bytes for one frame at `width` x `height`
    pub fn capacity(self, width: u32, height: u32) -> usize {
        let (w, h) = (width as usize, height as usize);
        match self {
            // MJPEG payloads never exceed the uncompressed YUYV size
            PixelFormat::ColorMjpeg | PixelFormat::ColorYuyv => w * h * 2,
            PixelFormat::DepthRaw => w * h * 2,
            PixelFormat::DepthRgb | PixelFormat::DepthGray24 => w * h * 3,
        }
    }
}

/// Depth representation requested from the subsystem
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DepthTransferMode {
    /// Raw sensor depth bytes, delivered straight into the destination buffer
    NonTransfer,
    /// Depth converted to an RGB rendering
    Colorful,
    /// Depth converted to 24-bit gray
    Gray,
}

impl Default for DepthTransferMode {
    fn default() -> Self {
        DepthTransferMode::NonTransfer
    }
}

/// Reusable fixed-capacity image buffer.
///
/// Storage is allocated once at creation for the worst-case payload of the
/// (format, resolution) pair and never reallocated; each acquisition resets
/// `valid_size` and refills in place.
pub struct Frame {
    format: PixelFormat,
    width: u32,
    height: u32,
    storage: Vec<u8>,
    valid_size: usize,
    frame_id: u32,
}

impl Frame {
    pub fn new(format: PixelFormat, width: u32, height: u32) -> Self {
        Self {
            format,
            width,
            height,
            storage: vec![0u8; format.capacity(width, height)],
            valid_size: 0,
            frame_id: 0,
        }
    }

    /// Prepare the buffer for the next acquisition, keeping its storage
    pub fn reset(&mut self) {
        self.valid_size = 0;
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Serial number the subsystem assigned to the contained frame
    pub fn frame_id(&self) -> u32 {
        self.frame_id
    }

    /// Bytes populated by the most recent successful acquisition
    pub fn valid_size(&self) -> usize {
        self.valid_size
    }

    pub fn is_empty(&self) -> bool {
        self.valid_size == 0
    }

    /// Populated prefix of the buffer
    pub fn data(&self) -> &[u8] {
        &self.storage[..self.valid_size]
    }

    /// Full backing storage; raw depth frames span the whole buffer
    pub fn storage(&self) -> &[u8] {
        &self.storage
    }

    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    pub(crate) fn storage_mut(&mut self) -> &mut [u8] {
        &mut self.storage
    }

    pub(crate) fn set_valid_size(&mut self, size: usize) {
        debug_assert!(size <= self.storage.len());
        self.valid_size = size.min(self.storage.len());
    }

    pub(crate) fn set_frame_id(&mut self, id: u32) {
        self.frame_id = id;
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("format", &self.format)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("valid_size", &self.valid_size)
            .field("frame_id", &self.frame_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_formulas() {
        assert_eq!(PixelFormat::ColorYuyv.capacity(640, 480), 614_400);
        assert_eq!(PixelFormat::ColorMjpeg.capacity(640, 480), 614_400);
        assert_eq!(PixelFormat::DepthRaw.capacity(640, 480), 614_400);
        assert_eq!(PixelFormat::DepthRgb.capacity(640, 480), 921_600);
        assert_eq!(PixelFormat::DepthGray24.capacity(320, 240), 230_400);
    }

    #[test]
    fn reset_is_idempotent_and_keeps_storage() {
        let mut frame = Frame::new(PixelFormat::DepthRaw, 320, 240);
        frame.set_valid_size(1000);
        frame.set_frame_id(42);
        let ptr = frame.storage().as_ptr();
        let cap = frame.capacity();

        frame.reset();
        frame.reset();

        assert_eq!(frame.valid_size(), 0);
        assert!(frame.is_empty());
        assert_eq!(frame.capacity(), cap);
        assert_eq!(frame.storage().as_ptr(), ptr);
    }

    #[test]
    fn data_is_the_valid_prefix() {
        let mut frame = Frame::new(PixelFormat::ColorYuyv, 4, 2);
        frame.storage_mut()[..4].copy_from_slice(&[1, 2, 3, 4]);
        frame.set_valid_size(4);
        assert_eq!(frame.data(), &[1, 2, 3, 4]);
        assert!(frame.valid_size() <= frame.capacity());
    }
}
