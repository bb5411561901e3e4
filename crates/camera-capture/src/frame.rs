//! Video frame types

use image::RgbImage;

use crate::CameraError;

/// Decoded RGB video frame
#[derive(Debug, Clone)]
pub struct VideoFrame {
    /// RGB pixel data (width * height * 3)
    pub data: Vec<u8>,
    /// Frame width
    pub width: u32,
    /// Frame height
    pub height: u32,
    /// Capture timestamp (nanoseconds since the source was opened)
    pub timestamp_ns: u64,
    /// Frame sequence number, monotonic per source
    pub sequence: u64,
}

impl VideoFrame {
    /// Create a new video frame from raw RGB data
    pub fn new(data: Vec<u8>, width: u32, height: u32, timestamp_ns: u64, sequence: u64) -> Self {
        Self {
            data,
            width,
            height,
            timestamp_ns,
            sequence,
        }
    }

    /// Create a frame, checking the buffer length against the dimensions
    pub fn try_new(
        data: Vec<u8>,
        width: u32,
        height: u32,
        timestamp_ns: u64,
        sequence: u64,
    ) -> Result<Self, CameraError> {
        let expected = width as usize * height as usize * 3;
        if width == 0 || height == 0 || data.len() != expected {
            return Err(CameraError::InvalidFrame(format!(
                "{}x{} frame needs {} bytes, got {}",
                width,
                height,
                expected,
                data.len()
            )));
        }
        Ok(Self::new(data, width, height, timestamp_ns, sequence))
    }

    /// Black frame of the given size
    pub fn blank(width: u32, height: u32, sequence: u64) -> Self {
        Self::new(
            vec![0; width as usize * height as usize * 3],
            width,
            height,
            0,
            sequence,
        )
    }

    /// Wrap a decoded RGB image
    pub fn from_rgb_image(image: RgbImage, timestamp_ns: u64, sequence: u64) -> Self {
        let (width, height) = image.dimensions();
        Self::new(image.into_raw(), width, height, timestamp_ns, sequence)
    }

    /// Copy the pixels into an `image` buffer, `None` if the buffer is short
    pub fn to_rgb_image(&self) -> Option<RgbImage> {
        RgbImage::from_raw(self.width, self.height, self.data.clone())
    }

    /// Get pixel at (x, y)
    pub fn get_pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = (y as usize * self.width as usize + x as usize) * 3;
        let px = self.data.get(idx..idx + 3)?;
        Some([px[0], px[1], px[2]])
    }

    /// Frame size as (width, height)
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_try_new_rejects_short_buffer() {
        assert!(VideoFrame::try_new(vec![0; 10], 4, 4, 0, 0).is_err());
        assert!(VideoFrame::try_new(vec![], 0, 0, 0, 0).is_err());
        assert!(VideoFrame::try_new(vec![0; 48], 4, 4, 0, 0).is_ok());
    }

    #[test]
    fn test_get_pixel() {
        let mut frame = VideoFrame::blank(3, 2, 7);
        // row 1, column 2
        let idx = (3 + 2) * 3;
        frame.data[idx..idx + 3].copy_from_slice(&[10, 20, 30]);

        assert_eq!(frame.get_pixel(2, 1), Some([10, 20, 30]));
        assert_eq!(frame.get_pixel(0, 0), Some([0, 0, 0]));
        assert_eq!(frame.get_pixel(3, 0), None);
        assert_eq!(frame.get_pixel(0, 2), None);
    }

    #[test]
    fn test_rgb_image_conversion() {
        let mut image = RgbImage::new(5, 4);
        image.put_pixel(4, 3, image::Rgb([1, 2, 3]));

        let frame = VideoFrame::from_rgb_image(image.clone(), 99, 3);
        assert_eq!(frame.dimensions(), (5, 4));
        assert_eq!(frame.sequence, 3);
        assert_eq!(frame.get_pixel(4, 3), Some([1, 2, 3]));
        assert_eq!(frame.to_rgb_image(), Some(image));
    }
}
