//! Frame sources

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::time::Instant;

use tracing::{debug, info};

use crate::{CameraError, VideoFrame};

/// File extensions accepted by [`ImageSequenceSource`]
const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp"];

/// Sequential frame supplier
pub trait FrameSource {
    /// Read the next frame. `Ok(None)` marks the end of the stream.
    fn read_frame(&mut self) -> Result<Option<VideoFrame>, CameraError>;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn read_frame(&mut self) -> Result<Option<VideoFrame>, CameraError> {
        (**self).read_frame()
    }
}

/// Replays a directory of still images as a frame stream
pub struct ImageSequenceSource {
    paths: Vec<PathBuf>,
    cursor: usize,
    limit: Option<u64>,
    opened_at: Instant,
}

impl ImageSequenceSource {
    /// Open a directory of frames, sorted by file name
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, CameraError> {
        let dir = dir.as_ref();
        let entries = std::fs::read_dir(dir)
            .map_err(|e| CameraError::Unavailable(format!("{}: {}", dir.display(), e)))?;

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file() && has_image_extension(path))
            .collect();
        paths.sort();

        if paths.is_empty() {
            return Err(CameraError::Unavailable(format!(
                "no frames in {}",
                dir.display()
            )));
        }

        info!("Opened image sequence {} ({} frames)", dir.display(), paths.len());

        Ok(Self {
            paths,
            cursor: 0,
            limit: None,
            opened_at: Instant::now(),
        })
    }

    /// Stop after `limit` frames
    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Number of frames in the sequence
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

impl FrameSource for ImageSequenceSource {
    fn read_frame(&mut self) -> Result<Option<VideoFrame>, CameraError> {
        if self.limit.is_some_and(|limit| self.cursor as u64 >= limit) {
            return Ok(None);
        }
        let Some(path) = self.paths.get(self.cursor) else {
            return Ok(None);
        };

        let sequence = self.cursor as u64;
        self.cursor += 1;

        let image = image::open(path)
            .map_err(|e| CameraError::ReadFailed(format!("{}: {}", path.display(), e)))?
            .to_rgb8();
        let timestamp_ns = self.opened_at.elapsed().as_nanos() as u64;

        debug!("Read frame {} from {}", sequence, path.display());
        Ok(Some(VideoFrame::from_rgb_image(image, timestamp_ns, sequence)))
    }
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// In-memory source replaying a fixed script of frames and failures
#[derive(Debug, Default)]
pub struct ScriptedSource {
    script: VecDeque<Result<VideoFrame, CameraError>>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script of frames only
    pub fn from_frames(frames: impl IntoIterator<Item = VideoFrame>) -> Self {
        Self {
            script: frames.into_iter().map(Ok).collect(),
        }
    }

    /// Queue a frame
    pub fn push_frame(&mut self, frame: VideoFrame) -> &mut Self {
        self.script.push_back(Ok(frame));
        self
    }

    /// Queue a read failure
    pub fn push_failure(&mut self, reason: &str) -> &mut Self {
        self.script
            .push_back(Err(CameraError::ReadFailed(reason.to_string())));
        self
    }

    /// Remaining scripted entries
    pub fn remaining(&self) -> usize {
        self.script.len()
    }
}

impl FrameSource for ScriptedSource {
    fn read_frame(&mut self) -> Result<Option<VideoFrame>, CameraError> {
        match self.script.pop_front() {
            Some(entry) => entry.map(Some),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use tempfile::TempDir;

    fn write_frame(dir: &Path, name: &str, shade: u8) {
        let mut image = RgbImage::new(8, 6);
        for pixel in image.pixels_mut() {
            *pixel = Rgb([shade, shade, shade]);
        }
        image.save(dir.join(name)).unwrap();
    }

    #[test]
    fn test_image_sequence_sorted_by_name() {
        let dir = TempDir::new().unwrap();
        write_frame(dir.path(), "frame_002.png", 200);
        write_frame(dir.path(), "frame_001.png", 100);
        std::fs::write(dir.path().join("notes.txt"), b"not a frame").unwrap();

        let mut source = ImageSequenceSource::open(dir.path()).unwrap();
        assert_eq!(source.len(), 2);

        let first = source.read_frame().unwrap().unwrap();
        assert_eq!(first.sequence, 0);
        assert_eq!(first.dimensions(), (8, 6));
        assert_eq!(first.get_pixel(0, 0), Some([100, 100, 100]));

        let second = source.read_frame().unwrap().unwrap();
        assert_eq!(second.sequence, 1);
        assert_eq!(second.get_pixel(0, 0), Some([200, 200, 200]));

        assert!(source.read_frame().unwrap().is_none());
    }

    #[test]
    fn test_missing_or_empty_dir_is_unavailable() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            ImageSequenceSource::open(dir.path()),
            Err(CameraError::Unavailable(_))
        ));
        assert!(matches!(
            ImageSequenceSource::open(dir.path().join("missing")),
            Err(CameraError::Unavailable(_))
        ));
    }

    #[test]
    fn test_corrupt_frame_fails_then_continues() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.png"), b"garbage").unwrap();
        write_frame(dir.path(), "b.png", 50);

        let mut source = ImageSequenceSource::open(dir.path()).unwrap();
        assert!(matches!(source.read_frame(), Err(CameraError::ReadFailed(_))));

        let frame = source.read_frame().unwrap().unwrap();
        assert_eq!(frame.sequence, 1);
    }

    #[test]
    fn test_limit() {
        let dir = TempDir::new().unwrap();
        for i in 0..3 {
            write_frame(dir.path(), &format!("{i}.png"), 0);
        }

        let mut source = ImageSequenceSource::open(dir.path()).unwrap().with_limit(2);
        assert!(source.read_frame().unwrap().is_some());
        assert!(source.read_frame().unwrap().is_some());
        assert!(source.read_frame().unwrap().is_none());
    }

    #[test]
    fn test_scripted_source() {
        let mut source = ScriptedSource::new();
        source
            .push_frame(VideoFrame::blank(2, 2, 0))
            .push_failure("usb hiccup")
            .push_frame(VideoFrame::blank(2, 2, 1));
        assert_eq!(source.remaining(), 3);

        assert_eq!(source.read_frame().unwrap().unwrap().sequence, 0);
        assert!(matches!(source.read_frame(), Err(CameraError::ReadFailed(_))));
        assert_eq!(source.read_frame().unwrap().unwrap().sequence, 1);
        assert!(source.read_frame().unwrap().is_none());
    }
}
