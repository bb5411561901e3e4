//! Presentation of analyzed frames

use std::fs;
use std::path::{Path, PathBuf};

use camera_capture::VideoFrame;
use gaze::{AttentionState, FrameAnalysis};
use image::Rgb;
use imageproc::drawing::{draw_filled_circle_mut, draw_filled_rect_mut};
use imageproc::rect::Rect;
use tracing::{debug, info};

use crate::MonitorError;

const FOCUSED_COLOR: Rgb<u8> = Rgb([0, 200, 0]);
const WARNING_COLOR: Rgb<u8> = Rgb([220, 0, 0]);
const NO_FACE_COLOR: Rgb<u8> = Rgb([128, 128, 128]);
const LANDMARK_COLOR: Rgb<u8> = Rgb([255, 220, 0]);

/// Receives every frame with its analysis
pub trait DisplaySink {
    fn present(&mut self, frame: &VideoFrame, analysis: &FrameAnalysis)
        -> Result<(), MonitorError>;
}

impl<V: DisplaySink + ?Sized> DisplaySink for Box<V> {
    fn present(
        &mut self,
        frame: &VideoFrame,
        analysis: &FrameAnalysis,
    ) -> Result<(), MonitorError> {
        (**self).present(frame, analysis)
    }
}

impl<V: DisplaySink> DisplaySink for Option<V> {
    fn present(
        &mut self,
        frame: &VideoFrame,
        analysis: &FrameAnalysis,
    ) -> Result<(), MonitorError> {
        match self {
            Some(sink) => sink.present(frame, analysis),
            None => Ok(()),
        }
    }
}

impl<A: DisplaySink, B: DisplaySink> DisplaySink for (A, B) {
    fn present(
        &mut self,
        frame: &VideoFrame,
        analysis: &FrameAnalysis,
    ) -> Result<(), MonitorError> {
        let first = self.0.present(frame, analysis);
        self.1.present(frame, analysis)?;
        first
    }
}

/// Logs the overlay text whenever it changes
#[derive(Debug, Default)]
pub struct TracingDisplay {
    last: Option<String>,
}

impl TracingDisplay {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DisplaySink for TracingDisplay {
    fn present(
        &mut self,
        frame: &VideoFrame,
        analysis: &FrameAnalysis,
    ) -> Result<(), MonitorError> {
        let text = analysis.overlay_text();
        if text != self.last {
            match &text {
                Some(text) => info!("Frame {}: {}", frame.sequence, text),
                None => info!("Frame {}: no face", frame.sequence),
            }
            self.last = text;
        }
        Ok(())
    }
}

/// Writes each frame with landmark dots and a status bar as PNG
#[derive(Debug)]
pub struct AnnotatedFrameWriter {
    dir: PathBuf,
}

impl AnnotatedFrameWriter {
    pub fn new(dir: impl AsRef<Path>) -> Result<Self, MonitorError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|e| {
            MonitorError::Display(format!("{}: {}", dir.display(), e))
        })?;
        info!("Writing annotated frames to {}", dir.display());
        Ok(Self { dir })
    }

    pub fn frame_path(&self, sequence: u64) -> PathBuf {
        self.dir.join(format!("frame_{:06}.png", sequence))
    }
}

fn status_color(attention: Option<AttentionState>) -> Rgb<u8> {
    match attention {
        Some(AttentionState::Forward) => FOCUSED_COLOR,
        Some(_) => WARNING_COLOR,
        None => NO_FACE_COLOR,
    }
}

impl DisplaySink for AnnotatedFrameWriter {
    fn present(
        &mut self,
        frame: &VideoFrame,
        analysis: &FrameAnalysis,
    ) -> Result<(), MonitorError> {
        let mut canvas = frame.to_rgb_image().ok_or_else(|| {
            MonitorError::Display(format!("frame {} has a short buffer", frame.sequence))
        })?;

        let bar_height = (frame.height / 12).max(4);
        draw_filled_rect_mut(
            &mut canvas,
            Rect::at(0, 0).of_size(frame.width.max(1), bar_height),
            status_color(analysis.attention),
        );

        if let Some(landmarks) = &analysis.landmarks {
            let radius = (frame.width / 160).max(2) as i32;
            for point in landmarks.points() {
                if point.x.is_finite() && point.y.is_finite() {
                    let center = (point.x.round() as i32, point.y.round() as i32);
                    draw_filled_circle_mut(&mut canvas, center, radius, LANDMARK_COLOR);
                }
            }
        }

        let path = self.frame_path(frame.sequence);
        canvas
            .save(&path)
            .map_err(|e| MonitorError::Display(format!("{}: {}", path.display(), e)))?;
        debug!("Wrote {}", path.display());
        Ok(())
    }
}
