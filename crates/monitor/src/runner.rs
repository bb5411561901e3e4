//! Synchronous monitoring loop

use std::collections::HashMap;

use camera_capture::{FrameSource, VideoFrame};
use gaze::{AttentionState, FrameAnalysis, GazeAnalyzer, LandmarkDetector};
use metrics::counter;
use serde::Serialize;
use tracing::{debug, error, info, warn};
use violation_log::ViolationLogger;

use crate::display::DisplaySink;
use crate::{MonitorError, StopSignal};

/// What to do when a frame cannot be read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReadFailurePolicy {
    max_consecutive: u32,
}

impl ReadFailurePolicy {
    /// `0` stops on the first failure; `n > 0` skips failed frames and stops
    /// after `n` in a row
    pub fn new(max_consecutive: u32) -> Self {
        Self { max_consecutive }
    }

    pub fn is_fatal(&self, consecutive: u32) -> bool {
        consecutive >= self.max_consecutive.max(1)
    }
}

/// Per-run counters
#[derive(Debug, Clone, Default, Serialize)]
pub struct MonitorSummary {
    pub frames: u64,
    pub faces: u64,
    /// Head pose estimator runs
    pub pose_attempts: u64,
    pub poses: u64,
    pub pose_failures: u64,
    pub violations: HashMap<AttentionState, u64>,
    pub log_failures: u64,
    pub read_failures: u64,
    pub detector_failures: u64,
}

impl MonitorSummary {
    pub fn violations_for(&self, state: AttentionState) -> u64 {
        self.violations.get(&state).copied().unwrap_or(0)
    }

    pub fn total_violations(&self) -> u64 {
        self.violations.values().sum()
    }
}

/// Everything after analysis: counting, violation logging, display
pub struct OutputStage<L, V> {
    logger: L,
    display: V,
    summary: MonitorSummary,
}

impl<L: ViolationLogger, V: DisplaySink> OutputStage<L, V> {
    pub fn new(logger: L, display: V) -> Self {
        Self {
            logger,
            display,
            summary: MonitorSummary::default(),
        }
    }

    pub fn summary(&self) -> &MonitorSummary {
        &self.summary
    }

    pub(crate) fn summary_mut(&mut self) -> &mut MonitorSummary {
        &mut self.summary
    }

    pub fn logger(&self) -> &L {
        &self.logger
    }

    pub fn display(&self) -> &V {
        &self.display
    }

    /// Handle one analyzed frame. Logger and display failures are reported
    /// and swallowed.
    pub fn handle(&mut self, frame: &VideoFrame, analysis: &FrameAnalysis) {
        self.summary.frames += 1;
        counter!("gaze_frames_total").increment(1);

        if analysis.face_detected() {
            self.summary.faces += 1;
        }
        if analysis.pose_failed() {
            self.summary.pose_failures += 1;
            counter!("gaze_pose_failures_total").increment(1);
        }

        if let Some(state) = analysis.attention {
            self.summary.poses += 1;
            if state.is_violation() {
                *self.summary.violations.entry(state).or_insert(0) += 1;
                counter!("gaze_violations_total", "state" => state.label()).increment(1);
                info!("Frame {}: WARNING: {}", frame.sequence, state);

                match self.logger.log(frame, state.label()) {
                    Ok(record) => debug!("Logged violation {:?}", record.path),
                    Err(e) => {
                        self.summary.log_failures += 1;
                        counter!("gaze_log_failures_total").increment(1);
                        warn!("Frame {}: {}", frame.sequence, e);
                    }
                }
            }
        }

        if let Err(e) = self.display.present(frame, analysis) {
            warn!("Frame {}: {}", frame.sequence, e);
        }
    }

    pub fn into_parts(self) -> (L, V, MonitorSummary) {
        (self.logger, self.display, self.summary)
    }
}

/// Synchronous attention monitor
pub struct Monitor<S, D, L, V> {
    source: S,
    analyzer: GazeAnalyzer<D>,
    output: OutputStage<L, V>,
    policy: ReadFailurePolicy,
    stop: StopSignal,
}

impl<S, D, L, V> Monitor<S, D, L, V>
where
    S: FrameSource,
    D: LandmarkDetector,
    L: ViolationLogger,
    V: DisplaySink,
{
    pub fn new(
        source: S,
        analyzer: GazeAnalyzer<D>,
        output: OutputStage<L, V>,
        policy: ReadFailurePolicy,
        stop: StopSignal,
    ) -> Self {
        Self {
            source,
            analyzer,
            output,
            policy,
            stop,
        }
    }

    /// Run until stopped, end of stream or a fatal read failure.
    ///
    /// The summary stays available through [`summary`](Self::summary) when
    /// the run ends in an error.
    pub fn run(&mut self) -> Result<MonitorSummary, MonitorError> {
        info!("Starting monitor loop");
        let mut consecutive_failures = 0u32;

        loop {
            if self.stop.is_stopped() {
                info!("Stop requested");
                break;
            }

            let frame = match self.source.read_frame() {
                Ok(Some(frame)) => {
                    consecutive_failures = 0;
                    frame
                }
                Ok(None) => {
                    info!("End of stream");
                    break;
                }
                Err(e) => {
                    consecutive_failures += 1;
                    self.output.summary_mut().read_failures += 1;
                    counter!("gaze_read_failures_total").increment(1);
                    if self.policy.is_fatal(consecutive_failures) {
                        error!("{} ({} in a row), stopping", e, consecutive_failures);
                        return Err(e.into());
                    }
                    warn!("{}, skipping frame", e);
                    continue;
                }
            };

            let estimations = self.analyzer.stage().estimations();
            let analysis = match self.analyzer.analyze(&frame) {
                Ok(analysis) => analysis,
                Err(e) => {
                    warn!("Frame {}: {}", frame.sequence, e);
                    self.output.summary_mut().detector_failures += 1;
                    FrameAnalysis::no_face(frame.sequence)
                }
            };
            self.output.summary_mut().pose_attempts +=
                self.analyzer.stage().estimations() - estimations;
            self.output.handle(&frame, &analysis);
        }

        let summary = self.output.summary().clone();
        info!(
            "Monitor finished: {} frames, {} violations",
            summary.frames,
            summary.total_violations()
        );
        Ok(summary)
    }

    pub fn summary(&self) -> &MonitorSummary {
        self.output.summary()
    }

    pub fn output(&self) -> &OutputStage<L, V> {
        &self.output
    }
}
