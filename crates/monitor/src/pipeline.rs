//! Pipelined monitor
//!
//! A blocking capture stage reads frames and runs the landmark detector in
//! stream order. Pose workers estimate and classify concurrently. A blocking
//! output stage puts results back in capture order before smoothing, logging
//! and display.

use std::collections::BTreeMap;
use std::sync::Arc;

use camera_capture::{CameraError, FrameSource, VideoFrame};
use gaze::{FrameAnalysis, GazeAnalyzer, LandmarkDetector, LandmarkSet, PoseStage};
use metrics::counter;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};
use violation_log::ViolationLogger;

use crate::config::PipelineConfig;
use crate::display::DisplaySink;
use crate::runner::{OutputStage, ReadFailurePolicy};
use crate::{MonitorError, StopSignal};

/// Restores ticket order for out-of-order completions.
///
/// Tickets must be dense and start at zero.
#[derive(Debug)]
pub struct Resequencer<T> {
    next: u64,
    pending: BTreeMap<u64, T>,
}

impl<T> Default for Resequencer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Resequencer<T> {
    pub fn new() -> Self {
        Self {
            next: 0,
            pending: BTreeMap::new(),
        }
    }

    pub fn push(&mut self, ticket: u64, item: T) {
        if ticket < self.next {
            warn!("Dropping stale ticket {} (next {})", ticket, self.next);
            return;
        }
        self.pending.insert(ticket, item);
    }

    /// Next item in order, if it has arrived
    pub fn pop_ready(&mut self) -> Option<T> {
        let item = self.pending.remove(&self.next)?;
        self.next += 1;
        Some(item)
    }

    /// Items waiting on an earlier ticket
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

/// Frame plus detector output, tagged with its capture order
struct Detected {
    ticket: u64,
    frame: VideoFrame,
    landmarks: Option<LandmarkSet>,
}

struct Processed {
    ticket: u64,
    frame: VideoFrame,
    analysis: FrameAnalysis,
}

#[derive(Debug, Default)]
struct CaptureReport {
    read_failures: u64,
    detector_failures: u64,
    fatal: Option<CameraError>,
}

fn capture<S, D>(
    mut source: S,
    mut detector: D,
    policy: ReadFailurePolicy,
    stop: StopSignal,
    tx: mpsc::Sender<Detected>,
) -> CaptureReport
where
    S: FrameSource,
    D: LandmarkDetector,
{
    let mut report = CaptureReport::default();
    let mut consecutive_failures = 0u32;
    let mut ticket = 0u64;

    while !stop.is_stopped() {
        let frame = match source.read_frame() {
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
                report.read_failures += 1;
                counter!("gaze_read_failures_total").increment(1);
                if policy.is_fatal(consecutive_failures) {
                    error!("{} ({} in a row), stopping", e, consecutive_failures);
                    report.fatal = Some(e);
                    break;
                }
                warn!("{}, skipping frame", e);
                continue;
            }
        };

        let landmarks = detector.detect(&frame).unwrap_or_else(|e| {
            warn!("Frame {}: {}", frame.sequence, e);
            report.detector_failures += 1;
            None
        });

        let unit = Detected {
            ticket,
            frame,
            landmarks,
        };
        if tx.blocking_send(unit).is_err() {
            debug!("Pose workers gone, stopping capture");
            break;
        }
        ticket += 1;
    }

    if stop.is_stopped() {
        info!("Stop requested");
    }
    report
}

async fn pose_worker(
    id: usize,
    stage: Arc<PoseStage>,
    rx: Arc<Mutex<mpsc::Receiver<Detected>>>,
    tx: mpsc::Sender<Processed>,
) {
    loop {
        let next = rx.lock().await.recv().await;
        let Some(unit) = next else { break };

        let analysis = stage.evaluate(
            unit.frame.sequence,
            unit.landmarks,
            unit.frame.width,
            unit.frame.height,
        );
        let done = Processed {
            ticket: unit.ticket,
            frame: unit.frame,
            analysis,
        };
        if tx.send(done).await.is_err() {
            break;
        }
    }
    debug!("Pose worker {} finished", id);
}

/// Run the monitor as a tokio pipeline.
///
/// The output stage runs on a blocking thread and is handed back with the run
/// result, counters included when the run ends in an error.
pub async fn run_pipelined<S, D, L, V>(
    source: S,
    analyzer: GazeAnalyzer<D>,
    mut output: OutputStage<L, V>,
    settings: &PipelineConfig,
    policy: ReadFailurePolicy,
    stop: StopSignal,
) -> (OutputStage<L, V>, Result<(), MonitorError>)
where
    S: FrameSource + Send + 'static,
    D: LandmarkDetector + Send + 'static,
    L: ViolationLogger + Send + 'static,
    V: DisplaySink + Send + 'static,
{
    let workers = settings.workers.max(1);
    let depth = settings.queue_depth.max(1);
    info!("Starting pipelined monitor: {} pose workers", workers);

    let (detector, stage, mut smoother) = analyzer.into_parts();
    let stage = Arc::new(stage);
    let estimations = stage.estimations();

    let (work_tx, work_rx) = mpsc::channel::<Detected>(depth);
    let (done_tx, mut done_rx) = mpsc::channel::<Processed>(depth);

    let capture_handle =
        tokio::task::spawn_blocking(move || capture(source, detector, policy, stop, work_tx));

    let work_rx = Arc::new(Mutex::new(work_rx));
    let worker_handles: Vec<_> = (0..workers)
        .map(|id| {
            tokio::spawn(pose_worker(
                id,
                Arc::clone(&stage),
                Arc::clone(&work_rx),
                done_tx.clone(),
            ))
        })
        .collect();
    drop(done_tx);

    let output_handle = tokio::task::spawn_blocking(move || {
        let mut resequencer = Resequencer::new();
        while let Some(done) = done_rx.blocking_recv() {
            resequencer.push(done.ticket, done);
            while let Some(mut ready) = resequencer.pop_ready() {
                if let Some(smoother) = smoother.as_mut() {
                    smoother.apply(&mut ready.analysis);
                }
                output.handle(&ready.frame, &ready.analysis);
            }
        }
        if resequencer.pending() > 0 {
            warn!("{} frames left unordered", resequencer.pending());
        }
        output
    });

    let mut failure = None;
    for handle in worker_handles {
        if let Err(e) = handle.await {
            failure.get_or_insert(MonitorError::Pipeline(format!("pose worker: {}", e)));
        }
    }
    let report = match capture_handle.await {
        Ok(report) => Some(report),
        Err(e) => {
            failure.get_or_insert(MonitorError::Pipeline(format!("capture stage: {}", e)));
            None
        }
    };
    let mut output = match output_handle.await {
        Ok(output) => output,
        Err(e) => std::panic::resume_unwind(e.into_panic()),
    };

    let summary = output.summary_mut();
    summary.pose_attempts += stage.estimations() - estimations;
    if let Some(report) = report {
        summary.read_failures += report.read_failures;
        summary.detector_failures += report.detector_failures;
        if let Some(e) = report.fatal {
            failure.get_or_insert(e.into());
        }
    }
    info!(
        "Pipelined monitor finished: {} frames, {} violations",
        summary.frames,
        summary.total_violations()
    );

    let result = match failure {
        Some(e) => Err(e),
        None => Ok(()),
    };
    (output, result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{landmarks_for, RecordingDisplay, HEIGHT, WIDTH};
    use camera_capture::ScriptedSource;
    use gaze::{AttentionState, GazeConfig, HeadPose, ReplayDetector};
    use std::collections::HashMap;
    use violation_log::InMemoryViolationLog;

    #[test]
    fn test_resequencer_orders_out_of_order_pushes() {
        let mut reseq = Resequencer::new();
        reseq.push(2, "c");
        assert!(reseq.pop_ready().is_none());
        reseq.push(0, "a");
        assert_eq!(reseq.pop_ready(), Some("a"));
        assert!(reseq.pop_ready().is_none());
        reseq.push(1, "b");
        assert_eq!(reseq.pop_ready(), Some("b"));
        assert_eq!(reseq.pop_ready(), Some("c"));
        assert_eq!(reseq.pending(), 0);
    }

    #[test]
    fn test_resequencer_drops_stale_ticket() {
        let mut reseq = Resequencer::new();
        reseq.push(0, 'x');
        assert_eq!(reseq.pop_ready(), Some('x'));
        reseq.push(0, 'y');
        assert_eq!(reseq.pending(), 0);
    }

    fn yaw_for(seq: u64) -> f64 {
        if seq % 3 == 0 {
            35.0
        } else {
            0.0
        }
    }

    fn scripted(n: u64) -> (ScriptedSource, GazeAnalyzer<ReplayDetector>) {
        let source =
            ScriptedSource::from_frames((0..n).map(|seq| VideoFrame::blank(WIDTH, HEIGHT, seq)));
        let detector = ReplayDetector::new(
            (0..n)
                .map(|seq| (seq, Some(landmarks_for(HeadPose::new(0.0, yaw_for(seq), 0.0)))))
                .collect::<HashMap<_, _>>(),
        );
        let analyzer = GazeAnalyzer::new(&GazeConfig::default(), detector).unwrap();
        (source, analyzer)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_pipeline_preserves_frame_order() {
        let (source, analyzer) = scripted(30);
        let output = OutputStage::new(InMemoryViolationLog::new(), RecordingDisplay::default());
        let settings = PipelineConfig {
            workers: 4,
            queue_depth: 2,
        };

        let (output, result) = run_pipelined(
            source,
            analyzer,
            output,
            &settings,
            ReadFailurePolicy::default(),
            StopSignal::new(),
        )
        .await;
        result.unwrap();

        assert_eq!(output.display().sequences, (0..30).collect::<Vec<u64>>());
        assert_eq!(output.summary().frames, 30);
        assert_eq!(output.summary().pose_attempts, 30);
        assert_eq!(output.summary().violations_for(AttentionState::Left), 10);

        let logged: Vec<u64> = output.logger().records().iter().map(|r| r.sequence).collect();
        assert_eq!(logged, (0..30).step_by(3).collect::<Vec<u64>>());
    }

    #[tokio::test]
    async fn test_pipeline_reports_fatal_read_failure() {
        let mut source = ScriptedSource::new();
        source
            .push_frame(VideoFrame::blank(WIDTH, HEIGHT, 0))
            .push_failure("sensor unplugged");
        let analyzer = GazeAnalyzer::new(&GazeConfig::default(), ReplayDetector::default()).unwrap();
        let output = OutputStage::new(InMemoryViolationLog::new(), RecordingDisplay::default());

        let (output, result) = run_pipelined(
            source,
            analyzer,
            output,
            &PipelineConfig {
                workers: 2,
                queue_depth: 4,
            },
            ReadFailurePolicy::default(),
            StopSignal::new(),
        )
        .await;

        assert!(matches!(result, Err(MonitorError::Camera(_))));
        assert_eq!(output.summary().frames, 1);
        assert_eq!(output.summary().read_failures, 1);
    }

    #[tokio::test]
    async fn test_pipeline_honors_stop_signal() {
        let (source, analyzer) = scripted(5);
        let output = OutputStage::new(InMemoryViolationLog::new(), RecordingDisplay::default());
        let stop = StopSignal::new();
        stop.stop();

        let (output, result) = run_pipelined(
            source,
            analyzer,
            output,
            &PipelineConfig::default(),
            ReadFailurePolicy::default(),
            stop,
        )
        .await;
        result.unwrap();
        assert_eq!(output.summary().frames, 0);
        assert_eq!(output.summary().pose_attempts, 0);
    }
}
