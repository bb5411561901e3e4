//! Gaze Monitor - Main Entry Point

use anyhow::Context;
use gaze::{GazeAnalyzer, GazeConfig, LandmarkDetector, ReplayDetector};
use monitor::{
    init_logging, run_pipelined, AnnotatedFrameWriter, Monitor, MonitorConfig, OutputStage,
    ReadFailurePolicy, StopSignal, TracingDisplay,
};
use tracing::{info, warn};
use violation_log::{DiskViolationLogger, InMemoryViolationLog, ViolationLogger};

type Detector = Box<dyn LandmarkDetector + Send>;

#[cfg(feature = "onnx")]
fn mesh_detector(config: &GazeConfig) -> anyhow::Result<Option<Detector>> {
    match &config.mesh_model_path {
        Some(model) => Ok(Some(Box::new(gaze::MeshDetector::new(
            model,
            config.mesh_confidence,
        )?))),
        None => Ok(None),
    }
}

#[cfg(not(feature = "onnx"))]
fn mesh_detector(config: &GazeConfig) -> anyhow::Result<Option<Detector>> {
    if config.mesh_model_path.is_some() {
        warn!("mesh_model_path is set but this build lacks the `onnx` feature");
    }
    Ok(None)
}

fn build_detector(config: &GazeConfig) -> anyhow::Result<Detector> {
    if let Some(detector) = mesh_detector(config)? {
        return Ok(detector);
    }

    match &config.landmarks_path {
        Some(path) => Ok(Box::new(ReplayDetector::from_file(path)?)),
        None => {
            warn!("No landmark source configured; every frame will report no face");
            Ok(Box::new(ReplayDetector::default()))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = MonitorConfig::load().context("loading configuration")?;
    init_logging(&config.log_level)?;

    info!("=== Gaze Monitor v{} ===", env!("CARGO_PKG_VERSION"));

    let stop = StopSignal::new();
    {
        let stop = stop.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Ctrl-C received, stopping");
                stop.stop();
            }
        });
    }

    let source = config.camera.open().context("opening frame source")?;
    let analyzer = GazeAnalyzer::new(&config.gaze, build_detector(&config.gaze)?)?;

    let logger: Box<dyn ViolationLogger + Send> = if config.logging.dry_run {
        Box::new(InMemoryViolationLog::new())
    } else {
        Box::new(DiskViolationLogger::new(
            &config.logging.dir,
            config.logging.filename_resolution,
        )?)
    };
    let annotated = config
        .annotated_output_dir
        .as_ref()
        .map(AnnotatedFrameWriter::new)
        .transpose()?;
    let output = OutputStage::new(logger, (TracingDisplay::new(), annotated));
    let policy = ReadFailurePolicy::new(config.max_consecutive_read_failures);

    let (result, summary) = if config.pipeline.is_enabled() {
        let (output, result) =
            run_pipelined(source, analyzer, output, &config.pipeline, policy, stop).await;
        (result, output.summary().clone())
    } else {
        let mut monitor = Monitor::new(source, analyzer, output, policy, stop);
        let result = tokio::task::block_in_place(|| monitor.run().map(|_| ()));
        (result, monitor.summary().clone())
    };

    info!("Summary: {}", serde_json::to_string(&summary)?);
    result?;
    Ok(())
}
