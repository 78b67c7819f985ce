//! Posture monitor: camera → pose model workers → smoothing → posture verdict.
//!
//! Console commands (type + Enter):
//!   `+` / `-`    faster / slower frame rate
//!   `c <value>`  confidence threshold (0.0-1.0)
//!   `s <value>`  pose change threshold
//!   `i`          use the last frame as the ideal posture
//!   `q`          quit

use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use opencv::core::Mat;
use parking_lot::Mutex;
use tracing::{error, info, warn};

use posture_pipeline::camera::OpenCvCamera;
use posture_pipeline::config::Config;
use posture_pipeline::landmark::ProcessedResults;
use posture_pipeline::logging;
use posture_pipeline::pose::{HeatmapDetector, ImagePreprocessor};
use posture_pipeline::posture::{DisplacementJudge, PostureStatus};
use posture_pipeline::{Pipeline, PipelineOptions, ProcessedFrame};

const DEFAULT_CONFIG_PATH: &str = "posture_monitor.toml";

enum Command {
    Faster,
    Slower,
    Confidence(f32),
    Sensitivity(f32),
    Ideal,
    Quit,
}

fn parse_command(line: &str) -> Option<Command> {
    let mut parts = line.split_whitespace();
    let cmd = parts.next()?;
    let arg = parts.next().and_then(|v| v.parse::<f32>().ok());
    match (cmd, arg) {
        ("+", _) => Some(Command::Faster),
        ("-", _) => Some(Command::Slower),
        ("c", Some(v)) => Some(Command::Confidence(v)),
        ("s", Some(v)) => Some(Command::Sensitivity(v)),
        ("i", _) => Some(Command::Ideal),
        ("q", _) => Some(Command::Quit),
        _ => None,
    }
}

fn spawn_console(tx: mpsc::Sender<Command>) -> Result<()> {
    std::thread::Builder::new()
        .name("console".to_string())
        .spawn(move || {
            let stdin = std::io::stdin();
            let mut line = String::new();
            loop {
                line.clear();
                match stdin.read_line(&mut line) {
                    Ok(0) | Err(_) => break,
                    Ok(_) => match parse_command(&line) {
                        Some(cmd) => {
                            if tx.send(cmd).is_err() {
                                break;
                            }
                        }
                        None => eprintln!("[input] unknown command: {}", line.trim()),
                    },
                }
            }
        })?;
    Ok(())
}

fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config = Config::load_or_default(&config_path)?;
    let _log_guard = logging::init(&config.logging, "posture_monitor")?;

    info!("Posture Monitor ({})", env!("GIT_VERSION"));
    info!("Config: {}", config_path);
    info!("Commands: + / - (framerate), c <v> (confidence), s <v> (sensitivity), i (ideal), q (quit)");

    let options = PipelineOptions::from_config(&config.pipeline)?;
    let camera = OpenCvCamera::from_config(&config.camera)?;
    let (width, height) = camera.resolution();
    info!("Camera {}: {}x{}", config.camera.index, width, height);
    let preprocessor = ImagePreprocessor::from_config(&config.model);
    let detectors = (0..config.pipeline.inference_workers)
        .map(|_| HeatmapDetector::from_config(&config.model))
        .collect::<Result<Vec<_>>>()
        .context("Failed to load pose model")?;
    info!("Pose model loaded x{}", detectors.len());

    let latest: Arc<Mutex<Option<ProcessedResults>>> = Arc::new(Mutex::new(None));
    let mut last_posture = PostureStatus::Undefined;
    let callback = {
        let latest = Arc::clone(&latest);
        move |frame: ProcessedFrame<Mat>| {
            if frame.posture != last_posture {
                info!(seq = frame.seq, "posture: {:?}", frame.posture);
                last_posture = frame.posture;
            }
            *latest.lock() = Some(frame.results);
        }
    };

    let mut pipeline = Pipeline::start(
        options,
        camera,
        preprocessor,
        detectors,
        DisplacementJudge::default(),
        callback,
    )?;

    let (tx, rx) = mpsc::channel();
    spawn_console(tx)?;

    loop {
        if let Some(fault) = pipeline.take_fault() {
            error!("pipeline fault: {}", fault);
            break;
        }
        let cmd = match rx.recv_timeout(Duration::from_millis(200)) {
            Ok(cmd) => cmd,
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        };
        match cmd {
            Command::Faster => info!("framerate: {:.2} Hz", pipeline.increase_framerate()),
            Command::Slower => info!("framerate: {:.2} Hz", pipeline.decrease_framerate()),
            Command::Confidence(v) => {
                if let Err(e) = pipeline.set_confidence_threshold(v) {
                    warn!("{}", e);
                }
            }
            Command::Sensitivity(v) => {
                if let Err(e) = pipeline.set_pose_change_threshold(v) {
                    warn!("{}", e);
                }
            }
            Command::Ideal => {
                let results = latest.lock().clone();
                match results {
                    Some(results) => pipeline.set_ideal_posture(&results),
                    None => warn!("no frame processed yet"),
                }
            }
            Command::Quit => break,
        }
    }

    pipeline.stop();
    Ok(())
}
