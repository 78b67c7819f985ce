//! Pipeline throughput benchmark with synthetic frames and engines.
//!
//! Usage: pipeline_bench [frames] [workers] [max_latency_ms]
//! e.g.   pipeline_bench 500 4 20
//!
//! Each engine sleeps a pseudo-random latency per frame, so workers finish
//! out of order; the callback checks that frames still arrive in capture order.

use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use ndarray::Array4;

use posture_pipeline::config::LoggingConfig;
use posture_pipeline::filter::SmoothingSettings;
use posture_pipeline::framerate::{FramerateCatalog, FramerateSetting};
use posture_pipeline::landmark::{BodyPart, InferenceResults, Landmark};
use posture_pipeline::logging;
use posture_pipeline::posture::DisplacementJudge;
use posture_pipeline::stage::{FrameSource, InferenceCore};
use posture_pipeline::{Pipeline, PipelineOptions, ProcessedFrame, SequenceId};

struct SyntheticSource {
    next: u64,
}

impl FrameSource for SyntheticSource {
    type Frame = u64;

    fn next_frame(&mut self) -> Result<u64> {
        let frame = self.next;
        self.next += 1;
        Ok(frame)
    }
}

struct SyntheticEngine {
    max_latency_ms: u64,
}

/// Deterministic per-frame scatter in `0..max`.
fn jitter(frame: u64, max: u64) -> u64 {
    if max == 0 {
        return 0;
    }
    frame.wrapping_mul(0x9E37_79B9_7F4A_7C15).rotate_left(17) % max
}

impl InferenceCore for SyntheticEngine {
    fn run(&mut self, input: &Array4<f32>) -> Result<InferenceResults> {
        let frame = input[[0, 0, 0, 0]] as u64;
        thread::sleep(Duration::from_millis(jitter(frame, self.max_latency_ms)));

        let t = (frame % 100) as f32 / 100.0;
        let mut results = InferenceResults::default();
        for (i, landmark) in results.body_parts.iter_mut().enumerate() {
            let y = i as f32 / BodyPart::COUNT as f32;
            *landmark = Landmark::new(t, y, 0.9);
        }
        Ok(results)
    }
}

fn arg_or<T: std::str::FromStr>(args: &[String], index: usize, default: T) -> Result<T> {
    match args.get(index) {
        Some(s) => s
            .parse()
            .ok()
            .with_context(|| format!("invalid argument: {}", s)),
        None => Ok(default),
    }
}

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let frames: u64 = arg_or(&args, 1, 300)?;
    let workers: usize = arg_or(&args, 2, 4)?;
    let max_latency_ms: u64 = arg_or(&args, 3, 20)?;

    let _log_guard = logging::init(
        &LoggingConfig {
            level: "warn".to_string(),
            directory: None,
        },
        "pipeline_bench",
    )?;

    println!("=== pipeline bench ({}) ===", env!("GIT_VERSION"));
    println!("  frames: {}", frames);
    println!("  workers: {}", workers);
    println!("  max latency: {}ms", max_latency_ms);

    // no inter-frame delay: capture runs as fast as backpressure allows
    let catalog = FramerateCatalog::with_settings(
        vec![FramerateSetting::new(SmoothingSettings::passthrough(), 0)],
        0,
    )?;
    let options = PipelineOptions {
        catalog,
        ..PipelineOptions::default()
    };

    let (tx, rx) = mpsc::channel::<(SequenceId, u64)>();
    let engines = (0..workers)
        .map(|_| SyntheticEngine { max_latency_ms })
        .collect();

    let start = Instant::now();
    let mut pipeline = Pipeline::start(
        options,
        SyntheticSource { next: 0 },
        |frame: &u64| -> Result<Array4<f32>> { Ok(Array4::from_elem((1, 1, 1, 1), *frame as f32)) },
        engines,
        DisplacementJudge::default(),
        move |frame: ProcessedFrame<u64>| {
            let _ = tx.send((frame.seq, frame.frame));
        },
    )?;

    let mut out_of_order = 0u64;
    for expected in 0..frames {
        let (seq, frame) = rx
            .recv_timeout(Duration::from_secs(10))
            .context("pipeline stalled")?;
        if frame != expected || seq != expected as SequenceId {
            out_of_order += 1;
        }
    }
    let elapsed = start.elapsed();
    pipeline.stop();

    let fps = frames as f64 / elapsed.as_secs_f64();
    println!();
    println!("  elapsed: {:.2}s", elapsed.as_secs_f64());
    println!("  throughput: {:.1} frames/s", fps);
    println!("  out of order: {}", out_of_order);

    if out_of_order > 0 {
        bail!("{} frames arrived out of order", out_of_order);
    }
    Ok(())
}
