//! キャプチャ → 推論ワーカー群 → 後処理 のストリーミングパイプライン
//!
//! ```text
//! capture ──▶ OrderedBuffer ──▶ inference-0..N ──▶ OrderedBuffer ──▶ postprocess ──▶ callback
//! ```
//!
//! Sequence numbers are assigned once at capture time. Both buffers only
//! accept the next number, so frames leave the worker pool in the order they
//! were captured no matter which worker finishes first.

pub mod postprocess;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use ndarray::Array4;
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::buffer::{OrderedBuffer, SequenceId, Sequenced, DEFAULT_POLL_INTERVAL};
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::filter::LandmarkSmoother;
use crate::framerate::FramerateCatalog;
use crate::landmark::{InferenceResults, ProcessedResults};
use crate::posture::{PostureJudge, PostureStatus, DEFAULT_POSE_CHANGE_THRESHOLD};
use crate::stage::{FrameSource, InferenceCore, Preprocessor};

pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.1;
pub const DEFAULT_BUFFER_CAPACITY: usize = 8;

/// キャプチャ直後のフレーム
pub struct CapturedFrame<F> {
    pub seq: SequenceId,
    pub frame: F,
    pub input: Array4<f32>,
}

/// 推論済みフレーム。推論に失敗した場合 `results` は `None`
pub struct InferredFrame<F> {
    pub seq: SequenceId,
    pub frame: F,
    pub results: Option<InferenceResults>,
}

/// コールバックに渡される最終結果
#[derive(Debug, Clone)]
pub struct ProcessedFrame<F> {
    pub seq: SequenceId,
    pub frame: F,
    pub results: ProcessedResults,
    pub posture: PostureStatus,
}

impl<F> Sequenced for CapturedFrame<F> {
    fn sequence_id(&self) -> SequenceId {
        self.seq
    }
}

impl<F> Sequenced for InferredFrame<F> {
    fn sequence_id(&self) -> SequenceId {
        self.seq
    }
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub confidence_threshold: f32,
    pub pose_change_threshold: f32,
    pub buffer_capacity: usize,
    pub poll_interval: Duration,
    pub catalog: FramerateCatalog,
}

impl PipelineOptions {
    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        config.validate()?;
        let mut catalog = FramerateCatalog::new();
        catalog.select(config.framerate_index)?;
        Ok(Self {
            confidence_threshold: config.confidence_threshold,
            pose_change_threshold: config.pose_change_threshold,
            buffer_capacity: config.buffer_capacity,
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            catalog,
        })
    }
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            pose_change_threshold: DEFAULT_POSE_CHANGE_THRESHOLD,
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            poll_interval: DEFAULT_POLL_INTERVAL,
            catalog: FramerateCatalog::new(),
        }
    }
}

/// Everything a frame-rate or threshold change touches. The delay and the
/// smoothing coefficients are published together under this one lock;
/// `smoothing_version` tells the post-processing thread to rebuild its
/// smoother.
struct Settings {
    confidence_threshold: f32,
    catalog: FramerateCatalog,
    smoothing_version: u64,
}

struct Shared {
    running: Arc<AtomicBool>,
    settings: Mutex<Settings>,
    judge: Mutex<Box<dyn PostureJudge>>,
    fault: Mutex<Option<PipelineError>>,
    poll_interval: Duration,
}

impl Shared {
    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn record_fault(&self, fault: PipelineError) {
        let mut slot = self.fault.lock();
        if slot.is_none() {
            *slot = Some(fault);
        }
    }

    /// Sleeps the current frame interval in poll-sized slices.
    fn sleep_frame_interval(&self) {
        let delay = Duration::from_millis(self.settings.lock().catalog.current().frame_delay_ms);
        let deadline = Instant::now() + delay;
        while self.is_running() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep((deadline - now).min(self.poll_interval));
        }
    }

    fn step_framerate(&self, step: fn(&mut FramerateCatalog) -> bool) -> f32 {
        let mut settings = self.settings.lock();
        if step(&mut settings.catalog) {
            settings.smoothing_version = settings.smoothing_version.wrapping_add(1);
            info!(
                index = settings.catalog.index(),
                frame_delay_ms = settings.catalog.current().frame_delay_ms,
                "framerate changed"
            );
        }
        settings.catalog.framerate()
    }
}

/// 実行中のパイプライン。`stop` または drop で全スレッドを停止・合流する
pub struct Pipeline<F: Send + 'static> {
    shared: Arc<Shared>,
    captured: Arc<OrderedBuffer<CapturedFrame<F>>>,
    inferred: Arc<OrderedBuffer<InferredFrame<F>>>,
    handles: Vec<JoinHandle<()>>,
}

impl<F: Send + 'static> Pipeline<F> {
    /// Spawns the capture thread, one inference thread per engine and the
    /// post-processing thread. `callback` runs on the post-processing thread
    /// once per frame, in capture order.
    pub fn start<S, P, E, J, C>(
        options: PipelineOptions,
        source: S,
        preprocessor: P,
        engines: Vec<E>,
        judge: J,
        callback: C,
    ) -> Result<Self>
    where
        S: FrameSource<Frame = F>,
        P: Preprocessor<F>,
        E: InferenceCore,
        J: PostureJudge,
        C: FnMut(ProcessedFrame<F>) + Send + 'static,
    {
        if engines.is_empty() {
            return Err(PipelineError::NoWorkers);
        }
        validate_confidence_threshold(options.confidence_threshold)?;
        validate_pose_change_threshold(options.pose_change_threshold)?;
        if options.poll_interval.is_zero() {
            return Err(PipelineError::invalid(
                "poll_interval",
                format!("{:?}", options.poll_interval),
            ));
        }

        let running = Arc::new(AtomicBool::new(true));
        let captured = Arc::new(
            OrderedBuffer::new(options.buffer_capacity, Arc::clone(&running))?
                .with_poll_interval(options.poll_interval),
        );
        let inferred = Arc::new(
            OrderedBuffer::new(options.buffer_capacity, Arc::clone(&running))?
                .with_poll_interval(options.poll_interval),
        );

        let mut judge: Box<dyn PostureJudge> = Box::new(judge);
        judge.set_pose_change_threshold(options.pose_change_threshold);
        let shared = Arc::new(Shared {
            running,
            settings: Mutex::new(Settings {
                confidence_threshold: options.confidence_threshold,
                catalog: options.catalog,
                smoothing_version: 0,
            }),
            judge: Mutex::new(judge),
            fault: Mutex::new(None),
            poll_interval: options.poll_interval,
        });

        // Dropping a partially started pipeline stops what was spawned.
        let mut pipeline = Self {
            shared,
            captured,
            inferred,
            handles: Vec::new(),
        };

        let workers = engines.len();
        pipeline.spawn("postprocess".to_string(), {
            let shared = Arc::clone(&pipeline.shared);
            let input = Arc::clone(&pipeline.inferred);
            move || postprocess_loop(&shared, &input, callback)
        })?;
        for (i, engine) in engines.into_iter().enumerate() {
            pipeline.spawn(format!("inference-{}", i), {
                let input = Arc::clone(&pipeline.captured);
                let output = Arc::clone(&pipeline.inferred);
                move || inference_loop(i, engine, &input, &output)
            })?;
        }
        pipeline.spawn("capture".to_string(), {
            let shared = Arc::clone(&pipeline.shared);
            let output = Arc::clone(&pipeline.captured);
            move || capture_loop(&shared, source, preprocessor, &output)
        })?;

        info!(
            workers,
            buffer_capacity = options.buffer_capacity,
            framerate = pipeline.framerate(),
            "pipeline started"
        );
        Ok(pipeline)
    }

    fn spawn<T>(&mut self, name: String, body: T) -> Result<()>
    where
        T: FnOnce() + Send + 'static,
    {
        let handle = thread::Builder::new().name(name).spawn(body)?;
        self.handles.push(handle);
        Ok(())
    }

    /// 信頼度閾値を設定。[0, 1] 外は拒否し、現在値を維持する
    pub fn set_confidence_threshold(&self, threshold: f32) -> Result<()> {
        validate_confidence_threshold(threshold)?;
        self.shared.settings.lock().confidence_threshold = threshold;
        info!(threshold, "confidence threshold changed");
        Ok(())
    }

    pub fn confidence_threshold(&self) -> f32 {
        self.shared.settings.lock().confidence_threshold
    }

    /// Steps to the next faster preset. Returns the effective rate in Hz.
    pub fn increase_framerate(&self) -> f32 {
        self.shared.step_framerate(FramerateCatalog::step_faster)
    }

    /// Steps to the next slower preset. Returns the effective rate in Hz.
    pub fn decrease_framerate(&self) -> f32 {
        self.shared.step_framerate(FramerateCatalog::step_slower)
    }

    pub fn framerate(&self) -> f32 {
        self.shared.settings.lock().catalog.framerate()
    }

    pub fn set_ideal_posture(&self, ideal: &ProcessedResults) {
        self.shared.judge.lock().set_ideal_posture(ideal);
        info!(landmarks = ideal.trustworthy_count(), "ideal posture set");
    }

    /// 負値・非有限値は拒否
    pub fn set_pose_change_threshold(&self, threshold: f32) -> Result<()> {
        validate_pose_change_threshold(threshold)?;
        self.shared.judge.lock().set_pose_change_threshold(threshold);
        info!(threshold, "pose change threshold changed");
        Ok(())
    }

    pub fn pose_change_threshold(&self) -> f32 {
        self.shared.judge.lock().pose_change_threshold()
    }

    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    /// The condition that ended a stage early, if any. Cleared on read.
    pub fn take_fault(&self) -> Option<PipelineError> {
        self.shared.fault.lock().take()
    }

    /// Signals every stage to stop and waits for all threads to return.
    pub fn stop(&mut self) {
        if self.handles.is_empty() {
            return;
        }
        self.captured.shutdown();
        self.inferred.shutdown();
        for handle in self.handles.drain(..) {
            let name = handle.thread().name().unwrap_or("stage").to_string();
            if handle.join().is_err() {
                error!(thread = %name, "stage thread panicked");
            }
        }
        info!("pipeline stopped");
    }
}

impl<F: Send + 'static> Drop for Pipeline<F> {
    fn drop(&mut self) {
        self.stop();
    }
}

fn validate_confidence_threshold(threshold: f32) -> Result<()> {
    if !(0.0..=1.0).contains(&threshold) {
        return Err(PipelineError::invalid("confidence_threshold", threshold));
    }
    Ok(())
}

fn validate_pose_change_threshold(threshold: f32) -> Result<()> {
    if !threshold.is_finite() || threshold < 0.0 {
        return Err(PipelineError::invalid("pose_change_threshold", threshold));
    }
    Ok(())
}

fn capture_loop<S, P>(
    shared: &Shared,
    mut source: S,
    mut preprocessor: P,
    output: &OrderedBuffer<CapturedFrame<S::Frame>>,
) where
    S: FrameSource,
    P: Preprocessor<S::Frame>,
{
    info!("capture started");
    let mut seq: SequenceId = 0;
    while shared.is_running() {
        let frame = match source.next_frame() {
            Ok(frame) => frame,
            Err(e) => {
                error!("capture failed, stopping capture: {:#}", e);
                shared.record_fault(PipelineError::Capture(format!("{:#}", e)));
                break;
            }
        };

        match preprocessor.run(&frame) {
            Ok(input) => {
                if output.push(CapturedFrame { seq, frame, input }).is_err() {
                    break;
                }
                debug!(seq, "frame captured");
                seq = seq.wrapping_add(1);
            }
            // dropped before numbering: no gap downstream
            Err(e) => warn!("preprocessing failed, frame dropped: {:#}", e),
        }

        shared.sleep_frame_interval();
    }
    info!("capture stopped");
}

fn inference_loop<F, E: InferenceCore>(
    worker: usize,
    mut engine: E,
    input: &OrderedBuffer<CapturedFrame<F>>,
    output: &OrderedBuffer<InferredFrame<F>>,
) {
    info!(worker, "inference worker started");
    while let Some(captured) = input.pop() {
        // frames still queued at shutdown are discarded
        if !input.is_running() {
            break;
        }
        let seq = captured.seq;
        let results = match engine.run(&captured.input) {
            Ok(results) => Some(results),
            Err(e) => {
                warn!(worker, seq, "inference failed: {:#}", e);
                None
            }
        };
        let inferred = InferredFrame {
            seq,
            frame: captured.frame,
            results,
        };
        if output.push(inferred).is_err() {
            break;
        }
    }
    info!(worker, "inference worker stopped");
}

fn postprocess_loop<F, C>(shared: &Shared, input: &OrderedBuffer<InferredFrame<F>>, mut callback: C)
where
    C: FnMut(ProcessedFrame<F>),
{
    info!("postprocess started");
    let (mut smoother, mut version) = {
        let settings = shared.settings.lock();
        (
            LandmarkSmoother::new(&settings.catalog.current().smoothing),
            settings.smoothing_version,
        )
    };
    while let Some(inferred) = input.pop() {
        if !shared.is_running() {
            break;
        }
        let (threshold, swap) = {
            let settings = shared.settings.lock();
            let swap = (settings.smoothing_version != version)
                .then(|| (settings.smoothing_version, settings.catalog.current().smoothing.clone()));
            (settings.confidence_threshold, swap)
        };
        // filtering runs outside the settings lock
        if let Some((latest, smoothing)) = swap {
            smoother = LandmarkSmoother::new(&smoothing);
            version = latest;
            debug!(version, "smoother rebuilt");
        }
        let results = postprocess::process(inferred.results.as_ref(), threshold, &mut smoother);
        let posture = shared.judge.lock().judge(&results);
        debug!(seq = inferred.seq, ?posture, "frame processed");
        callback(ProcessedFrame {
            seq: inferred.seq,
            frame: inferred.frame,
            results,
            posture,
        });
    }
    info!("postprocess stopped");
}
