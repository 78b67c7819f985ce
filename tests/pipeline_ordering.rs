use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::bail;
use ndarray::Array4;
use parking_lot::Mutex;

use posture_pipeline::filter::SmoothingSettings;
use posture_pipeline::framerate::{FramerateCatalog, FramerateSetting};
use posture_pipeline::landmark::{BodyPart, InferenceResults, Landmark, Status};
use posture_pipeline::posture::DisplacementJudge;
use posture_pipeline::stage::{FrameSource, InferenceCore};
use posture_pipeline::{Pipeline, PipelineError, PipelineOptions, ProcessedFrame, SequenceId};

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// Yields 0, 1, 2, ... and fails once `limit` frames have been produced.
struct Frames {
    next: u32,
    limit: Option<u32>,
}

impl Frames {
    fn endless() -> Self {
        Self { next: 0, limit: None }
    }

    fn limited(limit: u32) -> Self {
        Self {
            next: 0,
            limit: Some(limit),
        }
    }
}

impl FrameSource for Frames {
    type Frame = u32;

    fn next_frame(&mut self) -> anyhow::Result<u32> {
        if self.limit.is_some_and(|limit| self.next >= limit) {
            bail!("camera unplugged");
        }
        self.next += 1;
        Ok(self.next - 1)
    }
}

fn to_tensor(frame: &u32) -> anyhow::Result<Array4<f32>> {
    Ok(Array4::from_elem((1, 1, 1, 1), *frame as f32))
}

fn frame_of(input: &Array4<f32>) -> u32 {
    input[[0, 0, 0, 0]] as u32
}

/// Engine with a per-frame delay that logs completion order.
struct ScriptedEngine {
    slow_frame: Option<u32>,
    delay: Duration,
    fail_frame: Option<u32>,
    completed: Arc<Mutex<Vec<u32>>>,
}

impl ScriptedEngine {
    fn new(completed: &Arc<Mutex<Vec<u32>>>) -> Self {
        Self {
            slow_frame: None,
            delay: Duration::ZERO,
            fail_frame: None,
            completed: Arc::clone(completed),
        }
    }
}

impl InferenceCore for ScriptedEngine {
    fn run(&mut self, input: &Array4<f32>) -> anyhow::Result<InferenceResults> {
        let frame = frame_of(input);
        if self.slow_frame == Some(frame) {
            thread::sleep(self.delay);
        }
        self.completed.lock().push(frame);
        if self.fail_frame == Some(frame) {
            bail!("model crashed on frame {}", frame);
        }
        let mut results = InferenceResults::default();
        results.body_parts[BodyPart::HeadTop as usize] = Landmark::new(0.25, 0.5, 0.4);
        results.body_parts[BodyPart::UpperNeck as usize] = Landmark::new(0.75, 0.5, 0.6);
        Ok(results)
    }
}

fn options(frame_delay_ms: u64, buffer_capacity: usize) -> PipelineOptions {
    let catalog = FramerateCatalog::with_settings(
        vec![
            FramerateSetting::new(SmoothingSettings::passthrough(), frame_delay_ms),
            FramerateSetting::new(SmoothingSettings::passthrough(), frame_delay_ms / 2),
        ],
        0,
    )
    .unwrap();
    PipelineOptions {
        confidence_threshold: 0.5,
        buffer_capacity,
        poll_interval: Duration::from_millis(2),
        catalog,
        ..PipelineOptions::default()
    }
}

fn start<S>(
    options: PipelineOptions,
    source: S,
    engines: Vec<ScriptedEngine>,
) -> (Pipeline<u32>, mpsc::Receiver<ProcessedFrame<u32>>)
where
    S: FrameSource<Frame = u32>,
{
    let (tx, rx) = mpsc::channel();
    let pipeline = Pipeline::start(
        options,
        source,
        to_tensor,
        engines,
        DisplacementJudge::default(),
        move |frame| {
            let _ = tx.send(frame);
        },
    )
    .unwrap();
    (pipeline, rx)
}

#[test]
fn slow_frame_does_not_let_later_frames_overtake() {
    let completed = Arc::new(Mutex::new(Vec::new()));
    let engines = (0..2)
        .map(|_| ScriptedEngine {
            slow_frame: Some(7),
            delay: Duration::from_millis(80),
            ..ScriptedEngine::new(&completed)
        })
        .collect();
    let (mut pipeline, rx) = start(options(2, 8), Frames::endless(), engines);

    let received: Vec<_> = (0..20)
        .map(|_| rx.recv_timeout(RECV_TIMEOUT).unwrap())
        .collect();
    pipeline.stop();

    let order = completed.lock().clone();
    let pos = |f: u32| order.iter().position(|&x| x == f).unwrap();
    assert!(pos(8) < pos(7), "frame 8 should finish inference first: {:?}", order);

    for (expected, frame) in received.iter().enumerate() {
        assert_eq!(frame.frame, expected as u32);
        assert_eq!(frame.seq, expected as SequenceId);
    }
}

#[test]
fn confidence_threshold_decides_trust() {
    let completed = Arc::new(Mutex::new(Vec::new()));
    let (_pipeline, rx) = start(
        options(2, 4),
        Frames::endless(),
        vec![ScriptedEngine::new(&completed)],
    );

    let frame = rx.recv_timeout(RECV_TIMEOUT).unwrap();
    let head = frame.results.get(BodyPart::HeadTop);
    let neck = frame.results.get(BodyPart::UpperNeck);
    assert_eq!(head.status, Status::Untrustworthy);
    assert_eq!(neck.status, Status::Trustworthy);
    assert_eq!((neck.x, neck.y), (0.75, 0.5));
}

#[test]
fn engine_failure_forwards_empty_frame() {
    let completed = Arc::new(Mutex::new(Vec::new()));
    let engines = (0..3)
        .map(|_| ScriptedEngine {
            fail_frame: Some(3),
            ..ScriptedEngine::new(&completed)
        })
        .collect();
    let (_pipeline, rx) = start(options(1, 4), Frames::endless(), engines);

    for expected in 0..6u32 {
        let frame = rx.recv_timeout(RECV_TIMEOUT).unwrap();
        assert_eq!(frame.frame, expected);
        let trusted = frame.results.trustworthy_count();
        if expected == 3 {
            assert_eq!(trusted, 0);
        } else {
            assert_eq!(trusted, 1);
        }
    }
}

#[test]
fn capture_failure_is_reported_as_fault() {
    let completed = Arc::new(Mutex::new(Vec::new()));
    let (pipeline, rx) = start(
        options(1, 4),
        Frames::limited(5),
        vec![ScriptedEngine::new(&completed), ScriptedEngine::new(&completed)],
    );

    for expected in 0..5u32 {
        assert_eq!(rx.recv_timeout(RECV_TIMEOUT).unwrap().frame, expected);
    }

    let deadline = Instant::now() + RECV_TIMEOUT;
    let fault = loop {
        if let Some(fault) = pipeline.take_fault() {
            break fault;
        }
        assert!(Instant::now() < deadline, "no fault recorded");
        thread::sleep(Duration::from_millis(5));
    };
    match fault {
        PipelineError::Capture(msg) => assert!(msg.contains("camera unplugged"), "{}", msg),
        other => panic!("unexpected fault {:?}", other),
    }
    assert!(pipeline.take_fault().is_none());
    assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
}

#[test]
fn stop_returns_while_stages_are_blocked() {
    let completed = Arc::new(Mutex::new(Vec::new()));
    let engines = vec![ScriptedEngine::new(&completed)];
    // capacity 1 and no frame delay: capture spends its time blocked on push
    let (tx, rx) = mpsc::channel();
    let mut pipeline = Pipeline::start(
        options(0, 1),
        Frames::endless(),
        to_tensor,
        engines,
        DisplacementJudge::default(),
        move |frame: ProcessedFrame<u32>| {
            thread::sleep(Duration::from_millis(20));
            let _ = tx.send(frame.seq);
        },
    )
    .unwrap();

    rx.recv_timeout(RECV_TIMEOUT).unwrap();
    let started = Instant::now();
    pipeline.stop();
    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(!pipeline.is_running());
}

#[test]
fn framerate_change_while_running_keeps_order() {
    let completed = Arc::new(Mutex::new(Vec::new()));
    let engines = (0..2).map(|_| ScriptedEngine::new(&completed)).collect();
    let (mut pipeline, rx) = start(options(4, 4), Frames::endless(), engines);

    let mut next = 0u32;
    for round in 0..6 {
        for _ in 0..5 {
            assert_eq!(rx.recv_timeout(RECV_TIMEOUT).unwrap().frame, next);
            next += 1;
        }
        if round % 2 == 0 {
            assert_eq!(pipeline.increase_framerate(), 500.0);
        } else {
            assert_eq!(pipeline.decrease_framerate(), 250.0);
        }
    }
    pipeline.stop();
}

/// Puts the head at 0.2 on even frames and 0.8 on odd ones.
struct AlternatingEngine;

impl InferenceCore for AlternatingEngine {
    fn run(&mut self, input: &Array4<f32>) -> anyhow::Result<InferenceResults> {
        let x = if frame_of(input) % 2 == 0 { 0.2 } else { 0.8 };
        let mut results = InferenceResults::default();
        results.body_parts[BodyPart::HeadTop as usize] = Landmark::new(x, 0.5, 0.9);
        Ok(results)
    }
}

#[test]
fn framerate_step_swaps_in_new_smoothing() {
    let low_pass = SmoothingSettings::new(vec![
        [0.03168934, 0.06337869, 0.03168934, 1.0, -0.41421356, 0.0],
        [1.0, 1.0, 0.0, 1.0, -1.0448155, 0.47759225],
    ]);
    let catalog = FramerateCatalog::with_settings(
        vec![
            FramerateSetting::new(SmoothingSettings::passthrough(), 2),
            FramerateSetting::new(low_pass, 1),
        ],
        0,
    )
    .unwrap();
    let options = PipelineOptions {
        catalog,
        ..options(2, 4)
    };
    let (tx, rx) = mpsc::channel();
    let mut pipeline = Pipeline::start(
        options,
        Frames::endless(),
        to_tensor,
        vec![AlternatingEngine, AlternatingEngine],
        DisplacementJudge::default(),
        move |frame: ProcessedFrame<u32>| {
            let _ = tx.send(frame);
        },
    )
    .unwrap();

    let head_x = |frame: &ProcessedFrame<u32>| {
        let head = frame.results.get(BodyPart::HeadTop);
        assert_eq!(head.status, Status::Trustworthy);
        head.x
    };

    for _ in 0..10 {
        let frame = rx.recv_timeout(RECV_TIMEOUT).unwrap();
        let raw = if frame.frame % 2 == 0 { 0.2 } else { 0.8 };
        assert_eq!(head_x(&frame), raw);
    }

    assert_eq!(pipeline.increase_framerate(), 1000.0);

    // Frames already in flight may still be unfiltered; the low-pass pulls
    // the alternation to its mean once it takes over.
    let mut settled = false;
    for _ in 0..2000 {
        let frame = rx.recv_timeout(RECV_TIMEOUT).unwrap();
        if (head_x(&frame) - 0.5).abs() < 0.05 {
            settled = true;
            break;
        }
    }
    assert!(settled, "smoothing never took effect after the framerate step");

    for _ in 0..10 {
        rx.recv_timeout(RECV_TIMEOUT).unwrap();
    }
    for _ in 0..10 {
        let frame = rx.recv_timeout(RECV_TIMEOUT).unwrap();
        assert!((head_x(&frame) - 0.5).abs() < 0.05, "x = {}", head_x(&frame));
    }
    pipeline.stop();
}
