//! In-process stand-ins for the camera and the embedding provider.

use lookout_core::{DetectedFace, Embedding, EmbeddingProvider, ProviderError, Region, EMBEDDING_DIM};
use lookout_hw::{CameraError, CameraOpener, Frame, FrameSource};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

pub const FRAME_WIDTH: u32 = 64;
pub const FRAME_HEIGHT: u32 = 48;

/// Embedding at Euclidean distance `d` from [`origin`].
pub fn embedding_at(d: f32) -> Embedding {
    let mut values = vec![0.0; EMBEDDING_DIM];
    values[0] = d;
    Embedding::new(values)
}

pub fn origin() -> Embedding {
    embedding_at(0.0)
}

pub fn face_at(d: f32) -> DetectedFace {
    DetectedFace {
        region: Region { x: 8.0, y: 4.0, width: 24.0, height: 30.0 },
        embedding: embedding_at(d),
        confidence: 0.9,
        landmarks: Vec::new(),
    }
}

#[derive(Debug, Default)]
pub struct CameraState {
    pub fail_open: Option<CameraError>,
    /// Frames to report as "not ready" before real ones.
    pub not_ready_frames: usize,
    pub live: usize,
    /// Open attempts, failed ones included.
    pub opens: usize,
    pub frames_served: usize,
}

#[derive(Clone, Default)]
pub struct FakeCamera {
    pub state: Arc<Mutex<CameraState>>,
}

impl FakeCamera {
    pub fn failing(error: CameraError) -> Self {
        let camera = Self::default();
        camera.state.lock().unwrap().fail_open = Some(error);
        camera
    }

    pub fn live(&self) -> usize {
        self.state.lock().unwrap().live
    }

    pub fn opens(&self) -> usize {
        self.state.lock().unwrap().opens
    }
}

struct FakeSource {
    state: Arc<Mutex<CameraState>>,
}

impl FrameSource for FakeSource {
    fn next_frame(&mut self) -> Result<Option<Frame>, CameraError> {
        let mut state = self.state.lock().unwrap();
        if state.not_ready_frames > 0 {
            state.not_ready_frames -= 1;
            return Ok(None);
        }
        state.frames_served += 1;
        Ok(Some(Frame {
            data: vec![128; (FRAME_WIDTH * FRAME_HEIGHT) as usize],
            width: FRAME_WIDTH,
            height: FRAME_HEIGHT,
            timestamp: std::time::Instant::now(),
            sequence: state.frames_served as u32,
        }))
    }

    fn resolution(&self) -> (u32, u32) {
        (FRAME_WIDTH, FRAME_HEIGHT)
    }

    fn describe(&self) -> String {
        "fake".into()
    }
}

impl Drop for FakeSource {
    fn drop(&mut self) {
        if let Ok(mut state) = self.state.lock() {
            state.live -= 1;
        }
    }
}

impl CameraOpener for FakeCamera {
    fn open(&self) -> Result<Box<dyn FrameSource>, CameraError> {
        let mut state = self.state.lock().unwrap();
        state.opens += 1;
        if let Some(e) = &state.fail_open {
            return Err(e.clone());
        }
        state.live += 1;
        Ok(Box::new(FakeSource {
            state: self.state.clone(),
        }))
    }
}

#[derive(Debug, Default)]
pub struct Script {
    /// Answers consumed one per call, before falling back to `steady`.
    pub queue: VecDeque<Result<Vec<DetectedFace>, ProviderError>>,
    pub steady: Vec<DetectedFace>,
    pub calls: usize,
}

#[derive(Clone, Default)]
pub struct ScriptedProvider {
    pub script: Arc<Mutex<Script>>,
}

impl ScriptedProvider {
    pub fn steady(faces: Vec<DetectedFace>) -> Self {
        let provider = Self::default();
        provider.set_steady(faces);
        provider
    }

    pub fn set_steady(&self, faces: Vec<DetectedFace>) {
        self.script.lock().unwrap().steady = faces;
    }

    pub fn push(&self, answer: Result<Vec<DetectedFace>, ProviderError>) {
        self.script.lock().unwrap().queue.push_back(answer);
    }

    pub fn calls(&self) -> usize {
        self.script.lock().unwrap().calls
    }
}

impl EmbeddingProvider for ScriptedProvider {
    fn detect(&mut self, pixels: &[u8], width: u32, height: u32) -> Result<Vec<DetectedFace>, ProviderError> {
        assert_eq!(pixels.len(), (width * height) as usize);
        let mut script = self.script.lock().unwrap();
        script.calls += 1;
        match script.queue.pop_front() {
            Some(answer) => answer,
            None => Ok(script.steady.clone()),
        }
    }
}
