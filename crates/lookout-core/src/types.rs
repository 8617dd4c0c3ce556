use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Length of every embedding produced by the provider contract.
pub const EMBEDDING_DIM: usize = 128;

/// Region of a detected face in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Region {
    /// Clamp the region to a `width`×`height` frame, returning integer
    /// pixel bounds `(x, y, w, h)`, or `None` if nothing is left.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
        let x0 = self.x.max(0.0).floor() as u32;
        let y0 = self.y.max(0.0).floor() as u32;
        let x1 = ((self.x + self.width).ceil().max(0.0) as u32).min(width);
        let y1 = ((self.y + self.height).ceil().max(0.0) as u32).min(height);
        if x0 >= x1 || y0 >= y1 {
            return None;
        }
        Some((x0, y0, x1 - x0, y1 - y0))
    }
}

/// Face embedding vector (128-dimensional under the provider contract).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Compute Euclidean distance between two embeddings.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

impl From<Vec<f32>> for Embedding {
    fn from(values: Vec<f32>) -> Self {
        Self::new(values)
    }
}

/// A face found in a single frame. Lives for one detection cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectedFace {
    pub region: Region,
    pub embedding: Embedding,
    pub confidence: f32,
    /// Facial landmark points, when the provider reports them.
    #[serde(default)]
    pub landmarks: Vec<(f32, f32)>,
}

/// Opaque identifier of an enrolled face.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FaceId(Uuid);

impl FaceId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for FaceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for FaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for FaceId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// An enrolled face. Never mutated once created.
#[derive(Debug, Clone)]
pub struct EnrolledFace {
    pub id: FaceId,
    pub embedding: Embedding,
    /// PNG-encoded crop of the face taken at registration.
    pub thumbnail: Vec<u8>,
    pub display_name: String,
    pub enrolled_at: DateTime<Utc>,
}

impl EnrolledFace {
    /// Build a new entry stamped with a fresh id and the current time.
    pub fn new(embedding: Embedding, thumbnail: Vec<u8>, display_name: impl Into<String>) -> Self {
        Self {
            id: FaceId::new(),
            embedding,
            thumbnail,
            display_name: display_name.into(),
            enrolled_at: Utc::now(),
        }
    }
}

/// Result of matching probe embeddings against the gallery.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub matched: bool,
    /// Smallest Euclidean distance seen (`INFINITY` if nothing was compared).
    pub best_distance: f32,
    /// Enrolled face at `best_distance`, if any.
    pub best_enrolled_id: Option<FaceId>,
}

impl MatchResult {
    pub fn no_match() -> Self {
        Self {
            matched: false,
            best_distance: f32::INFINITY,
            best_enrolled_id: None,
        }
    }
}
