//! Nearest-neighbour matching of probe embeddings against the gallery.

use crate::types::{DetectedFace, Embedding, EnrolledFace, MatchResult};

/// Strategy for comparing a probe embedding against a gallery of enrolled faces.
pub trait Matcher {
    fn compare(&self, probe: &Embedding, gallery: &[EnrolledFace], threshold: f32) -> MatchResult;
}

/// Euclidean-distance matcher.
///
/// Visits every gallery entry and keeps the minimum distance. A probe
/// matches iff that minimum is strictly below the threshold.
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn compare(&self, probe: &Embedding, gallery: &[EnrolledFace], threshold: f32) -> MatchResult {
        let mut best_dist = f32::INFINITY;
        let mut best_idx: Option<usize> = None;

        for (i, face) in gallery.iter().enumerate() {
            let dist = probe.euclidean_distance(&face.embedding);
            if dist < best_dist {
                best_dist = dist;
                best_idx = Some(i);
            }
        }

        MatchResult {
            matched: best_idx.is_some() && best_dist < threshold,
            best_distance: best_dist,
            best_enrolled_id: best_idx.map(|i| gallery[i].id),
        }
    }
}

/// Evaluate every face detected in one frame.
///
/// Returns the first matching result found. Without a match, returns the
/// closest non-match across all faces. A frame with no faces never
/// touches the gallery.
pub fn match_faces<M: Matcher + ?Sized>(
    matcher: &M,
    faces: &[DetectedFace],
    gallery: &[EnrolledFace],
    threshold: f32,
) -> MatchResult {
    let mut closest = MatchResult::no_match();

    for face in faces {
        let result = matcher.compare(&face.embedding, gallery, threshold);
        if result.matched {
            return result;
        }
        if result.best_distance < closest.best_distance {
            closest = result;
        }
    }

    closest
}
