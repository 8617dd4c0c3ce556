//! In-memory enrollment gallery.

use crate::types::{EnrolledFace, FaceId, EMBEDDING_DIM};
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum GalleryError {
    #[error("embedding has {actual} values, expected {expected}", expected = EMBEDDING_DIM)]
    DimensionMismatch { actual: usize },
}

/// Ordered set of enrolled faces.
///
/// Insertion order is kept for display; matching treats the entries as an
/// unordered set. Duplicate embeddings are allowed.
#[derive(Debug, Clone, Default)]
pub struct Gallery {
    entries: Vec<EnrolledFace>,
}

impl Gallery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a face. Rejects embeddings that break the fixed-length contract.
    pub fn add(&mut self, face: EnrolledFace) -> Result<FaceId, GalleryError> {
        if face.embedding.len() != EMBEDDING_DIM {
            return Err(GalleryError::DimensionMismatch {
                actual: face.embedding.len(),
            });
        }
        let id = face.id;
        tracing::info!(%id, name = %face.display_name, size = self.entries.len() + 1, "face enrolled");
        self.entries.push(face);
        Ok(id)
    }

    /// Remove a face by id, returning it if it was present.
    pub fn remove(&mut self, id: &FaceId) -> Option<EnrolledFace> {
        let pos = self.entries.iter().position(|f| &f.id == id)?;
        let removed = self.entries.remove(pos);
        tracing::info!(%id, size = self.entries.len(), "face removed");
        Some(removed)
    }

    pub fn get(&self, id: &FaceId) -> Option<&EnrolledFace> {
        self.entries.iter().find(|f| &f.id == id)
    }

    /// Entries in insertion order.
    pub fn list(&self) -> &[EnrolledFace] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
