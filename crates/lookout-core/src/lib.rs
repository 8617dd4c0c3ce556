//! lookout-core: Face matching engine for the Lookout presence guard.
//!
//! Holds the enrollment gallery, the Euclidean nearest-neighbour matcher,
//! and the embedding provider capability the detection loop talks to.

pub mod gallery;
pub mod matcher;
pub mod provider;
pub mod service;
pub mod thumbnail;
pub mod types;

pub use gallery::{Gallery, GalleryError};
pub use matcher::{match_faces, EuclideanMatcher, Matcher};
pub use provider::{
    negotiate, EmbeddingProvider, LoadedProvider, ProviderError, ProviderOrigin, ProviderSource,
    ReadinessGate,
};
pub use types::{
    DetectedFace, Embedding, EnrolledFace, FaceId, MatchResult, Region, EMBEDDING_DIM,
};
