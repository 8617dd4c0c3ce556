//! Embedding provider capability.
//!
//! The detection/embedding model is a black box behind [`EmbeddingProvider`].
//! Loading goes through [`negotiate`], which tries a primary source and then
//! an optional fallback; both outcomes satisfy the same contract, so callers
//! only ever look at the [`ReadinessGate`].

use crate::types::DetectedFace;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("provider unavailable: {0}")]
    Unavailable(String),
    #[error("provider I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("provider protocol error: {0}")]
    Protocol(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
}

/// Detects faces in a grayscale frame and returns one embedding per face.
pub trait EmbeddingProvider: Send {
    fn detect(
        &mut self,
        pixels: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<DetectedFace>, ProviderError>;

    /// The single most confident face, if any.
    ///
    /// Other faces in the frame are discarded, so callers that must reject
    /// crowded frames (registration capture) count the output of
    /// [`detect`](Self::detect) instead.
    fn detect_single(
        &mut self,
        pixels: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Option<DetectedFace>, ProviderError> {
        let faces = self.detect(pixels, width, height)?;
        Ok(faces.into_iter().max_by(|a, b| {
            a.confidence
                .partial_cmp(&b.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        }))
    }
}

/// Somewhere a provider can be loaded from.
pub trait ProviderSource {
    fn name(&self) -> String;
    fn load(&self) -> Result<Box<dyn EmbeddingProvider>, ProviderError>;
}

/// Which source satisfied the load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderOrigin {
    Primary,
    Fallback,
}

impl ProviderOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderOrigin::Primary => "primary",
            ProviderOrigin::Fallback => "fallback",
        }
    }
}

pub struct LoadedProvider {
    pub provider: Box<dyn EmbeddingProvider>,
    pub origin: ProviderOrigin,
    pub source_name: String,
}

impl std::fmt::Debug for LoadedProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedProvider")
            .field("origin", &self.origin)
            .field("source_name", &self.source_name)
            .finish_non_exhaustive()
    }
}

/// Load from `primary`, falling back to `fallback` if that fails.
pub fn negotiate(
    primary: &dyn ProviderSource,
    fallback: Option<&dyn ProviderSource>,
) -> Result<LoadedProvider, ProviderError> {
    let primary_err = match primary.load() {
        Ok(provider) => {
            tracing::info!(source = %primary.name(), "embedding provider loaded");
            return Ok(LoadedProvider {
                provider,
                origin: ProviderOrigin::Primary,
                source_name: primary.name(),
            });
        }
        Err(e) => e,
    };

    let Some(fallback) = fallback else {
        return Err(ProviderError::Unavailable(format!(
            "{}: {primary_err}",
            primary.name()
        )));
    };

    tracing::warn!(
        source = %primary.name(),
        error = %primary_err,
        fallback = %fallback.name(),
        "primary embedding provider failed; trying fallback"
    );

    match fallback.load() {
        Ok(provider) => {
            tracing::info!(source = %fallback.name(), "embedding provider loaded from fallback");
            Ok(LoadedProvider {
                provider,
                origin: ProviderOrigin::Fallback,
                source_name: fallback.name(),
            })
        }
        Err(fallback_err) => Err(ProviderError::Unavailable(format!(
            "{}: {primary_err}; {}: {fallback_err}",
            primary.name(),
            fallback.name()
        ))),
    }
}

/// Shared boolean that flips once a provider is installed.
#[derive(Debug, Clone, Default)]
pub struct ReadinessGate(Arc<AtomicBool>);

impl ReadinessGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn close(&self) {
        self.0.store(false, Ordering::Release);
    }

    pub fn is_ready(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Embedding, Region};

    struct FixedProvider(Vec<DetectedFace>);

    impl EmbeddingProvider for FixedProvider {
        fn detect(&mut self, _: &[u8], _: u32, _: u32) -> Result<Vec<DetectedFace>, ProviderError> {
            Ok(self.0.clone())
        }
    }

    struct Source {
        name: &'static str,
        ok: bool,
    }

    impl ProviderSource for Source {
        fn name(&self) -> String {
            self.name.to_string()
        }

        fn load(&self) -> Result<Box<dyn EmbeddingProvider>, ProviderError> {
            if self.ok {
                Ok(Box::new(FixedProvider(Vec::new())))
            } else {
                Err(ProviderError::Unavailable(format!("{} is down", self.name)))
            }
        }
    }

    fn face(confidence: f32) -> DetectedFace {
        DetectedFace {
            region: Region { x: 0.0, y: 0.0, width: 1.0, height: 1.0 },
            embedding: Embedding::new(vec![confidence]),
            confidence,
            landmarks: Vec::new(),
        }
    }

    #[test]
    fn test_negotiate_prefers_primary() {
        let primary = Source { name: "primary", ok: true };
        let fallback = Source { name: "fallback", ok: true };
        let loaded = negotiate(&primary, Some(&fallback)).unwrap();
        assert_eq!(loaded.origin, ProviderOrigin::Primary);
        assert_eq!(loaded.source_name, "primary");
    }

    #[test]
    fn test_negotiate_uses_fallback() {
        let primary = Source { name: "primary", ok: false };
        let fallback = Source { name: "fallback", ok: true };
        let loaded = negotiate(&primary, Some(&fallback)).unwrap();
        assert_eq!(loaded.origin, ProviderOrigin::Fallback);
        assert_eq!(loaded.source_name, "fallback");
    }

    #[test]
    fn test_negotiate_both_fail() {
        let primary = Source { name: "primary", ok: false };
        let fallback = Source { name: "fallback", ok: false };
        let err = negotiate(&primary, Some(&fallback)).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("primary is down"), "{msg}");
        assert!(msg.contains("fallback is down"), "{msg}");
    }

    #[test]
    fn test_negotiate_without_fallback() {
        let primary = Source { name: "primary", ok: false };
        assert!(matches!(
            negotiate(&primary, None),
            Err(ProviderError::Unavailable(_))
        ));
    }

    #[test]
    fn test_detect_single_picks_most_confident() {
        let mut provider = FixedProvider(vec![face(0.6), face(0.95), face(0.7)]);
        let best = provider.detect_single(&[], 0, 0).unwrap().unwrap();
        assert!((best.confidence - 0.95).abs() < 1e-6);

        let mut empty = FixedProvider(Vec::new());
        assert!(empty.detect_single(&[], 0, 0).unwrap().is_none());
    }

    #[test]
    fn test_readiness_gate_shared() {
        let gate = ReadinessGate::new();
        let view = gate.clone();
        assert!(!view.is_ready());
        gate.open();
        assert!(view.is_ready());
        gate.close();
        assert!(!view.is_ready());
    }
}
