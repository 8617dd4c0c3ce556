//! Background loading of the embedding provider.
//!
//! Startup never waits on the provider: the loader negotiates primary and
//! fallback sources on its own thread, hands the result to the engine and
//! publishes its progress for status reporting.

use crate::engine::EngineHandle;
use lookout_core::service::SocketSource;
use lookout_core::{negotiate, ProviderSource};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::watch;

/// Delay between load attempts while no source answers.
pub const RETRY_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum ProviderState {
    Loading,
    Ready { origin: &'static str, source: String },
    Unavailable { error: String },
}

/// Negotiate once and install the result into the engine.
/// Returns `true` when a provider was installed.
pub fn load_into(
    primary: &dyn ProviderSource,
    fallback: Option<&dyn ProviderSource>,
    engine: &EngineHandle,
    state: &watch::Sender<ProviderState>,
) -> bool {
    match negotiate(primary, fallback) {
        Ok(loaded) => {
            state.send_replace(ProviderState::Ready {
                origin: loaded.origin.as_str(),
                source: loaded.source_name.clone(),
            });
            engine.install_provider(loaded);
            true
        }
        Err(e) => {
            state.send_replace(ProviderState::Unavailable {
                error: e.to_string(),
            });
            false
        }
    }
}

/// Spawn the loader thread. It retries every [`RETRY_INTERVAL`] until a
/// source loads; after that the installed provider reconnects on its own.
pub fn spawn_provider_loader(
    primary: PathBuf,
    fallback: Option<PathBuf>,
    engine: EngineHandle,
) -> std::io::Result<watch::Receiver<ProviderState>> {
    let (state_tx, state_rx) = watch::channel(ProviderState::Loading);

    std::thread::Builder::new()
        .name("lookout-provider".into())
        .spawn(move || {
            let primary = SocketSource::new(primary);
            let fallback = fallback.map(SocketSource::new);
            let mut attempt = 1u32;
            while !load_into(
                &primary,
                fallback.as_ref().map(|f| f as &dyn ProviderSource),
                &engine,
                &state_tx,
            ) {
                if attempt == 1 {
                    tracing::error!(
                        primary = %primary.name(),
                        "no embedding provider could be loaded; detection stays disabled"
                    );
                } else {
                    tracing::debug!(attempt, "embedding provider still unavailable");
                }
                attempt += 1;
                std::thread::sleep(RETRY_INTERVAL);
            }
        })?;

    Ok(state_rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{spawn_engine, LoopSettings};
    use crate::testing::{FakeCamera, ScriptedProvider};
    use lookout_core::{EmbeddingProvider, ProviderError, ReadinessGate};
    use tokio::sync::mpsc;

    struct Source {
        name: &'static str,
        works: bool,
    }

    impl ProviderSource for Source {
        fn name(&self) -> String {
            self.name.into()
        }

        fn load(&self) -> Result<Box<dyn EmbeddingProvider>, ProviderError> {
            if self.works {
                Ok(Box::new(ScriptedProvider::default()))
            } else {
                Err(ProviderError::Unavailable(format!("{} is down", self.name)))
            }
        }
    }

    fn engine(gate: ReadinessGate) -> EngineHandle {
        let (events, _rx) = mpsc::unbounded_channel();
        let settings = LoopSettings {
            poll_interval: Duration::from_millis(1),
            hidden_poll_interval: Duration::from_millis(1),
            throttle_when_hidden: false,
            match_threshold: 0.5,
            capture_attempts: 1,
        };
        spawn_engine(Box::new(FakeCamera::default()), settings, gate, events)
            .unwrap()
            .0
    }

    fn wait_ready(gate: &ReadinessGate) -> bool {
        for _ in 0..200 {
            if gate.is_ready() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn test_fallback_reported_in_state() {
        let gate = ReadinessGate::new();
        let engine = engine(gate.clone());
        let (state, rx) = watch::channel(ProviderState::Loading);
        let primary = Source { name: "primary", works: false };
        let fallback = Source { name: "fallback", works: true };

        assert!(load_into(&primary, Some(&fallback), &engine, &state));
        assert_eq!(
            *rx.borrow(),
            ProviderState::Ready {
                origin: "fallback",
                source: "fallback".into()
            }
        );
        assert!(wait_ready(&gate));
    }

    #[test]
    fn test_unavailable_keeps_gate_closed() {
        let gate = ReadinessGate::new();
        let engine = engine(gate.clone());
        let (state, rx) = watch::channel(ProviderState::Loading);
        let primary = Source { name: "primary", works: false };

        assert!(!load_into(&primary, None, &engine, &state));
        assert!(matches!(*rx.borrow(), ProviderState::Unavailable { .. }));
        assert!(!gate.is_ready());
    }

    #[test]
    fn test_state_serializes_tagged() {
        let json = serde_json::to_value(ProviderState::Ready {
            origin: "primary",
            source: "/run/embedder.sock".into(),
        })
        .unwrap();
        assert_eq!(json["state"], "ready");
        assert_eq!(json["origin"], "primary");
    }
}
