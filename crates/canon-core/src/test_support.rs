//! Collaborator doubles shared by the unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::CanonConfig;
use crate::engine::CanonEngine;
use crate::error::{CanonError, CanonResult};
use crate::store::InMemoryGraphStore;
use crate::traits::{Disambiguation, DisambiguationOracle, Embedder, OracleCandidate};
use crate::types::EntityCandidate;
use crate::vector::InMemoryVectorIndex;

const DIMS: usize = 27;

/// Concurrent `embed` calls seen by a [`StubEmbedder`].
#[derive(Default)]
pub(crate) struct InFlight {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl InFlight {
    fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    pub(crate) fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

/// Letter-frequency embedding: equal texts get identical vectors and
/// unrelated texts score low.
pub(crate) struct StubEmbedder {
    fail: bool,
    delay: Option<Duration>,
    in_flight: Arc<InFlight>,
}

impl StubEmbedder {
    pub(crate) fn new() -> Self {
        Self {
            fail: false,
            delay: None,
            in_flight: Arc::default(),
        }
    }

    pub(crate) fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new()
        }
    }

    pub(crate) fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::new()
        }
    }

    pub(crate) fn in_flight(&self) -> Arc<InFlight> {
        self.in_flight.clone()
    }
}

#[async_trait]
impl Embedder for StubEmbedder {
    async fn embed(&self, text: &str) -> CanonResult<Vec<f32>> {
        self.in_flight.enter();
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.leave();
        if self.fail {
            return Err(CanonError::embedding("stub embedder is down"));
        }
        let mut vector = vec![0.0; DIMS];
        for c in text.to_lowercase().chars() {
            match c {
                'a'..='z' => vector[(c as u8 - b'a') as usize] += 1.0,
                _ => vector[DIMS - 1] += 0.1,
            }
        }
        Ok(vector)
    }

    fn dimension(&self) -> usize {
        DIMS
    }

    fn model_name(&self) -> &str {
        "stub"
    }
}

pub(crate) enum OracleMode {
    /// Duplicate of the first (best scored) candidate with this confidence.
    AcceptBest(f32),
    Reject,
    Fixed(Disambiguation),
    Fail,
    Hang,
}

pub(crate) struct StubOracle {
    mode: OracleMode,
    calls: AtomicUsize,
}

impl StubOracle {
    pub(crate) fn new(mode: OracleMode) -> Self {
        Self {
            mode,
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DisambiguationOracle for StubOracle {
    async fn disambiguate(
        &self,
        _target: &EntityCandidate,
        candidates: &[OracleCandidate],
    ) -> CanonResult<Disambiguation> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.mode {
            OracleMode::AcceptBest(confidence) => Ok(Disambiguation::duplicate_of(
                candidates[0].entity_id,
                *confidence,
            )),
            OracleMode::Reject => Ok(Disambiguation::distinct(0.9)),
            OracleMode::Fixed(verdict) => Ok(verdict.clone()),
            OracleMode::Fail => Err(CanonError::oracle("stub oracle is down")),
            OracleMode::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(CanonError::oracle("unreachable"))
            }
        }
    }

    fn name(&self) -> &str {
        "stub"
    }
}

/// An engine over in-memory stores with a short collaborator timeout.
pub(crate) fn engine(mode: OracleMode) -> (CanonEngine, Arc<InMemoryGraphStore>, Arc<StubOracle>) {
    engine_with(CanonConfig::default(), StubEmbedder::new(), mode)
}

pub(crate) fn engine_with(
    mut config: CanonConfig,
    embedder: StubEmbedder,
    mode: OracleMode,
) -> (CanonEngine, Arc<InMemoryGraphStore>, Arc<StubOracle>) {
    config.resolution.collaborator_timeout_ms = 500;
    let store = Arc::new(InMemoryGraphStore::new());
    let oracle = Arc::new(StubOracle::new(mode));
    let engine = CanonEngine::builder(config)
        .stores(store.clone())
        .embedder(Arc::new(embedder))
        .vector_index(Arc::new(InMemoryVectorIndex::new()))
        .oracle(oracle.clone())
        .build()
        .expect("engine builds");
    (engine, store, oracle)
}
