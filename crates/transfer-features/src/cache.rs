//! Memoization of embeddings.
//!
//! Scoring the frozen network dominates fit time. When the same images are
//! featurized more than once (fit, then evaluate on overlapping data, or
//! repeated fits) the embeddings are served from memory instead. The memo is
//! bounded: once full, the oldest embedding is dropped for each new one.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use sha2::{Digest, Sha256};
use tracing::debug;
use transfer_core::{ChannelOrder, Embedding, Error, ImageDimensions, PixelTensor, Result};

use crate::FeatureExtractor;

type CacheKey = [u8; 32];

/// Embeddings kept by [`CachedExtractor::new`]
pub const DEFAULT_CACHE_CAPACITY: usize = 4096;

#[derive(Default)]
struct CacheState {
    entries: HashMap<CacheKey, Embedding>,
    /// Insertion order, oldest first
    order: VecDeque<CacheKey>,
}

impl CacheState {
    fn insert(&mut self, key: CacheKey, embedding: Embedding, capacity: usize) {
        if self.entries.insert(key, embedding).is_some() {
            return;
        }
        self.order.push_back(key);
        while self.order.len() > capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            }
        }
    }
}

/// Wraps an extractor and remembers the most recent embeddings it produced
pub struct CachedExtractor {
    inner: Arc<dyn FeatureExtractor>,
    state: RwLock<CacheState>,
    capacity: usize,
    hits: AtomicUsize,
    misses: AtomicUsize,
}

impl CachedExtractor {
    pub fn new(inner: Arc<dyn FeatureExtractor>) -> Self {
        Self::with_capacity(inner, DEFAULT_CACHE_CAPACITY)
    }

    /// A capacity of zero is raised to one.
    pub fn with_capacity(inner: Arc<dyn FeatureExtractor>, capacity: usize) -> Self {
        Self {
            inner,
            state: RwLock::new(CacheState::default()),
            capacity: capacity.max(1),
            hits: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of embeddings served from memory
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::Relaxed)
    }

    /// Number of embeddings computed by the wrapped network
    pub fn misses(&self) -> usize {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.state.read().map(|s| s.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Network identity plus tensor contents
    fn key(&self, tensor: &PixelTensor) -> CacheKey {
        let mut hasher = Sha256::new();
        hasher.update(self.inner.name().as_bytes());
        let dims = tensor.dimensions();
        for v in [dims.width, dims.height, dims.channels] {
            hasher.update(v.to_le_bytes());
        }
        hasher.update([tensor.order() as u8]);
        for v in tensor.as_slice() {
            hasher.update(v.to_le_bytes());
        }
        hasher.finalize().into()
    }
}

impl FeatureExtractor for CachedExtractor {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn input_dimensions(&self) -> ImageDimensions {
        self.inner.input_dimensions()
    }

    fn channel_order(&self) -> ChannelOrder {
        self.inner.channel_order()
    }

    fn embedding_dim(&self) -> usize {
        self.inner.embedding_dim()
    }

    fn score(&self, batch: &[PixelTensor]) -> Result<Vec<Embedding>> {
        let keys: Vec<CacheKey> = batch.iter().map(|t| self.key(t)).collect();

        let mut found: Vec<Option<Embedding>> = {
            let state = self
                .state
                .read()
                .map_err(|_| Error::Model("Feature cache lock poisoned".to_string()))?;
            keys.iter().map(|k| state.entries.get(k).cloned()).collect()
        };

        // Each distinct missing tensor is scored once, even if repeated in the batch
        let mut pending: Vec<CacheKey> = Vec::new();
        let mut pending_tensors = Vec::new();
        for (i, key) in keys.iter().enumerate() {
            if found[i].is_none() && !pending.contains(key) {
                pending.push(*key);
                pending_tensors.push(batch[i].clone());
            }
        }

        let hits = found.iter().filter(|f| f.is_some()).count();
        self.hits.fetch_add(hits, Ordering::Relaxed);
        self.misses.fetch_add(pending.len(), Ordering::Relaxed);

        if !pending.is_empty() {
            let scored = self.inner.score(&pending_tensors)?;
            // Slots are filled before inserting; a batch larger than the
            // capacity would otherwise evict its own embeddings.
            for (slot, key) in found.iter_mut().zip(&keys) {
                if slot.is_none() {
                    *slot = pending
                        .iter()
                        .position(|p| p == key)
                        .and_then(|i| scored.get(i).cloned());
                }
            }
            let mut state = self
                .state
                .write()
                .map_err(|_| Error::Model("Feature cache lock poisoned".to_string()))?;
            for (key, embedding) in pending.iter().zip(scored) {
                state.insert(*key, embedding, self.capacity);
            }
        }
        debug!(
            "Feature cache: {} hits, {} scored in this batch",
            hits,
            pending.len()
        );

        found
            .into_iter()
            .map(|f| f.ok_or_else(|| Error::Model("Extractor returned too few embeddings".to_string())))
            .collect()
    }
}
