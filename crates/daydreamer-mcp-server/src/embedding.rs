//! Embedding subsystem.
//!
//! One embedder instance serves the whole process, including GraphRAG global
//! search. The heavy model is not loaded at startup: the first encode takes
//! the load mutex, loads once, and records the post-load RSS for
//! diagnostics. Cache hits bypass both the model and the circuit breaker.
//! Embedding is best-effort everywhere: callers degrade, they do not fail
//! writes.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::runtime::EmbeddingSettings;

pub mod backend;
pub mod breaker;

use backend::{EncoderBackend, OnnxBackend};
use breaker::MemoryBreaker;

/// Fixed output dimensionality: Matryoshka truncation of the underlying
/// model's vector.
pub const EMBEDDING_DIMENSIONS: usize = 256;

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("embedding backend unavailable: {0}")]
    Unavailable(String),

    #[error("embedding call exceeded {0}s")]
    Timeout(u64),

    #[error("memory circuit breaker open (rss {0} bytes)")]
    ResourceExhausted(u64),
}

impl From<EmbeddingError> for crate::errors::McpError {
    fn from(err: EmbeddingError) -> Self {
        match err {
            EmbeddingError::Timeout(secs) => {
                Self::timeout(format!("embedding call exceeded {secs}s"))
            }
            EmbeddingError::ResourceExhausted(rss) => {
                Self::resource_exhausted(format!("memory circuit breaker open (rss {rss} bytes)"))
            }
            EmbeddingError::Unavailable(message) => {
                Self::internal(format!("embedding backend unavailable: {message}"))
            }
        }
    }
}

pub type SharedBackend = Arc<dyn EncoderBackend>;
pub type Loader = Arc<dyn Fn() -> Result<SharedBackend, EmbeddingError> + Send + Sync>;

pub struct Embedder {
    backend: tokio::sync::Mutex<Option<SharedBackend>>,
    loader: Loader,
    cache: moka::future::Cache<String, Arc<Vec<f32>>>,
    breaker: MemoryBreaker,
    timeout: Duration,
    post_load_rss: AtomicU64,
    last_used: std::sync::Mutex<Instant>,
}

impl Embedder {
    /// The production embedder. Nothing is loaded until the first encode.
    pub fn new(settings: &EmbeddingSettings) -> Self {
        Self::with_loader(
            settings,
            Arc::new(|| OnnxBackend::load().map(|b| Arc::new(b) as SharedBackend)),
        )
    }

    /// Inject a backend loader; used by tests and alternate deployments.
    pub fn with_loader(settings: &EmbeddingSettings, loader: Loader) -> Self {
        Self {
            backend: tokio::sync::Mutex::new(None),
            loader,
            cache: moka::future::Cache::builder()
                .max_capacity(settings.cache_capacity)
                .build(),
            breaker: MemoryBreaker::new(
                settings.memory_threshold_bytes,
                settings.memory_recovery_bytes,
            ),
            timeout: settings.timeout,
            post_load_rss: AtomicU64::new(0),
            last_used: std::sync::Mutex::new(Instant::now()),
        }
    }

    #[cfg(test)]
    fn with_loader_and_breaker(
        settings: &EmbeddingSettings,
        loader: Loader,
        breaker: MemoryBreaker,
    ) -> Self {
        let mut embedder = Self::with_loader(settings, loader);
        embedder.breaker = breaker;
        embedder
    }

    /// Encode one text into a 256-D L2-normalized vector.
    pub async fn encode_single(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let key = cache_key(text);
        if let Some(hit) = self.cache.get(&key).await {
            return Ok(hit.as_ref().clone());
        }

        self.breaker.check()?;
        let backend = self.acquire_backend().await?;
        let vectors = self.run_encode(backend, vec![text.to_string()]).await?;
        let vector = vectors
            .into_iter()
            .next()
            .map(finalize_vector)
            .ok_or_else(|| EmbeddingError::Unavailable("backend returned no vector".to_string()))?;

        self.cache.insert(key, Arc::new(vector.clone())).await;
        self.touch();
        Ok(vector)
    }

    /// Encode a batch, reusing cached entries and encoding only the misses.
    pub async fn encode_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut results: Vec<Option<Vec<f32>>> = Vec::with_capacity(texts.len());
        let mut misses: Vec<(usize, String)> = Vec::new();

        for (index, text) in texts.iter().enumerate() {
            match self.cache.get(&cache_key(text)).await {
                Some(hit) => results.push(Some(hit.as_ref().clone())),
                None => {
                    results.push(None);
                    misses.push((index, text.clone()));
                }
            }
        }

        if !misses.is_empty() {
            self.breaker.check()?;
            let backend = self.acquire_backend().await?;
            let inputs: Vec<String> = misses.iter().map(|(_, t)| t.clone()).collect();
            let encoded = self.run_encode(backend, inputs).await?;

            for ((index, text), raw) in misses.into_iter().zip(encoded) {
                let vector = finalize_vector(raw);
                self.cache
                    .insert(cache_key(&text), Arc::new(vector.clone()))
                    .await;
                if let Some(slot) = results.get_mut(index) {
                    *slot = Some(vector);
                }
            }
            self.touch();
        }

        Ok(results.into_iter().flatten().collect())
    }

    /// True once the backing model has been loaded (and not unloaded since).
    pub async fn is_loaded(&self) -> bool {
        self.backend.lock().await.is_some()
    }

    pub fn breaker(&self) -> &MemoryBreaker {
        &self.breaker
    }

    /// RSS recorded right after the model load, in bytes. Zero until loaded.
    pub fn post_load_rss_bytes(&self) -> u64 {
        self.post_load_rss.load(Ordering::Relaxed)
    }

    /// Drop the model if no encode happened within `idle`. Returns whether a
    /// model was unloaded.
    pub async fn unload_if_idle(&self, idle: Duration) -> bool {
        let last = lock_instant(&self.last_used);
        if last.elapsed() < idle {
            return false;
        }
        let mut guard = self.backend.lock().await;
        if guard.take().is_some() {
            info!("unloaded idle embedding model");
            return true;
        }
        false
    }

    async fn acquire_backend(&self) -> Result<SharedBackend, EmbeddingError> {
        let mut guard = self.backend.lock().await;
        if let Some(backend) = guard.as_ref() {
            return Ok(Arc::clone(backend));
        }

        debug!("loading embedding model (first use)");
        let loader = Arc::clone(&self.loader);
        let joined = tokio::time::timeout(self.timeout, tokio::task::spawn_blocking(move || loader()))
            .await
            .map_err(|_| EmbeddingError::Timeout(self.timeout.as_secs()))?;
        let backend = joined
            .map_err(|e| EmbeddingError::Unavailable(format!("loader task failed: {e}")))??;

        let rss = self.breaker.rss_bytes();
        self.post_load_rss.store(rss, Ordering::Relaxed);
        info!(
            backend = backend.name(),
            post_load_rss_bytes = rss,
            "embedding model loaded"
        );

        *guard = Some(Arc::clone(&backend));
        Ok(backend)
    }

    async fn run_encode(
        &self,
        backend: SharedBackend,
        texts: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let handle = tokio::task::spawn_blocking(move || backend.encode(&texts));
        match tokio::time::timeout(self.timeout, handle).await {
            Err(_) => Err(EmbeddingError::Timeout(self.timeout.as_secs())),
            Ok(Err(join)) => Err(EmbeddingError::Unavailable(format!(
                "encode task failed: {join}"
            ))),
            Ok(Ok(result)) => result,
        }
    }

    fn touch(&self) {
        if let Ok(mut guard) = self.last_used.lock() {
            *guard = Instant::now();
        }
    }
}

fn lock_instant(mutex: &std::sync::Mutex<Instant>) -> Instant {
    match mutex.lock() {
        Ok(guard) => *guard,
        Err(poisoned) => *poisoned.into_inner(),
    }
}

fn cache_key(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    format!("{digest:x}")
}

/// Truncate to 256 dimensions and L2-normalize.
fn finalize_vector(mut vector: Vec<f32>) -> Vec<f32> {
    vector.truncate(EMBEDDING_DIMENSIONS);
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for value in &mut vector {
            *value /= norm;
        }
    }
    vector
}

/// Periodic RSS log line for shared-host debugging. Off by default: on
/// shared hosts the numbers are easy to misread as container limits.
pub fn spawn_resource_monitor(cancellation: CancellationToken) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(60));
        loop {
            tokio::select! {
                _ = cancellation.cancelled() => break,
                _ = ticker.tick() => {
                    let rss = breaker::process_rss_bytes();
                    info!(rss_bytes = rss, "resource monitor");
                    if rss == 0 {
                        warn!("resource monitor could not sample process RSS");
                    }
                }
            }
        }
    });
}
