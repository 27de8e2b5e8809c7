//! Embedding backends.
//!
//! The engine only sees two capabilities:
//! - [`BackendProvider`] loads a backend (possibly downloading a model)
//! - [`EmbeddingBackend`] turns one text into a vector
//!
//! [`FastembedProvider`] is the production implementation, running a local
//! sentence-transformer through fastembed.

use fastembed::{InitOptions, TextEmbedding};
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Mutex;
use std::time::Duration;

use super::Embedding;

/// Error type for embedding operations
#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("Model initialization failed: {0}")]
    InitFailed(String),

    #[error("Embedding generation failed: {0}")]
    EmbeddingFailed(String),

    #[error("Model download timed out after {0} seconds")]
    DownloadTimeout(u64),

    #[error("Invalid model name: {0}")]
    InvalidModel(String),

    #[error("Unsupported embedding options: {0}")]
    UnsupportedOptions(String),
}

/// Pooling applied over token embeddings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pooling {
    Mean,
}

/// Options passed along with every embedding request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmbedOptions {
    pub pooling: Pooling,
    pub normalize: bool,
}

impl Default for EmbedOptions {
    fn default() -> Self {
        Self {
            pooling: Pooling::Mean,
            normalize: true,
        }
    }
}

/// A loaded embedding model.
pub trait EmbeddingBackend: Send + Sync {
    fn embed(&self, text: &str, options: &EmbedOptions) -> Result<Embedding, EmbeddingError>;
}

/// Loads an [`EmbeddingBackend`]. Called again after a failed load.
pub trait BackendProvider: Send + Sync {
    fn load(&self) -> Result<Box<dyn EmbeddingBackend>, EmbeddingError>;
}

impl<F> BackendProvider for F
where
    F: Fn() -> Result<Box<dyn EmbeddingBackend>, EmbeddingError> + Send + Sync,
{
    fn load(&self) -> Result<Box<dyn EmbeddingBackend>, EmbeddingError> {
        self()
    }
}

/// Scale `v` to unit L2 norm. Zero vectors are left untouched.
pub fn l2_normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        v.iter_mut().for_each(|x| *x /= norm);
    }
}

/// Supported models. All of them are mean-pooled MiniLM variants.
fn parse_model_name(name: &str) -> Result<fastembed::EmbeddingModel, EmbeddingError> {
    match name.to_lowercase().as_str() {
        "all-minilm-l6-v2" | "allminilml6v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
        "all-minilm-l6-v2-q" | "allminilml6v2q" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2Q),
        "all-minilm-l12-v2" | "allminilml12v2" => Ok(fastembed::EmbeddingModel::AllMiniLML12V2),
        "all-minilm-l12-v2-q" | "allminilml12v2q" => {
            Ok(fastembed::EmbeddingModel::AllMiniLML12V2Q)
        }
        _ => Err(EmbeddingError::InvalidModel(format!(
            "Unknown model: {}. Supported models: all-MiniLM-L6-v2, all-MiniLM-L12-v2 (add -q suffix for quantized)",
            name
        ))),
    }
}

/// Runs a blocking load on a helper thread and waits for it with a timeout.
///
/// A load that times out stays in flight; the next [`ModelLoader::wait`]
/// picks up its result instead of starting another one.
pub struct ModelLoader<T> {
    pending: Mutex<Option<Receiver<Result<T, String>>>>,
}

impl<T: Send + 'static> ModelLoader<T> {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(None),
        }
    }

    pub fn wait<F>(&self, timeout: Duration, start: F) -> Result<T, EmbeddingError>
    where
        F: FnOnce() -> Result<T, String> + Send + 'static,
    {
        let mut pending = self.pending.lock().map_err(|e| {
            EmbeddingError::InitFailed(format!("Failed to acquire loader lock: {}", e))
        })?;

        let rx = match pending.take() {
            Some(rx) => {
                log::info!("waiting for the model load already in progress");
                rx
            }
            None => {
                let (tx, rx) = mpsc::channel();
                std::thread::spawn(move || {
                    let _ = tx.send(start());
                });
                rx
            }
        };

        match rx.recv_timeout(timeout) {
            Ok(result) => result.map_err(EmbeddingError::InitFailed),
            Err(RecvTimeoutError::Timeout) => {
                *pending = Some(rx);
                Err(EmbeddingError::DownloadTimeout(timeout.as_secs()))
            }
            Err(RecvTimeoutError::Disconnected) => Err(EmbeddingError::InitFailed(
                "model loader exited unexpectedly".to_string(),
            )),
        }
    }
}

impl<T: Send + 'static> Default for ModelLoader<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Loads a fastembed model into the given cache directory.
pub struct FastembedProvider {
    model_name: String,
    cache_dir: PathBuf,
    download_timeout: Duration,
    show_download_progress: bool,
    loader: ModelLoader<TextEmbedding>,
}

impl FastembedProvider {
    /// Models are cached in the `models/` subdirectory of `base_dir`.
    pub fn new(model_name: &str, base_dir: PathBuf, download_timeout: Duration) -> Self {
        Self {
            model_name: model_name.to_string(),
            cache_dir: base_dir.join("models"),
            download_timeout,
            show_download_progress: true,
            loader: ModelLoader::new(),
        }
    }

    pub fn with_download_progress(mut self, show: bool) -> Self {
        self.show_download_progress = show;
        self
    }
}

impl BackendProvider for FastembedProvider {
    fn load(&self) -> Result<Box<dyn EmbeddingBackend>, EmbeddingError> {
        let model_enum = parse_model_name(&self.model_name)?;

        std::fs::create_dir_all(&self.cache_dir).map_err(|e| {
            EmbeddingError::InitFailed(format!("Failed to create models directory: {}", e))
        })?;

        let options = InitOptions::new(model_enum)
            .with_cache_dir(self.cache_dir.clone())
            .with_show_download_progress(self.show_download_progress);

        // fastembed downloads synchronously
        let model = self.loader.wait(self.download_timeout, move || {
            TextEmbedding::try_new(options).map_err(|e| e.to_string())
        })?;

        let backend = FastembedBackend::new(model, &self.model_name)?;
        log::info!(
            "loaded embedding model '{}' ({} dimensions)",
            backend.name(),
            backend.dimensions()
        );

        Ok(Box::new(backend))
    }
}

/// Wrapper around fastembed's TextEmbedding model.
/// Uses a Mutex because fastembed's embed() requires &mut self.
pub struct FastembedBackend {
    model: Mutex<TextEmbedding>,
    model_name: String,
    dimensions: usize,
}

impl FastembedBackend {
    fn new(mut model: TextEmbedding, model_name: &str) -> Result<Self, EmbeddingError> {
        let dimensions = Self::probe_dimensions(&mut model)?;

        Ok(Self {
            model: Mutex::new(model),
            model_name: model_name.to_string(),
            dimensions,
        })
    }

    pub fn name(&self) -> &str {
        &self.model_name
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Probe the model to determine embedding dimensions.
    fn probe_dimensions(model: &mut TextEmbedding) -> Result<usize, EmbeddingError> {
        let test_embeddings = model
            .embed(vec!["test"], None)
            .map_err(|e| EmbeddingError::InitFailed(format!("Failed to probe dimensions: {}", e)))?;

        test_embeddings
            .first()
            .map(|v| v.len())
            .ok_or_else(|| EmbeddingError::InitFailed("Model returned no embedding".to_string()))
    }
}

impl EmbeddingBackend for FastembedBackend {
    fn embed(&self, text: &str, options: &EmbedOptions) -> Result<Embedding, EmbeddingError> {
        if options.pooling != Pooling::Mean {
            return Err(EmbeddingError::UnsupportedOptions(format!(
                "{:?} pooling",
                options.pooling
            )));
        }

        let mut model = self.model.lock().map_err(|e| {
            EmbeddingError::EmbeddingFailed(format!("Failed to acquire model lock: {}", e))
        })?;

        let mut embedding = model
            .embed(vec![text], None)
            .map_err(|e| EmbeddingError::EmbeddingFailed(e.to_string()))?
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::EmbeddingFailed("No embedding returned".to_string()))?;

        if options.normalize {
            l2_normalize(&mut embedding);
        }

        Ok(embedding)
    }
}
