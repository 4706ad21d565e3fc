//! Model Registry - discovers, verifies, loads and caches the active artifact
//!
//! Exactly one [`LoadedModel`] is active at a time. It is replaced as a
//! whole on the next successful load and is never partially updated.
//!
//! ## Concurrency
//! - Fresh cache hits only take a read lock.
//! - "check TTL -> reload -> install" runs under `reload_lock`, with the TTL
//!   re-checked after acquiring it, so concurrent misses reload once.

pub mod artifact;


use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Instant, SystemTime};

use chrono::{DateTime, Utc};
use globset::{Glob, GlobMatcher};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::config::RegistryConfig;

pub use artifact::{derive_version, hash_file, ArtifactBundle, REQUIRED_KEYS};

/// Model-type tag reported for every loaded artifact
pub const MODEL_TYPE: &str = "lead_conversion_classifier";

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("no artifact matching `{pattern}` in {}", dir.display())]
    NotFound { dir: PathBuf, pattern: String },

    #[error("artifact {} unreadable: {source}", path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("artifact {} corrupt: {reason}", path.display())]
    Corrupt { path: PathBuf, reason: String },

    #[error("invalid artifact pattern `{0}`")]
    InvalidPattern(String),
}

// ============================================================================
// DATA STRUCTURES
// ============================================================================

/// The active, verified model plus load metadata
#[derive(Debug)]
pub struct LoadedModel {
    pub bundle: ArtifactBundle,
    pub content_hash: String,
    pub version: String,
    pub artifact_path: PathBuf,
    pub model_type: &'static str,
    pub loaded_at: DateTime<Utc>,
    loaded_instant: Instant,
}

impl LoadedModel {
    pub fn age(&self) -> std::time::Duration {
        self.loaded_instant.elapsed()
    }

    pub fn feature_names(&self) -> &[String] {
        &self.bundle.feature_names
    }
}

/// A model handed out by the registry, with whether it came from cache
#[derive(Debug, Clone)]
pub struct ModelLease {
    pub model: Arc<LoadedModel>,
    pub cache_hit: bool,
}

/// Read-only snapshot of the cached model
#[derive(Debug, Clone, Serialize)]
pub struct ModelInfo {
    pub version: String,
    pub model_hash: String,
    pub model_type: String,
    pub predictor_kind: String,
    pub artifact_path: String,
    pub loaded_at: DateTime<Utc>,
    pub cache_age_secs: f64,
    pub cache_ttl_secs: u64,
    pub expired: bool,
    pub feature_count: usize,
    pub feature_names: Vec<String>,
    pub performance: BTreeMap<String, Value>,
    pub feature_importance: BTreeMap<String, f64>,
}

/// An artifact file on disk
#[derive(Debug, Clone, Serialize)]
pub struct ArtifactInfo {
    pub file_name: String,
    pub path: String,
    pub size_bytes: u64,
    pub modified_at: DateTime<Utc>,
    pub version: String,
    /// `None` when the file could not be hashed
    pub content_hash: Option<String>,
}

// ============================================================================
// REGISTRY
// ============================================================================

pub struct ModelRegistry {
    config: RegistryConfig,
    matcher: GlobMatcher,
    cache: RwLock<Option<Arc<LoadedModel>>>,
    reload_lock: Mutex<()>,
}

impl ModelRegistry {
    pub fn new(config: RegistryConfig) -> Result<Self, RegistryError> {
        let matcher = Glob::new(&config.pattern)
            .map_err(|e| RegistryError::InvalidPattern(format!("{}: {}", config.pattern, e)))?
            .compile_matcher();

        Ok(Self {
            config,
            matcher,
            cache: RwLock::new(None),
            reload_lock: Mutex::new(()),
        })
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Return the active model, reloading from disk when the cache is empty,
    /// expired, or `force` is set.
    pub fn load_active(&self, force: bool) -> Result<Arc<LoadedModel>, RegistryError> {
        self.acquire(force).map(|lease| lease.model)
    }

    /// Like [`load_active`](Self::load_active), also reporting cache hits
    pub fn acquire(&self, force: bool) -> Result<ModelLease, RegistryError> {
        if !force {
            if let Some(model) = self.fresh_cached() {
                return Ok(ModelLease { model, cache_hit: true });
            }
        }

        let _reload = self.reload_lock.lock();

        // Another request may have reloaded while this one waited
        if !force {
            if let Some(model) = self.fresh_cached() {
                return Ok(ModelLease { model, cache_hit: true });
            }
        }

        let model = Arc::new(self.load_from_disk()?);
        *self.cache.write() = Some(Arc::clone(&model));

        Ok(ModelLease {
            model,
            cache_hit: false,
        })
    }

    fn fresh_cached(&self) -> Option<Arc<LoadedModel>> {
        self.cache
            .read()
            .as_ref()
            .filter(|m| m.age() < self.config.cache_ttl)
            .cloned()
    }

    fn load_from_disk(&self) -> Result<LoadedModel, RegistryError> {
        let (path, modified) = self.find_latest().ok_or_else(|| RegistryError::NotFound {
            dir: self.config.model_dir.clone(),
            pattern: self.config.pattern.clone(),
        })?;

        tracing::info!(path = %path.display(), "Loading model artifact");

        let (bundle, content_hash) = ArtifactBundle::read_hashed(&path)?;
        let version = derive_version(&path, &self.config.version_prefix, modified);

        tracing::info!(
            version = %version,
            hash = %content_hash,
            predictor = bundle.predictor.kind(),
            features = bundle.feature_names.len(),
            "Model artifact loaded"
        );

        Ok(LoadedModel {
            bundle,
            content_hash,
            version,
            artifact_path: path,
            model_type: MODEL_TYPE,
            loaded_at: Utc::now(),
            loaded_instant: Instant::now(),
        })
    }

    /// Matching artifact files with their modification times
    fn matching_files(&self) -> Vec<(PathBuf, std::fs::Metadata)> {
        let entries = match std::fs::read_dir(&self.config.model_dir) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(dir = %self.config.model_dir.display(), error = %e, "Model directory unreadable");
                return Vec::new();
            }
        };

        entries
            .filter_map(Result::ok)
            .filter(|entry| self.matcher.is_match(entry.file_name()))
            .filter_map(|entry| {
                let metadata = std::fs::metadata(entry.path()).ok()?;
                metadata.is_file().then(|| (entry.path(), metadata))
            })
            .collect()
    }

    /// Most recently modified matching artifact
    fn find_latest(&self) -> Option<(PathBuf, SystemTime)> {
        self.matching_files()
            .into_iter()
            .filter_map(|(path, metadata)| metadata.modified().ok().map(|m| (path, m)))
            .max_by(|(pa, ma), (pb, mb)| ma.cmp(mb).then_with(|| pa.cmp(pb)))
    }

    /// Snapshot of the cached model; never triggers a load
    pub fn get_model_info(&self) -> Option<ModelInfo> {
        let cache = self.cache.read();
        let model = cache.as_ref()?;
        let age = model.age();

        Some(ModelInfo {
            version: model.version.clone(),
            model_hash: model.content_hash.clone(),
            model_type: model.model_type.to_string(),
            predictor_kind: model.bundle.predictor.kind().to_string(),
            artifact_path: model.artifact_path.display().to_string(),
            loaded_at: model.loaded_at,
            cache_age_secs: age.as_secs_f64(),
            cache_ttl_secs: self.config.cache_ttl.as_secs(),
            expired: age >= self.config.cache_ttl,
            feature_count: model.bundle.feature_names.len(),
            feature_names: model.bundle.feature_names.clone(),
            performance: model.bundle.performance.clone(),
            feature_importance: model.bundle.feature_importance.clone(),
        })
    }

    /// Every matching artifact on disk, newest first, independent of the cache
    pub fn list_available_models(&self) -> Vec<ArtifactInfo> {
        let mut artifacts: Vec<ArtifactInfo> = self
            .matching_files()
            .into_iter()
            .map(|(path, metadata)| {
                let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
                let content_hash = match hash_file(&path) {
                    Ok(hash) => Some(hash),
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "Failed to hash artifact");
                        None
                    }
                };

                ArtifactInfo {
                    file_name: path
                        .file_name()
                        .map(|n| n.to_string_lossy().to_string())
                        .unwrap_or_default(),
                    path: path.display().to_string(),
                    size_bytes: metadata.len(),
                    modified_at: DateTime::<Utc>::from(modified),
                    version: derive_version(&path, &self.config.version_prefix, modified),
                    content_hash,
                }
            })
            .collect();

        artifacts.sort_by(|a, b| b.modified_at.cmp(&a.modified_at).then_with(|| b.file_name.cmp(&a.file_name)));
        artifacts
    }

    /// Best-effort check that an artifact (default: the latest) loads and
    /// exposes both predictor capabilities. Does not touch the cache.
    ///
    /// Relative paths resolve inside the model directory. The target must
    /// stay inside that directory after resolving links, match the artifact
    /// pattern and be a regular file; anything else is reported invalid.
    pub fn validate_model_integrity(&self, path: Option<&Path>) -> bool {
        let target = match path {
            Some(p) => match self.confine(p) {
                Some(target) => target,
                None => return false,
            },
            None => match self.find_latest() {
                Some((p, _)) => p,
                None => {
                    tracing::warn!("No artifact available to validate");
                    return false;
                }
            },
        };

        match ArtifactBundle::from_file(&target) {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(error = %e, "Artifact failed integrity validation");
                false
            }
        }
    }

    /// Resolve a caller-supplied artifact path to a canonical path inside
    /// the model directory, or `None` when it escapes or is not an artifact.
    fn confine(&self, requested: &Path) -> Option<PathBuf> {
        let joined = self.config.model_dir.join(requested);

        let dir = match self.config.model_dir.canonicalize() {
            Ok(dir) => dir,
            Err(e) => {
                tracing::warn!(dir = %self.config.model_dir.display(), error = %e, "Model directory unreadable");
                return None;
            }
        };
        let target = match joined.canonicalize() {
            Ok(target) => target,
            Err(e) => {
                tracing::warn!(path = %requested.display(), error = %e, "Artifact to validate not found");
                return None;
            }
        };

        if !target.starts_with(&dir) {
            tracing::warn!(path = %requested.display(), "Artifact path outside model directory");
            return None;
        }
        let named_as_artifact = target
            .file_name()
            .map(|name| self.matcher.is_match(name))
            .unwrap_or(false);
        if !named_as_artifact {
            tracing::warn!(path = %requested.display(), pattern = %self.config.pattern, "Path does not match artifact pattern");
            return None;
        }
        if !std::fs::metadata(&target).map(|m| m.is_file()).unwrap_or(false) {
            tracing::warn!(path = %requested.display(), "Artifact path is not a regular file");
            return None;
        }

        Some(target)
    }

    /// Drop the cached model; the next `load_active` reads from disk
    pub fn clear_cache(&self) {
        let _reload = self.reload_lock.lock();
        *self.cache.write() = None;
        tracing::info!("Model cache cleared");
    }

    pub fn is_loaded(&self) -> bool {
        self.cache.read().is_some()
    }
}
