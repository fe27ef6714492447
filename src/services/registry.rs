//! On-disk store of trained artifacts.
//!
//! Layout: `<root>/<SYMBOL>/<kind>/{predictor.json, scaler_x.json,
//! scaler_y.json, metadata.json}`. A publish writes a hidden sibling directory
//! and renames it into place. Replacing a directory takes two renames, so
//! the swap holds the store's write lock and every read holds the read lock:
//! readers see either the previous artifact or the new one in full.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{ForecastError, Result, Stage};
use crate::services::cache::Cache;
use crate::services::predictor::{PredictorKind, PredictorState};
use crate::services::scaler::Scaler;
use crate::types::{Metrics, ModelMetadata};

const PREDICTOR_FILE: &str = "predictor.json";
const INPUT_SCALER_FILE: &str = "scaler_x.json";
const TARGET_SCALER_FILE: &str = "scaler_y.json";
const METADATA_FILE: &str = "metadata.json";

/// Everything needed to run inference for one trained model.
#[derive(Debug, Clone)]
pub struct ModelArtifact {
    pub predictor: PredictorState,
    pub input_scaler: Scaler,
    pub target_scaler: Scaler,
    pub metadata: ModelMetadata,
}

impl ModelArtifact {
    /// Check that the parts agree on their dimensions.
    pub fn validate(&self) -> Result<()> {
        let symbol = &self.metadata.symbol;
        let columns = self.metadata.feature_columns.len();
        let fail = |msg: String| Err(ForecastError::shape(symbol, Stage::Persistence, msg));

        if self.predictor.kind != self.metadata.model_type {
            return fail(format!(
                "predictor is {} but metadata says {}",
                self.predictor.kind, self.metadata.model_type
            ));
        }
        if self.predictor.spec.n_features != columns {
            return fail(format!(
                "predictor expects {} features, metadata lists {}",
                self.predictor.spec.n_features, columns
            ));
        }
        if self.predictor.spec.sequence_length != self.metadata.sequence_length {
            return fail(format!(
                "predictor sequence length {} differs from metadata {}",
                self.predictor.spec.sequence_length, self.metadata.sequence_length
            ));
        }
        if self.input_scaler.n_features() != Some(columns) {
            return fail(format!(
                "input scaler fitted on {:?} columns, metadata lists {}",
                self.input_scaler.n_features(),
                columns
            ));
        }
        if self.target_scaler.n_features() != Some(1) {
            return fail("target scaler must have exactly one column".to_string());
        }
        Ok(())
    }
}

/// Metadata-only view used for listings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelSummary {
    pub symbol: String,
    pub model_type: PredictorKind,
    pub version: String,
    pub trained_at: DateTime<Utc>,
    pub sequence_length: usize,
    pub horizon_steps: usize,
    pub feature_count: usize,
    pub metrics: Option<Metrics>,
    pub path: String,
}

impl ModelSummary {
    fn from_metadata(meta: &ModelMetadata, path: &Path) -> Self {
        Self {
            symbol: meta.symbol.clone(),
            model_type: meta.model_type,
            version: meta.version.clone(),
            trained_at: meta.trained_at,
            sequence_length: meta.sequence_length,
            horizon_steps: meta.horizon_steps,
            feature_count: meta.feature_columns.len(),
            metrics: meta.metrics,
            path: path.display().to_string(),
        }
    }
}

/// Uppercase a symbol and refuse anything that is not a plain identifier.
pub fn normalize_symbol(symbol: &str) -> Result<String> {
    let s = symbol.trim().to_ascii_uppercase();
    if s.is_empty() || !s.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
        return Err(ForecastError::BadRequest(format!("invalid symbol '{}'", symbol)));
    }
    Ok(s)
}

pub struct ArtifactStore {
    root: PathBuf,
    cache: Cache<Arc<ModelArtifact>>,
    swap: RwLock<()>,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>, ttl: Duration, max_cached: usize) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            cache: Cache::new(ttl, max_cached),
            swap: RwLock::new(()),
        })
    }

    fn read_lock(&self) -> Result<RwLockReadGuard<'_, ()>> {
        self.swap
            .read()
            .map_err(|_| ForecastError::Internal("artifact store lock poisoned".to_string()))
    }

    fn write_lock(&self) -> Result<RwLockWriteGuard<'_, ()>> {
        self.swap
            .write()
            .map_err(|_| ForecastError::Internal("artifact store lock poisoned".to_string()))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn artifact_dir(&self, symbol: &str, kind: PredictorKind) -> Result<PathBuf> {
        Ok(self.root.join(normalize_symbol(symbol)?).join(kind.as_str()))
    }

    fn cache_key(symbol: &str, kind: PredictorKind) -> String {
        format!("{}/{}", symbol, kind)
    }

    /// Write `artifact` and make it visible in one rename. Replaces any
    /// existing artifact of the same symbol and kind.
    pub fn publish(&self, artifact: &ModelArtifact) -> Result<PathBuf> {
        artifact.validate()?;
        let symbol = normalize_symbol(&artifact.metadata.symbol)?;
        let kind = artifact.metadata.model_type;
        let symbol_dir = self.root.join(&symbol);
        fs::create_dir_all(&symbol_dir)?;

        let staging = symbol_dir.join(format!(".tmp-{}", Uuid::new_v4()));
        if let Err(e) = Self::write_files(&symbol, artifact, &staging) {
            let _ = fs::remove_dir_all(&staging);
            return Err(e);
        }

        let target = symbol_dir.join(kind.as_str());
        let guard = self.write_lock()?;
        let swapped = if target.exists() {
            let retired = symbol_dir.join(format!(".old-{}", Uuid::new_v4()));
            fs::rename(&target, &retired)?;
            Some(retired)
        } else {
            None
        };
        if let Err(e) = fs::rename(&staging, &target) {
            if let Some(retired) = &swapped {
                let _ = fs::rename(retired, &target);
            }
            let _ = fs::remove_dir_all(&staging);
            return Err(e.into());
        }
        self.cache.remove(&Self::cache_key(&symbol, kind));
        drop(guard);

        if let Some(retired) = swapped {
            if let Err(e) = fs::remove_dir_all(&retired) {
                warn!("failed to remove retired artifact {}: {}", retired.display(), e);
            }
        }
        info!("published {} artifact for {} at {}", kind, symbol, target.display());
        Ok(target)
    }

    fn write_files(symbol: &str, artifact: &ModelArtifact, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)?;
        fs::write(dir.join(PREDICTOR_FILE), serde_json::to_vec(&artifact.predictor)?)?;
        artifact
            .input_scaler
            .save(&dir.join(INPUT_SCALER_FILE))
            .map_err(|e| e.at(symbol, Stage::Persistence))?;
        artifact
            .target_scaler
            .save(&dir.join(TARGET_SCALER_FILE))
            .map_err(|e| e.at(symbol, Stage::Persistence))?;
        // metadata last: its presence marks a finished directory
        fs::write(
            dir.join(METADATA_FILE),
            serde_json::to_vec_pretty(&artifact.metadata)?,
        )?;
        Ok(())
    }

    /// Load one artifact, from cache when possible.
    pub fn load(&self, symbol: &str, kind: PredictorKind) -> Result<Arc<ModelArtifact>> {
        let symbol = normalize_symbol(symbol)?;
        let key = Self::cache_key(&symbol, kind);
        if let Some(hit) = self.cache.get(&key) {
            return Ok(hit);
        }

        let _guard = self.read_lock()?;
        let artifact = Arc::new(self.read_published(&symbol, kind)?);
        self.cache.insert(key, Arc::clone(&artifact));
        debug!("loaded {} artifact for {}", kind, symbol);
        Ok(artifact)
    }

    /// Read an artifact from disk. Callers hold the read lock.
    fn read_published(&self, symbol: &str, kind: PredictorKind) -> Result<ModelArtifact> {
        let dir = self.root.join(symbol).join(kind.as_str());
        if !dir.join(METADATA_FILE).exists() {
            return Err(ForecastError::NotFound(format!("{} model for {}", kind, symbol)));
        }
        Self::read_files(symbol, &dir)
    }

    fn read_files(symbol: &str, dir: &Path) -> Result<ModelArtifact> {
        let corrupt = |what: &str, e: String| {
            ForecastError::data(symbol, Stage::Persistence, format!("corrupt {}: {}", what, e))
        };
        let predictor: PredictorState =
            serde_json::from_slice(&fs::read(dir.join(PREDICTOR_FILE))?)
                .map_err(|e| corrupt(PREDICTOR_FILE, e.to_string()))?;
        let input_scaler = Scaler::load(&dir.join(INPUT_SCALER_FILE))
            .map_err(|e| corrupt(INPUT_SCALER_FILE, e.to_string()))?;
        let target_scaler = Scaler::load(&dir.join(TARGET_SCALER_FILE))
            .map_err(|e| corrupt(TARGET_SCALER_FILE, e.to_string()))?;
        let metadata: ModelMetadata = serde_json::from_slice(&fs::read(dir.join(METADATA_FILE))?)
            .map_err(|e| corrupt(METADATA_FILE, e.to_string()))?;

        let artifact = ModelArtifact {
            predictor,
            input_scaler,
            target_scaler,
            metadata,
        };
        artifact.validate()?;
        Ok(artifact)
    }

    /// Kinds with a published artifact for `symbol`.
    pub fn kinds(&self, symbol: &str) -> Result<Vec<PredictorKind>> {
        let dir = self.root.join(normalize_symbol(symbol)?);
        let _guard = self.read_lock()?;
        Ok(PredictorKind::ALL
            .into_iter()
            .filter(|kind| dir.join(kind.as_str()).join(METADATA_FILE).exists())
            .collect())
    }

    /// Every published artifact for `symbol`, each loaded independently.
    pub fn load_all(&self, symbol: &str) -> Result<Vec<(PredictorKind, Result<Arc<ModelArtifact>>)>> {
        Ok(self
            .kinds(symbol)?
            .into_iter()
            .map(|kind| (kind, self.load(symbol, kind)))
            .collect())
    }

    /// Metadata of every published artifact, newest first.
    pub fn list_all(&self) -> Result<Vec<ModelSummary>> {
        let mut out = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') || !entry.file_type()?.is_dir() {
                continue;
            }
            out.extend(self.list_symbol(&name)?);
        }
        out.sort_by(|a, b| b.trained_at.cmp(&a.trained_at));
        Ok(out)
    }

    /// Metadata of every published artifact for one symbol.
    pub fn list_symbol(&self, symbol: &str) -> Result<Vec<ModelSummary>> {
        let symbol = normalize_symbol(symbol)?;
        let mut out = Vec::new();
        for kind in self.kinds(&symbol)? {
            let dir = self.root.join(&symbol).join(kind.as_str());
            let raw = {
                let _guard = self.read_lock()?;
                match fs::read(dir.join(METADATA_FILE)) {
                    Ok(raw) => raw,
                    // deleted since kinds() looked
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                    Err(e) => return Err(e.into()),
                }
            };
            match serde_json::from_slice::<ModelMetadata>(&raw) {
                Ok(meta) => out.push(ModelSummary::from_metadata(&meta, &dir)),
                Err(e) => warn!("skipping unreadable metadata in {}: {}", dir.display(), e),
            }
        }
        Ok(out)
    }

    /// Remove every artifact for `symbol`. Returns how many were removed.
    pub fn delete(&self, symbol: &str) -> Result<usize> {
        let symbol = normalize_symbol(symbol)?;
        let removed = self.kinds(&symbol)?.len();
        let dir = self.root.join(&symbol);
        let _guard = self.write_lock()?;
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
        }
        self.cache.remove_prefix(&format!("{}/", symbol));
        info!("deleted {} artifacts for {}", removed, symbol);
        Ok(removed)
    }
}
