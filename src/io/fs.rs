//! Filesystem-backed implementations of the external interfaces.
//!
//! `JsonPostStore` keeps post rows in a single JSON file and rewrites it
//! on every write-back; `DirAssetStore` writes WAVs into a directory and
//! hands back plain paths as URLs. Enough for the standalone worker
//! binary and integration tests; production systems substitute their
//! own backends.

use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::warn;

use super::{AssetFetcher, AssetStore, GainStore, PostRow, PostStore};
use crate::signature::{needs_rerender, RenderConfig, RenderedAsset};
use crate::{BytebeatError, Result};

/// Post store over a JSON array of [`PostRow`]s.
pub struct JsonPostStore {
    path: PathBuf,
    /// Render length applied to every candidate, used for the
    /// needs-rerender check at fetch time.
    duration_seconds: f64,
    lock: Mutex<()>,
}

impl JsonPostStore {
    /// Store over the JSON file at `path`.
    pub fn new(path: impl Into<PathBuf>, duration_seconds: f64) -> Self {
        JsonPostStore {
            path: path.into(),
            duration_seconds,
            lock: Mutex::new(()),
        }
    }

    fn read_rows(&self) -> Result<Vec<PostRow>> {
        let data = fs::read(&self.path)?;
        serde_json::from_slice(&data)
            .map_err(|e| BytebeatError::Persist(format!("malformed post file: {e}")))
    }

    fn write_rows(&self, rows: &[PostRow]) -> Result<()> {
        let data = serde_json::to_vec_pretty(rows)
            .map_err(|e| BytebeatError::Persist(format!("unserializable post rows: {e}")))?;
        fs::write(&self.path, data)?;
        Ok(())
    }
}

impl PostStore for JsonPostStore {
    fn fetch_render_candidates(&self, limit: usize) -> Result<Vec<PostRow>> {
        let _guard = self.lock.lock();
        let rows = self.read_rows()?;
        let mut candidates = Vec::new();
        for row in rows {
            if row.is_draft {
                continue;
            }
            // One malformed row must not starve the rest of the batch.
            let config = match RenderConfig::new(
                row.expression.clone(),
                row.mode,
                row.sample_rate,
                self.duration_seconds,
            ) {
                Ok(config) => config,
                Err(err) => {
                    warn!(post_id = row.id, error = %err, "skipping post with invalid render config");
                    continue;
                }
            };
            if needs_rerender(row.asset().as_ref(), &config)? {
                candidates.push(row);
                if candidates.len() == limit {
                    break;
                }
            }
        }
        Ok(candidates)
    }

    fn mark_rendered(&self, post_id: u64, asset: &RenderedAsset) -> Result<()> {
        let _guard = self.lock.lock();
        let mut rows = self.read_rows()?;
        let row = rows
            .iter_mut()
            .find(|r| r.id == post_id)
            .ok_or_else(|| BytebeatError::Persist(format!("unknown post {post_id}")))?;
        row.prerender_signature = Some(asset.signature.clone());
        row.prerender_duration = Some(asset.duration_seconds);
        row.sample_url = Some(asset.audio_url.clone());
        self.write_rows(&rows)
    }
}

/// Asset store writing objects into a directory.
pub struct DirAssetStore {
    root: PathBuf,
}

impl DirAssetStore {
    /// Store rooted at `root`; created on first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        DirAssetStore { root: root.into() }
    }
}

impl AssetStore for DirAssetStore {
    fn put(&self, key: &str, _content_type: &str, bytes: &[u8]) -> Result<String> {
        fs::create_dir_all(&self.root)
            .map_err(|e| BytebeatError::Upload(format!("cannot create asset dir: {e}")))?;
        let path = self.root.join(key);
        fs::write(&path, bytes)
            .map_err(|e| BytebeatError::Upload(format!("cannot write asset {key}: {e}")))?;
        Ok(path.to_string_lossy().into_owned())
    }
}

impl AssetFetcher for DirAssetStore {
    fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        // URLs handed out by `put` are plain paths.
        fs::read(Path::new(url))
            .map_err(|e| BytebeatError::AssetFetch(format!("cannot read asset {url}: {e}")))
    }
}

/// Master-gain persistence in a small JSON file.
pub struct JsonGainStore {
    path: PathBuf,
}

impl JsonGainStore {
    /// Store over the JSON file at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        JsonGainStore { path: path.into() }
    }
}

impl GainStore for JsonGainStore {
    fn load(&self) -> Option<f32> {
        let data = fs::read(&self.path).ok()?;
        serde_json::from_slice::<f32>(&data)
            .ok()
            .map(|g| g.clamp(0.0, 1.0))
    }

    fn save(&self, gain: f32) -> Result<()> {
        let data = serde_json::to_vec(&gain)
            .map_err(|e| BytebeatError::Persist(format!("unserializable gain: {e}")))?;
        fs::write(&self.path, data)?;
        Ok(())
    }
}
