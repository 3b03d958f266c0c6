//! Narrow interfaces to the system's external collaborators.
//!
//! Persistence, object storage, play analytics and favorites are
//! ordinary CRUD owned by other services; the synthesis core only ever
//! talks to them through these traits. The crate ships a filesystem
//! implementation (`fs`) suitable for the worker binary and tests; real
//! deployments plug in their own.

pub mod fs;

pub use fs::{DirAssetStore, JsonGainStore, JsonPostStore};

use serde::{Deserialize, Serialize};

use crate::generator::OutputMode;
use crate::signature::RenderedAsset;
use crate::Result;

/// One post row as the renderer sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostRow {
    /// Post identifier
    pub id: u64,
    /// Expression source text
    pub expression: String,
    /// Output mode
    pub mode: OutputMode,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Drafts are skipped by the renderer
    #[serde(default)]
    pub is_draft: bool,
    /// Signature of the last successful pre-render, if any
    #[serde(default)]
    pub prerender_signature: Option<String>,
    /// Duration of the last successful pre-render, if any
    #[serde(default)]
    pub prerender_duration: Option<f64>,
    /// Public URL of the last uploaded WAV, if any
    #[serde(default)]
    pub sample_url: Option<String>,
}

impl PostRow {
    /// The persisted asset record, if this row has one.
    pub fn asset(&self) -> Option<RenderedAsset> {
        match (&self.prerender_signature, &self.sample_url) {
            (Some(signature), Some(url)) => Some(RenderedAsset {
                signature: signature.clone(),
                duration_seconds: self.prerender_duration.unwrap_or(0.0),
                audio_url: url.clone(),
            }),
            _ => None,
        }
    }
}

/// Relational persistence for posts (external collaborator).
pub trait PostStore: Send + Sync {
    /// Fetch up to `limit` non-draft posts that have no asset or are
    /// flagged for re-render.
    fn fetch_render_candidates(&self, limit: usize) -> Result<Vec<PostRow>>;

    /// Persist signature/URL/duration after a successful render.
    fn mark_rendered(&self, post_id: u64, asset: &RenderedAsset) -> Result<()>;
}

/// Binary object storage keyed by `<postId>.wav` (external collaborator).
pub trait AssetStore: Send + Sync {
    /// Store `bytes` under `key` with the given content type and return
    /// the public URL.
    fn put(&self, key: &str, content_type: &str, bytes: &[u8]) -> Result<String>;
}

/// Read side of the asset store, used by the playback engine's
/// pre-rendered path.
pub trait AssetFetcher: Send + Sync {
    /// Fetch the raw bytes behind a public URL.
    fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

/// A recorded listen, for play-time analytics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayEvent {
    /// The post that was played
    pub post_id: u64,
    /// Whole seconds listened
    pub duration_seconds: u64,
    /// Listening user, if authenticated
    pub user_id: Option<u64>,
}

/// Play-event sink (external collaborator). Fire-and-forget: callers
/// swallow failures; tracking must never block or crash playback.
pub trait PlayEventSink: Send + Sync {
    /// Record one finished listen.
    fn record(&self, event: PlayEvent) -> Result<()>;
}

/// Favorite-state sink (external collaborator): insert/delete of a
/// `(user, post)` pair.
pub trait FavoriteSink: Send + Sync {
    /// Insert (`favorited`) or delete the pair.
    fn set_favorite(&self, user_id: u64, post_id: u64, favorited: bool) -> Result<()>;
}

/// Durable storage for the user's master gain setting.
pub trait GainStore: Send + Sync {
    /// Read the stored gain, if any.
    fn load(&self) -> Option<f32>;
    /// Persist a new gain value.
    fn save(&self, gain: f32) -> Result<()>;
}
