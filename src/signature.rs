//! Render-configuration fingerprinting for pre-render cache invalidation.
//!
//! The signature is a SHA-256 over the canonical JSON serialization of
//! the four render inputs. It is intentionally coarse: any change to
//! expression, mode, rate or duration forces a full re-render, and it
//! fingerprints configuration rather than output bytes so expressions
//! using `random()` stay cacheable.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::generator::{is_supported_rate, OutputMode};
use crate::{BytebeatError, Result};

/// The full configuration of one pre-render. Pure value type; its hash
/// is the render signature. Field order is the canonical serialization
/// order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderConfig {
    /// Expression source text
    pub expression: String,
    /// Output quantization mode
    pub mode: OutputMode,
    /// Sample rate in Hz (must be a supported preset)
    pub sample_rate: u32,
    /// Render length in seconds
    pub duration_seconds: f64,
}

impl RenderConfig {
    /// Build a validated config.
    pub fn new(
        expression: impl Into<String>,
        mode: OutputMode,
        sample_rate: u32,
        duration_seconds: f64,
    ) -> Result<Self> {
        if !is_supported_rate(sample_rate) {
            return Err(BytebeatError::Config(format!(
                "unsupported sample rate {sample_rate} Hz"
            )));
        }
        if !duration_seconds.is_finite() || duration_seconds <= 0.0 {
            return Err(BytebeatError::Config(format!(
                "invalid render duration {duration_seconds}"
            )));
        }
        Ok(RenderConfig {
            expression: expression.into(),
            mode,
            sample_rate,
            duration_seconds,
        })
    }

    /// Total number of mono samples this config renders.
    pub fn total_samples(&self) -> usize {
        (self.duration_seconds * self.sample_rate as f64).round() as usize
    }
}

/// A completed pre-render as persisted against a post.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderedAsset {
    /// Signature of the config that produced this asset
    pub signature: String,
    /// Rendered duration in seconds
    pub duration_seconds: f64,
    /// Public URL of the uploaded WAV
    pub audio_url: String,
}

/// Lowercase-hex SHA-256 of the canonical serialization of `config`.
pub fn signature(config: &RenderConfig) -> Result<String> {
    let canonical = serde_json::to_vec(config)
        .map_err(|e| BytebeatError::Config(format!("unserializable render config: {e}")))?;
    let digest = Sha256::digest(&canonical);
    let mut hex = String::with_capacity(digest.len() * 2);
    for byte in digest {
        hex.push_str(&format!("{byte:02x}"));
    }
    Ok(hex)
}

/// True if there is no asset for this post yet, or its signature no
/// longer matches the current config. The sole cache-invalidation
/// mechanism for pre-renders.
pub fn needs_rerender(asset: Option<&RenderedAsset>, config: &RenderConfig) -> Result<bool> {
    match asset {
        None => Ok(true),
        Some(asset) => Ok(asset.signature != signature(config)?),
    }
}
