//! Bytebeat expression synthesis, rendering and playback.
//!
//! Compiles short arithmetic expressions over an integer sample
//! counter `t` into audio, in three ways: streamed in real time
//! through the playback engine, rendered to WAV files by the batch
//! prerender worker, and played back from those pre-rendered assets
//! with a decode cache and live-synthesis fallback.
//!
//! # Features
//! - Expression compiler with JS-style integer coercion semantics
//! - Three output modes: `uint8` (classic bytebeat), `int8`, `float`
//! - Deterministic render signatures for cache invalidation
//! - Batch renderer with per-post timeout and fade envelopes
//! - Playback engine with non-reentrant toggle and waveform taps
//! - Session queue with clamped navigation and play tracking
//!
//! # Crate feature flags
//! - `streaming` (opt-in): System audio output (enables optional `rodio` dep)
//!
//! # Quick start
//! ## Render one expression to a WAV
//! ```no_run
//! use bytebeat::generator::{OutputMode, SampleGenerator};
//! use bytebeat::wav;
//!
//! let mut generator = SampleGenerator::compile("t*(t>>8&t>>13)", OutputMode::Uint8).unwrap();
//! let mut samples = vec![0.0f32; 8000 * 2];
//! generator.fill(0, &mut samples);
//! let bytes = wav::encode(&samples, &samples, 8000).unwrap();
//! std::fs::write("out.wav", bytes).unwrap();
//! ```
//!
//! ## Live playback
//! ```no_run
//! # #[cfg(feature = "streaming")]
//! # {
//! use std::sync::Arc;
//! use bytebeat::generator::OutputMode;
//! use bytebeat::io::DirAssetStore;
//! use bytebeat::playback::{AudioDevice, PlayRequest, PlaybackEngine};
//!
//! let assets = Arc::new(DirAssetStore::new("assets"));
//! let engine = PlaybackEngine::new(assets, None).unwrap();
//! let _device = AudioDevice::new(8000, 2, engine.ring()).unwrap();
//! engine.toggle(&PlayRequest {
//!     expression: "t>>4".into(),
//!     mode: OutputMode::Uint8,
//!     sample_rate: 8000,
//!     prerendered_url: None,
//!     asset_updated_at: None,
//! }).unwrap();
//! # }
//! ```

#![warn(missing_docs)]

pub mod expr; // Expression compiler and interpreter
pub mod generator; // Per-sample generation and quantization
pub mod io; // Storage and sink collaborators
pub mod playback; // Playback engine and audio output
pub mod render; // Batch prerender worker
pub mod session; // Playlist, favorites and play tracking
pub mod signature; // Render configuration signatures
pub mod wav; // WAV encode/decode

/// Error types for bytebeat operations
#[derive(thiserror::Error, Debug)]
pub enum BytebeatError {
    /// Expression failed to compile
    #[error("Compile error: {0}")]
    Compile(#[from] expr::CompileError),

    /// Fetching or decoding a pre-rendered asset failed
    #[error("Asset fetch error: {0}")]
    AssetFetch(String),

    /// Uploading a rendered asset failed
    #[error("Upload error: {0}")]
    Upload(String),

    /// Persisting metadata failed
    #[error("Persistence error: {0}")]
    Persist(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// WAV encoding failed
    #[error("WAV error: {0}")]
    Wav(String),

    /// Audio device error
    #[error("Audio device error: {0}")]
    Audio(String),

    /// IO error from filesystem or device
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for bytebeat operations
pub type Result<T> = std::result::Result<T, BytebeatError>;

// Public API exports
pub use expr::{CompileError, EvalError, Program};
pub use generator::{OutputMode, SampleGenerator, SAMPLE_RATES};
pub use playback::{PlayRequest, PlaybackEngine, PlaybackState, ToggleOutcome};
#[cfg(feature = "streaming")]
pub use playback::AudioDevice;
pub use render::{BatchRenderer, RenderOutcome, RenderWorkerConfig};
pub use session::{PlaybackSession, SessionEvent, Track};
pub use signature::{needs_rerender, signature, RenderConfig, RenderedAsset};
