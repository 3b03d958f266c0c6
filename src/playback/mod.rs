//! In-process playback: engine, audio graph and device output.
//!
//! The engine ([`PlaybackEngine`]) owns path selection (pre-rendered
//! buffer vs. real-time synthesis), the two-gain graph, waveform
//! publishing and the play/stop state machine. The rodio output device
//! lives behind the `streaming` feature so headless deployments (the
//! prerender worker) don't link an audio backend.

#[cfg(feature = "streaming")]
mod device;
mod engine;
mod graph;
mod ring_buffer;

#[cfg(feature = "streaming")]
pub use device::AudioDevice;
pub use engine::{
    PlayRequest, PlaybackEngine, PlaybackState, SourcePath, ToggleOutcome, WaveformFrame,
};
pub use graph::{GraphControls, ANALYSER_WINDOW};
pub use ring_buffer::RingBuffer;
