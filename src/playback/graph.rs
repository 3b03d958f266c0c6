//! Gain staging and analyser tap for the playback graph.
//!
//! Models the node chain `source -> master gain -> fade gain -> output`
//! with a parallel analyser tap. Both gains apply multiplicatively and
//! independently: master gain is the durable user volume, fade gain is
//! ephemeral ducking.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

/// Size of the time-domain window exposed for visualization.
pub const ANALYSER_WINDOW: usize = 256;

struct Analyser {
    window: [f32; ANALYSER_WINDOW],
    pos: usize,
}

/// Shared gain and analyser state of the singleton playback graph.
pub struct GraphControls {
    // f32 bit patterns; gains are read on the audio path every chunk
    master_gain: AtomicU32,
    fade_gain: AtomicU32,
    analyser: Mutex<Analyser>,
}

impl GraphControls {
    /// New graph with the given initial master gain, fade gain at 1.
    pub fn new(master_gain: f32) -> Self {
        GraphControls {
            master_gain: AtomicU32::new(master_gain.clamp(0.0, 1.0).to_bits()),
            fade_gain: AtomicU32::new(1.0f32.to_bits()),
            analyser: Mutex::new(Analyser {
                window: [0.0; ANALYSER_WINDOW],
                pos: 0,
            }),
        }
    }

    /// Durable user volume, [0, 1].
    pub fn master_gain(&self) -> f32 {
        f32::from_bits(self.master_gain.load(Ordering::Relaxed))
    }

    /// Set the master gain, clamped to [0, 1].
    pub fn set_master_gain(&self, gain: f32) {
        self.master_gain
            .store(gain.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }

    /// Ephemeral ducking gain, [0, 1].
    pub fn fade_gain(&self) -> f32 {
        f32::from_bits(self.fade_gain.load(Ordering::Relaxed))
    }

    /// Set the fade gain, clamped to [0, 1]. Never persisted.
    pub fn set_fade_gain(&self, gain: f32) {
        self.fade_gain
            .store(gain.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }

    /// Combined output gain.
    pub fn gain(&self) -> f32 {
        self.master_gain() * self.fade_gain()
    }

    /// Feed post-gain samples into the analyser window.
    pub fn tap(&self, samples: &[f32]) {
        let mut analyser = self.analyser.lock();
        for &sample in samples {
            let pos = analyser.pos;
            analyser.window[pos] = sample;
            analyser.pos = (pos + 1) % ANALYSER_WINDOW;
        }
    }

    /// Snapshot the analyser window, oldest sample first.
    pub fn waveform(&self) -> [f32; ANALYSER_WINDOW] {
        let analyser = self.analyser.lock();
        let mut out = [0.0; ANALYSER_WINDOW];
        for (i, slot) in out.iter_mut().enumerate() {
            *slot = analyser.window[(analyser.pos + i) % ANALYSER_WINDOW];
        }
        out
    }

    /// Zero the analyser, so a later start doesn't show stale audio.
    pub fn clear_analyser(&self) {
        let mut analyser = self.analyser.lock();
        analyser.window = [0.0; ANALYSER_WINDOW];
        analyser.pos = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gains_clamp_and_multiply() {
        let controls = GraphControls::new(0.5);
        assert_eq!(controls.master_gain(), 0.5);
        assert_eq!(controls.fade_gain(), 1.0);
        assert_eq!(controls.gain(), 0.5);

        controls.set_fade_gain(0.5);
        assert_eq!(controls.gain(), 0.25);

        controls.set_master_gain(7.0);
        assert_eq!(controls.master_gain(), 1.0);
        controls.set_fade_gain(-1.0);
        assert_eq!(controls.fade_gain(), 0.0);
    }

    #[test]
    fn analyser_keeps_most_recent_window() {
        let controls = GraphControls::new(1.0);
        let first: Vec<f32> = (0..ANALYSER_WINDOW).map(|i| i as f32).collect();
        controls.tap(&first);
        controls.tap(&[99.0, 98.0]);

        let window = controls.waveform();
        // Oldest first: starts two in, ends with the late samples
        assert_eq!(window[0], 2.0);
        assert_eq!(window[ANALYSER_WINDOW - 2], 99.0);
        assert_eq!(window[ANALYSER_WINDOW - 1], 98.0);
    }

    #[test]
    fn clear_resets_window() {
        let controls = GraphControls::new(1.0);
        controls.tap(&[1.0; 64]);
        controls.clear_analyser();
        assert!(controls.waveform().iter().all(|&s| s == 0.0));
    }
}
