//! Per-sample synthesis: compiled expression plus output-mode quantizer.
//!
//! A [`SampleGenerator`] is the single source of audio in the system. It
//! is consumed sample-by-sample in real time by the playback engine and
//! run to completion by the batch renderer. Its one hard invariant: the
//! mapping from raw expression result to signal is total. NaN, infinity
//! and per-call evaluation failures all resolve to silence (0.0), never
//! to a panic or an error crossing the audio boundary.

use serde::{Deserialize, Serialize};

use crate::expr::{CompileError, EvalError, EvalState, Program};

/// Sample-rate presets shared by live playback and pre-rendering.
pub const SAMPLE_RATES: [u32; 6] = [8000, 11025, 16000, 22050, 32000, 44100];

/// Whether `rate` is one of the supported presets.
pub fn is_supported_rate(rate: u32) -> bool {
    SAMPLE_RATES.contains(&rate)
}

/// How a raw numeric result is mapped into a normalized signal in [-1, 1].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    /// Value modulo 256, mapped via `(v - 128) / 128`
    Uint8,
    /// Value wrapped to [-128, 128), mapped via `v / 128`
    Int8,
    /// Value clamped directly to [-1, 1]
    Float,
}

impl OutputMode {
    /// Map a raw expression result to a signal sample.
    ///
    /// Total over all of f64: non-finite input is silence in every mode.
    pub fn quantize(self, raw: f64) -> f32 {
        if !raw.is_finite() {
            return 0.0;
        }
        match self {
            OutputMode::Uint8 => {
                let b = raw.floor().rem_euclid(256.0);
                ((b - 128.0) / 128.0) as f32
            }
            OutputMode::Int8 => {
                let b = (raw.floor() + 128.0).rem_euclid(256.0) - 128.0;
                (b / 128.0) as f32
            }
            OutputMode::Float => raw.clamp(-1.0, 1.0) as f32,
        }
    }
}

/// Callback invoked (at most once per generator) when per-sample
/// evaluation first fails, for UI diagnostics. Playback continues
/// regardless.
pub type RuntimeErrorSink = Box<dyn Fn(&EvalError) + Send + Sync>;

/// A compiled expression bound to an output mode.
pub struct SampleGenerator {
    program: Program,
    mode: OutputMode,
    state: EvalState,
    error_sink: Option<RuntimeErrorSink>,
    error_reported: bool,
}

impl SampleGenerator {
    /// Compile an expression for the given output mode.
    pub fn compile(expression: &str, mode: OutputMode) -> Result<Self, CompileError> {
        let program = Program::compile(expression)?;
        let state = program.new_state();
        Ok(SampleGenerator {
            program,
            mode,
            state,
            error_sink: None,
            error_reported: false,
        })
    }

    /// Install the out-of-band runtime diagnostics sink.
    pub fn set_error_sink(&mut self, sink: RuntimeErrorSink) {
        self.error_sink = Some(sink);
        self.error_reported = false;
    }

    /// Shrink or grow the evaluation fuel budget.
    pub fn set_fuel_budget(&mut self, budget: u64) {
        self.program = self.program.clone().with_fuel_budget(budget);
        self.state.set_fuel_budget(budget);
    }

    /// The output mode this generator quantizes with.
    pub fn mode(&self) -> OutputMode {
        self.mode
    }

    /// Produce the signal sample for integer sample index `t`.
    ///
    /// Never fails: evaluation errors are reported through the sink
    /// (first occurrence only) and mapped to silence.
    pub fn sample(&mut self, t: u64) -> f32 {
        match self.program.eval(t as f64, &mut self.state) {
            Ok(raw) => self.mode.quantize(raw),
            Err(err) => {
                if !self.error_reported {
                    self.error_reported = true;
                    if let Some(sink) = &self.error_sink {
                        sink(&err);
                    }
                }
                0.0
            }
        }
    }

    /// Fill `out` with consecutive samples starting at index `start_t`.
    pub fn fill(&mut self, start_t: u64, out: &mut [f32]) {
        for (i, slot) in out.iter_mut().enumerate() {
            *slot = self.sample(start_t + i as u64);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn quantize_is_total_in_every_mode() {
        let raws = [
            0.0,
            -0.0,
            1.0,
            -1.0,
            127.0,
            128.0,
            255.0,
            256.0,
            -129.0,
            1e18,
            -1e18,
            f64::NAN,
            f64::INFINITY,
            f64::NEG_INFINITY,
        ];
        for mode in [OutputMode::Uint8, OutputMode::Int8, OutputMode::Float] {
            for raw in raws {
                let s = mode.quantize(raw);
                assert!(s.is_finite(), "{mode:?} produced non-finite for {raw}");
                assert!((-1.0..=1.0).contains(&s), "{mode:?} out of band for {raw}");
            }
        }
    }

    #[test]
    fn uint8_mapping_anchors() {
        assert_eq!(OutputMode::Uint8.quantize(0.0), -1.0);
        assert_eq!(OutputMode::Uint8.quantize(128.0), 0.0);
        assert_eq!(OutputMode::Uint8.quantize(256.0), -1.0);
        assert!((OutputMode::Uint8.quantize(255.0) - 0.9921875).abs() < 1e-7);
    }

    #[test]
    fn int8_mapping_anchors() {
        assert_eq!(OutputMode::Int8.quantize(0.0), 0.0);
        assert_eq!(OutputMode::Int8.quantize(-128.0), -1.0);
        assert_eq!(OutputMode::Int8.quantize(128.0), -1.0); // wraps
        assert!((OutputMode::Int8.quantize(127.0) - 0.9921875).abs() < 1e-7);
    }

    #[test]
    fn float_mode_clamps() {
        assert_eq!(OutputMode::Float.quantize(3.5), 1.0);
        assert_eq!(OutputMode::Float.quantize(-3.5), -1.0);
        assert_eq!(OutputMode::Float.quantize(0.25), 0.25);
        assert_eq!(OutputMode::Float.quantize(f64::NAN), 0.0);
    }

    #[test]
    fn nonfinite_is_silence_not_error() {
        let mut generator = SampleGenerator::compile("1/0", OutputMode::Float).unwrap();
        assert_eq!(generator.sample(0), 0.0);
    }

    #[test]
    fn eval_failure_is_silence_and_reported_once() {
        let mut generator = SampleGenerator::compile("t+t+t+t", OutputMode::Uint8).unwrap();
        generator.set_fuel_budget(2);
        let count = Arc::new(AtomicUsize::new(0));
        let sink_count = Arc::clone(&count);
        generator.set_error_sink(Box::new(move |_| {
            sink_count.fetch_add(1, Ordering::SeqCst);
        }));

        let mut buf = [1.0f32; 64];
        generator.fill(0, &mut buf);
        assert!(buf.iter().all(|&s| s == 0.0));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn mode_serde_names_are_stable() {
        assert_eq!(serde_json::to_string(&OutputMode::Uint8).unwrap(), "\"uint8\"");
        assert_eq!(serde_json::to_string(&OutputMode::Int8).unwrap(), "\"int8\"");
        assert_eq!(serde_json::to_string(&OutputMode::Float).unwrap(), "\"float\"");
        let back: OutputMode = serde_json::from_str("\"float\"").unwrap();
        assert_eq!(back, OutputMode::Float);
    }

    #[test]
    fn supported_rates() {
        assert!(is_supported_rate(8000));
        assert!(is_supported_rate(44100));
        assert!(!is_supported_rate(44101));
    }
}
