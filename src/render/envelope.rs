//! Fade envelope for pre-rendered buffers.

/// Apply a linear fade-in over the first `fade_in` seconds and a linear
/// fade-out over the last `fade_out` seconds, multiplying the signal in
/// place. Fade lengths are clamped to the buffer bounds, so short
/// buffers still get a monotone ramp at each end.
pub fn apply_fade(samples: &mut [f32], fade_in: f64, fade_out: f64, sample_rate: u32) {
    let len = samples.len();
    if len == 0 {
        return;
    }

    let fade_in_len = ((fade_in * sample_rate as f64) as usize).min(len);
    for i in 0..fade_in_len {
        samples[i] *= i as f32 / fade_in_len as f32;
    }

    let fade_out_len = ((fade_out * sample_rate as f64) as usize).min(len);
    for i in 0..fade_out_len {
        samples[len - fade_out_len + i] *= (fade_out_len - i) as f32 / fade_out_len as f32;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fade_in_starts_at_zero() {
        let mut samples = vec![1.0f32; 1000];
        apply_fade(&mut samples, 0.05, 0.0, 8000);
        assert_eq!(samples[0], 0.0);
        assert!(samples[200] < 1.0);
        assert_eq!(samples[400], 1.0);
        assert_eq!(samples[999], 1.0);
    }

    #[test]
    fn fade_out_ends_near_zero() {
        let mut samples = vec![1.0f32; 1000];
        apply_fade(&mut samples, 0.0, 0.05, 8000);
        assert_eq!(samples[0], 1.0);
        assert!(samples[999] < 0.01);
        let tail = &samples[600..];
        for pair in tail.windows(2) {
            assert!(pair[1] <= pair[0], "fade-out must be monotone");
        }
    }

    #[test]
    fn fades_clamp_to_short_buffers() {
        let mut samples = vec![1.0f32; 8];
        // 1 s fades on an 8-sample buffer must not panic or overrun
        apply_fade(&mut samples, 1.0, 1.0, 8000);
        assert!(samples.iter().all(|s| (0.0..=1.0).contains(s)));
    }

    #[test]
    fn empty_buffer_is_a_no_op() {
        let mut samples: Vec<f32> = Vec::new();
        apply_fade(&mut samples, 0.05, 0.1, 8000);
    }
}
