//! In-memory stereo WAV encoding and decoding.
//!
//! The encoder is the one bit-exact external boundary of the system:
//! a standard 44-byte RIFF/WAVE header (PCM, 16-bit, 2 channels)
//! followed by interleaved little-endian samples. Any standard decoder
//! must parse the output without error.

use std::io::Cursor;

use crate::{BytebeatError, Result};

/// Size of the RIFF/WAVE header emitted for PCM 16-bit stereo.
pub const WAV_HEADER_BYTES: usize = 44;

/// Encode two equal-length channels into a complete WAV file in memory.
///
/// Samples outside [-1, 1] are clamped during 16-bit quantization.
pub fn encode(left: &[f32], right: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    if left.len() != right.len() {
        return Err(BytebeatError::Wav(format!(
            "channel length mismatch: left {} vs right {}",
            left.len(),
            right.len()
        )));
    }

    let spec = hound::WavSpec {
        channels: 2,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::with_capacity(
        WAV_HEADER_BYTES + left.len() * 2 * std::mem::size_of::<i16>(),
    ));
    let mut writer = hound::WavWriter::new(&mut cursor, spec)
        .map_err(|e| BytebeatError::Wav(format!("failed to start WAV stream: {e}")))?;

    for (&l, &r) in left.iter().zip(right.iter()) {
        writer
            .write_sample(quantize_i16(l))
            .and_then(|_| writer.write_sample(quantize_i16(r)))
            .map_err(|e| BytebeatError::Wav(format!("failed to write sample: {e}")))?;
    }

    writer
        .finalize()
        .map_err(|e| BytebeatError::Wav(format!("failed to finalize WAV stream: {e}")))?;

    Ok(cursor.into_inner())
}

/// Decode a WAV file into a mono f32 signal plus its sample rate.
///
/// Multi-channel input is averaged down to mono; the playback engine
/// duplicates it back to stereo on output. Used for the pre-rendered
/// asset path.
pub fn decode_mono(bytes: &[u8]) -> Result<(Vec<f32>, u32)> {
    let mut reader = hound::WavReader::new(Cursor::new(bytes))
        .map_err(|e| BytebeatError::AssetFetch(format!("undecodable WAV: {e}")))?;
    let spec = reader.spec();
    if spec.channels == 0 {
        return Err(BytebeatError::AssetFetch("WAV with zero channels".into()));
    }

    let channels = spec.channels as usize;
    let scale = 1.0 / i16::MAX as f32;
    let mut mono = Vec::with_capacity(reader.len() as usize / channels);

    match spec.sample_format {
        hound::SampleFormat::Int => {
            let mut frame_sum = 0.0f32;
            let mut in_frame = 0usize;
            for sample in reader.samples::<i16>() {
                let s = sample
                    .map_err(|e| BytebeatError::AssetFetch(format!("undecodable WAV: {e}")))?;
                frame_sum += s as f32 * scale;
                in_frame += 1;
                if in_frame == channels {
                    mono.push(frame_sum / channels as f32);
                    frame_sum = 0.0;
                    in_frame = 0;
                }
            }
        }
        hound::SampleFormat::Float => {
            let mut frame_sum = 0.0f32;
            let mut in_frame = 0usize;
            for sample in reader.samples::<f32>() {
                let s = sample
                    .map_err(|e| BytebeatError::AssetFetch(format!("undecodable WAV: {e}")))?;
                frame_sum += s;
                in_frame += 1;
                if in_frame == channels {
                    mono.push(frame_sum / channels as f32);
                    frame_sum = 0.0;
                    in_frame = 0;
                }
            }
        }
    }

    Ok((mono, spec.sample_rate))
}

fn quantize_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}
