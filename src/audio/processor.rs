//! # Audio Preprocessing
//!
//! Conversion from decoded PCM to the layout Whisper expects: mono, 16 kHz,
//! DC-centered and level-normalized f32 samples.

use crate::audio::decoder::DecodedAudio;

/// Sample rate the Whisper models were trained on.
pub const TARGET_SAMPLE_RATE: u32 = candle_transformers::models::whisper::SAMPLE_RATE as u32;

/// Normalization target, leaving headroom below full scale.
const NORMALIZE_PEAK: f32 = 0.85;

/// Full preprocessing pass for an uploaded file.
///
/// Downmixes to mono, resamples to [`TARGET_SAMPLE_RATE`] and conditions
/// the signal. The result feeds straight into the transcription engine.
pub fn prepare_for_transcription(decoded: DecodedAudio) -> Vec<f32> {
    let mono = if decoded.channels > 1 {
        downmix_to_mono(&decoded.samples, decoded.channels)
    } else {
        decoded.samples
    };

    let mut resampled = resample(&mono, decoded.sample_rate, TARGET_SAMPLE_RATE);
    condition(&mut resampled);
    resampled
}

/// Average interleaved channels down to one.
pub fn downmix_to_mono(samples: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }
    samples
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Linear-interpolation resampler.
///
/// Not a band-limited resampler, but adequate for speech feeding a model
/// that downmixes to 80 mel bins anyway.
pub fn resample(samples: &[f32], source_rate: u32, target_rate: u32) -> Vec<f32> {
    if source_rate == target_rate || samples.is_empty() {
        return samples.to_vec();
    }

    let ratio = source_rate as f64 / target_rate as f64;
    let output_len = (samples.len() as f64 / ratio).ceil() as usize;
    let mut output = Vec::with_capacity(output_len);

    for i in 0..output_len {
        let src_pos = i as f64 * ratio;
        let src_idx = src_pos.floor() as usize;
        let frac = (src_pos - src_idx as f64) as f32;

        let sample = if src_idx + 1 < samples.len() {
            samples[src_idx] * (1.0 - frac) + samples[src_idx + 1] * frac
        } else if src_idx < samples.len() {
            samples[src_idx]
        } else {
            0.0
        };
        output.push(sample);
    }

    output
}

/// Remove DC offset and bring quiet recordings up to a usable level.
///
/// Normalization only kicks in for signals that are clearly quiet but not
/// silent; material already near full scale is left alone.
fn condition(samples: &mut [f32]) {
    if samples.is_empty() {
        return;
    }

    let mean = samples.iter().sum::<f32>() / samples.len() as f32;
    for sample in samples.iter_mut() {
        *sample -= mean;
    }

    let peak = samples.iter().fold(0.0f32, |acc, s| acc.max(s.abs()));
    if peak >= 0.003 && peak <= 0.92 {
        let scale = NORMALIZE_PEAK / peak;
        for sample in samples.iter_mut() {
            *sample *= scale;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_downmix_averages_channels() {
        let stereo = vec![1.0, 0.0, 0.5, 0.5, -1.0, 1.0];
        let mono = downmix_to_mono(&stereo, 2);
        assert_eq!(mono, vec![0.5, 0.5, 0.0]);
    }

    #[test]
    fn test_downmix_mono_passthrough() {
        let samples = vec![0.1, 0.2, 0.3];
        assert_eq!(downmix_to_mono(&samples, 1), samples);
    }

    #[test]
    fn test_resample_identity() {
        let samples = vec![0.1, -0.2, 0.3];
        assert_eq!(resample(&samples, 16_000, 16_000), samples);
    }

    #[test]
    fn test_resample_halves_length() {
        let samples: Vec<f32> = (0..32_000).map(|i| (i as f32 * 0.01).sin()).collect();
        let out = resample(&samples, 32_000, 16_000);
        assert_eq!(out.len(), 16_000);
    }

    #[test]
    fn test_resample_preserves_constant_signal() {
        let samples = vec![0.5f32; 441];
        let out = resample(&samples, 44_100, 16_000);
        assert_eq!(out.len(), 160);
        for sample in out {
            assert!((sample - 0.5).abs() < 1e-6);
        }
    }

    #[test]
    fn test_condition_removes_dc_and_normalizes() {
        let mut samples = vec![0.6, 0.4, 0.6, 0.4];
        condition(&mut samples);

        let mean = samples.iter().sum::<f32>() / samples.len() as f32;
        assert!(mean.abs() < 1e-6);

        let peak = samples.iter().fold(0.0f32, |acc, s| acc.max(s.abs()));
        assert!((peak - NORMALIZE_PEAK).abs() < 1e-4);
    }

    #[test]
    fn test_condition_leaves_loud_audio_alone() {
        let mut samples = vec![0.95, -0.95, 0.95, -0.95];
        condition(&mut samples);
        let peak = samples.iter().fold(0.0f32, |acc, s| acc.max(s.abs()));
        assert!((peak - 0.95).abs() < 1e-4);
    }

    #[test]
    fn test_prepare_full_pipeline() {
        let decoded = DecodedAudio {
            samples: vec![0.2, 0.2, 0.4, 0.4, 0.2, 0.2, 0.4, 0.4],
            sample_rate: 32_000,
            channels: 2,
        };
        let prepared = prepare_for_transcription(decoded);
        // 4 mono frames at 32kHz become 2 at 16kHz
        assert_eq!(prepared.len(), 2);
    }
}
