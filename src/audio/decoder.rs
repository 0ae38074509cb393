//! # Audio File Decoding
//!
//! Turns uploaded container formats (WAV, MP3, OGG, M4A) into interleaved
//! f32 PCM via Symphonia. The decoder works purely in memory; uploads are
//! never written to disk.

use std::fmt;
use std::io::Cursor;

use symphonia::core::audio::{SampleBuffer, SignalSpec};
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

/// File extensions the upload endpoint accepts.
pub const SUPPORTED_EXTENSIONS: [&str; 4] = ["wav", "mp3", "ogg", "m4a"];

/// PCM extracted from an uploaded file, still at the source rate and
/// channel layout.
#[derive(Debug)]
pub struct DecodedAudio {
    /// Interleaved samples in `[-1.0, 1.0]`.
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: usize,
}

impl DecodedAudio {
    pub fn duration_seconds(&self) -> f32 {
        if self.channels == 0 || self.sample_rate == 0 {
            return 0.0;
        }
        (self.samples.len() / self.channels) as f32 / self.sample_rate as f32
    }
}

/// Why an uploaded file could not be decoded.
#[derive(Debug)]
pub enum AudioDecodeError {
    /// Extension or container format the service does not handle.
    UnsupportedFormat(String),
    /// Container opened but holds no decodable audio track.
    NoAudioTrack,
    /// Stream was recognized but decoding failed partway.
    Corrupted(String),
    /// File decoded to zero samples.
    EmptyAudio,
}

impl fmt::Display for AudioDecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AudioDecodeError::UnsupportedFormat(detail) => {
                write!(f, "unsupported audio format: {}", detail)
            }
            AudioDecodeError::NoAudioTrack => write!(f, "file contains no audio track"),
            AudioDecodeError::Corrupted(detail) => {
                write!(f, "audio stream could not be decoded: {}", detail)
            }
            AudioDecodeError::EmptyAudio => write!(f, "file contains no audio samples"),
        }
    }
}

impl std::error::Error for AudioDecodeError {}

/// Lowercased extension of an uploaded filename, if it has one.
pub fn file_extension(filename: &str) -> Option<String> {
    filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .filter(|ext| !ext.is_empty())
}

pub fn is_supported_extension(filename: &str) -> bool {
    match file_extension(filename) {
        Some(ext) => SUPPORTED_EXTENSIONS.contains(&ext.as_str()),
        None => false,
    }
}

/// Decode an uploaded file into interleaved f32 PCM.
///
/// The filename's extension seeds the format probe as a hint; the probe
/// still inspects the bytes, so a mislabeled file decodes as whatever it
/// actually is or fails cleanly.
pub fn decode_audio(bytes: Vec<u8>, filename: &str) -> Result<DecodedAudio, AudioDecodeError> {
    let extension = file_extension(filename)
        .filter(|ext| SUPPORTED_EXTENSIONS.contains(&ext.as_str()))
        .ok_or_else(|| {
            AudioDecodeError::UnsupportedFormat(format!(
                "'{}' is not one of {}",
                filename,
                SUPPORTED_EXTENSIONS.join(", ")
            ))
        })?;

    let stream = MediaSourceStream::new(Box::new(Cursor::new(bytes)), Default::default());
    let mut hint = Hint::new();
    hint.with_extension(&extension);

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            stream,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| AudioDecodeError::UnsupportedFormat(e.to_string()))?;

    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or(AudioDecodeError::NoAudioTrack)?;
    let track_id = track.id;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| AudioDecodeError::UnsupportedFormat(e.to_string()))?;

    let mut samples: Vec<f32> = Vec::new();
    let mut signal_spec: Option<SignalSpec> = None;
    let mut sample_buf: Option<SampleBuffer<f32>> = None;

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            // End of stream.
            Err(SymphoniaError::IoError(e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(AudioDecodeError::Corrupted(e.to_string())),
        };

        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                if sample_buf.is_none() {
                    let spec = *decoded.spec();
                    sample_buf = Some(SampleBuffer::<f32>::new(decoded.capacity() as u64, spec));
                    signal_spec = Some(spec);
                }
                if let Some(buf) = sample_buf.as_mut() {
                    buf.copy_interleaved_ref(decoded);
                    samples.extend_from_slice(buf.samples());
                }
            }
            // A bad packet is skippable; the rest of the stream may be fine.
            Err(SymphoniaError::DecodeError(_)) => continue,
            Err(e) => return Err(AudioDecodeError::Corrupted(e.to_string())),
        }
    }

    let spec = signal_spec.ok_or(AudioDecodeError::EmptyAudio)?;
    if samples.is_empty() {
        return Err(AudioDecodeError::EmptyAudio);
    }

    Ok(DecodedAudio {
        samples,
        sample_rate: spec.rate,
        channels: spec.channels.count(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn wav_bytes(channels: u16, sample_rate: u32, frames: usize) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for i in 0..frames {
                let value = ((i as f32 * 0.05).sin() * 12_000.0) as i16;
                for _ in 0..channels {
                    writer.write_sample(value).unwrap();
                }
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn test_decode_stereo_wav() {
        let bytes = wav_bytes(2, 44_100, 4410);
        let decoded = decode_audio(bytes, "clip.wav").unwrap();

        assert_eq!(decoded.channels, 2);
        assert_eq!(decoded.sample_rate, 44_100);
        assert_eq!(decoded.samples.len(), 4410 * 2);
        assert!((decoded.duration_seconds() - 0.1).abs() < 0.001);
    }

    #[test]
    fn test_decode_mono_wav() {
        let bytes = wav_bytes(1, 16_000, 1600);
        let decoded = decode_audio(bytes, "voice.WAV").unwrap();

        assert_eq!(decoded.channels, 1);
        assert_eq!(decoded.sample_rate, 16_000);
        assert_eq!(decoded.samples.len(), 1600);
    }

    #[test]
    fn test_rejects_unknown_extension() {
        let bytes = wav_bytes(1, 16_000, 100);
        let err = decode_audio(bytes, "notes.txt").unwrap_err();
        assert!(matches!(err, AudioDecodeError::UnsupportedFormat(_)));

        let err = decode_audio(vec![1, 2, 3], "no_extension").unwrap_err();
        assert!(matches!(err, AudioDecodeError::UnsupportedFormat(_)));
    }

    #[test]
    fn test_rejects_garbage_bytes() {
        let garbage = vec![0xABu8; 512];
        assert!(decode_audio(garbage, "broken.wav").is_err());
    }

    #[test]
    fn test_rejects_empty_stream() {
        let bytes = wav_bytes(1, 16_000, 0);
        let err = decode_audio(bytes, "silence.wav").unwrap_err();
        assert!(matches!(err, AudioDecodeError::EmptyAudio));
    }

    #[test]
    fn test_extension_helpers() {
        assert_eq!(file_extension("a.b.MP3").as_deref(), Some("mp3"));
        assert_eq!(file_extension("noext"), None);
        assert_eq!(file_extension("trailing."), None);

        assert!(is_supported_extension("talk.m4a"));
        assert!(!is_supported_extension("talk.flac"));
    }
}
