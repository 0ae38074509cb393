//! # Audio Module
//!
//! Everything between an uploaded file and the sample stream the
//! transcription engine consumes.
//!
//! ## Key Components:
//! - **Decoder**: Container probing and PCM extraction via Symphonia
//! - **Processor**: Mono downmix, resampling to 16 kHz, level conditioning
//!
//! ## Pipeline Output:
//! - **Sample Rate**: 16kHz (16,000 Hz)
//! - **Channels**: Mono (1 channel)
//! - **Encoding**: 32-bit float in `[-1.0, 1.0]`

pub mod decoder;   // Container decode to interleaved PCM
pub mod processor; // Downmix, resample, condition

pub use decoder::{
    decode_audio, is_supported_extension, AudioDecodeError, DecodedAudio, SUPPORTED_EXTENSIONS,
};
pub use processor::{prepare_for_transcription, TARGET_SAMPLE_RATE};
