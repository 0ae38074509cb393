//! # Transcription Module
//!
//! Speech-to-text with Whisper models via the Candle framework, pure Rust
//! with no FFI bindings to whisper.cpp.
//!
//! ## Key Components:
//! - **Model Management**: Loading and unloading Whisper model weights
//! - **Transcription Engine**: Windowed decoding of uploaded audio
//! - **Language Handling**: Hinted or auto-detected transcription language
//! - **Model Registry**: Per-size lifecycle status and usage metrics
//!
//! ## Whisper Model Sizes:
//! - **tiny**: ~39MB, fastest but least accurate
//! - **base**: ~74MB, good balance for development
//! - **small**: ~244MB, better accuracy
//! - **medium**: ~769MB, default, solid accuracy across languages
//! - **large**: ~1550MB, best accuracy but slowest

pub mod engine;   // Windowing and transcription orchestration
pub mod language; // Language hints and token mapping
pub mod model;    // Whisper model loading and decoding
pub mod registry; // Model lifecycle and usage tracking

pub use engine::{EngineOutput, TranscriptionConfig, TranscriptionEngine};
pub use language::Language;
pub use model::{ModelInfo, ModelSize};
pub use registry::{ModelRegistry, ModelStatus};
