//! # Transcription Engine
//!
//! Owns the loaded Whisper model and turns decoded uploads into timed
//! transcript segments.
//!
//! ## Key Responsibilities:
//! - **Model lifecycle**: load, swap and unload models on request
//! - **Windowing**: slice long audio into 30 s windows and stitch segment
//!   timestamps back onto the absolute timeline
//! - **Language pinning**: detect the language on the first window when no
//!   hint was given and reuse it for the rest of the file
//!
//! The model sits behind an async `RwLock`; a transcription holds the write
//! lock for its full duration, so concurrent uploads queue rather than
//! interleave on the decoder state.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, Result};
use candle_core::Device;
use candle_transformers::models::whisper as m;
use tokio::sync::RwLock;

use crate::transcript::TranscriptSegment;
use crate::transcription::language::Language;
use crate::transcription::model::{ModelSize, WhisperModel};

/// Limits applied to decoded audio before transcription.
#[derive(Debug, Clone)]
pub struct TranscriptionConfig {
    /// Shortest audio worth sending to the model (seconds).
    pub min_audio_duration: f64,
    /// Upper bound on a single upload (seconds).
    pub max_audio_duration: f64,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            min_audio_duration: 0.1,
            max_audio_duration: 2.0 * 3600.0,
        }
    }
}

/// Everything a transcription produced, ready to become a `Transcript`.
#[derive(Debug)]
pub struct EngineOutput {
    pub segments: Vec<TranscriptSegment>,
    pub language: Language,
    /// True when `language` was detected rather than supplied.
    pub language_detected: bool,
    pub audio_duration: f64,
    pub processing_time_ms: u64,
    pub model: ModelSize,
}

/// High-level transcription coordinator shared across request handlers.
pub struct TranscriptionEngine {
    model: Arc<RwLock<Option<WhisperModel>>>,
    config: TranscriptionConfig,
    device: Device,
}

impl TranscriptionEngine {
    pub fn new(config: TranscriptionConfig, device: Device) -> Self {
        Self {
            model: Arc::new(RwLock::new(None)),
            config,
            device,
        }
    }

    /// Load a Whisper model, replacing whatever was loaded before.
    pub async fn load_model(&self, model_size: ModelSize) -> Result<()> {
        tracing::info!("Loading {} model for transcription engine", model_size);
        let start_time = Instant::now();

        let new_model = WhisperModel::load(model_size, self.device.clone()).await?;
        {
            let mut model_guard = self.model.write().await;
            *model_guard = Some(new_model);
        }

        tracing::info!(
            "Model {} ready in {:.2}s",
            model_size,
            start_time.elapsed().as_secs_f64()
        );
        Ok(())
    }

    /// Unload the current model to free memory.
    pub async fn unload_model(&self) -> Option<ModelSize> {
        let mut model_guard = self.model.write().await;
        let unloaded = model_guard.as_ref().map(|model| model.info().size);
        if let Some(size) = unloaded {
            tracing::info!("Unloading {} model", size);
        }
        *model_guard = None;
        unloaded
    }

    pub async fn is_model_loaded(&self) -> bool {
        self.model.read().await.is_some()
    }

    /// Size of the currently loaded model, if any.
    pub async fn loaded_model(&self) -> Option<ModelSize> {
        self.model.read().await.as_ref().map(|model| model.info().size)
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Transcribe a full decoded upload into absolute-time segments.
    ///
    /// `model_size` is the size the caller resolved for this request; it is
    /// re-verified once the write lock is held, so a model swapped in by a
    /// concurrent request fails the upload instead of silently serving it.
    ///
    /// ## Process:
    /// 1. Validate duration bounds
    /// 2. Confirm the loaded model is the requested size
    /// 3. Walk the audio in 30 s windows
    /// 4. Detect the language on the first window when no hint was given
    /// 5. Offset window-relative timestamps by the window start
    pub async fn transcribe(
        &self,
        samples: &[f32],
        language_hint: Option<Language>,
        model_size: ModelSize,
    ) -> Result<EngineOutput> {
        let start_time = Instant::now();

        if samples.is_empty() {
            return Err(anyhow!("Audio data is empty"));
        }
        let audio_duration = samples.len() as f64 / m::SAMPLE_RATE as f64;
        if audio_duration < self.config.min_audio_duration {
            return Err(anyhow!(
                "Audio too short: {:.2}s (minimum: {:.2}s)",
                audio_duration,
                self.config.min_audio_duration
            ));
        }
        if audio_duration > self.config.max_audio_duration {
            return Err(anyhow!(
                "Audio too long: {:.0}s (maximum: {:.0}s)",
                audio_duration,
                self.config.max_audio_duration
            ));
        }

        let mut model_guard = self.model.write().await;
        let model = match model_guard.as_mut() {
            Some(model) if model.info().size == model_size => model,
            Some(model) => {
                return Err(anyhow!(
                    "Model changed to {} while this {} request was queued; retry the upload",
                    model.info().size,
                    model_size
                ));
            }
            None => return Err(anyhow!("No model loaded for transcription")),
        };

        tracing::debug!(
            "Transcribing {:.2}s of audio with the {} model",
            audio_duration,
            model_size
        );

        let window_samples = m::CHUNK_LENGTH * m::SAMPLE_RATE;
        let min_tail = m::SAMPLE_RATE / 10;
        let mut segments: Vec<TranscriptSegment> = Vec::new();
        let mut language = language_hint;

        for (start, end) in window_spans(samples.len(), window_samples, min_tail) {
            let offset_ms = (start / (m::SAMPLE_RATE / 1000)) as i64;
            let window = model.transcribe_window(&samples[start..end], language)?;
            language = Some(window.language);
            for piece in window.segments {
                segments.push(TranscriptSegment {
                    start_ms: offset_ms + piece.start_ms,
                    end_ms: offset_ms + piece.end_ms,
                    text: piece.text,
                });
            }
        }
        drop(model_guard);

        let language = language.ok_or_else(|| anyhow!("Transcription produced no language"))?;
        let processing_time_ms = start_time.elapsed().as_millis() as u64;

        tracing::info!(
            "Transcription completed: {:.2}s audio -> {} segment(s) in {}ms",
            audio_duration,
            segments.len(),
            processing_time_ms
        );

        Ok(EngineOutput {
            segments,
            language,
            language_detected: language_hint.is_none(),
            audio_duration,
            processing_time_ms,
            model: model_size,
        })
    }
}

/// Split `total` samples into `(start, end)` window bounds of at most
/// `window` samples. A final sliver shorter than `min_tail` is dropped so a
/// few padded milliseconds cannot produce a hallucinated segment.
fn window_spans(total: usize, window: usize, min_tail: usize) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut start = 0;
    while start < total {
        let end = (start + window).min(total);
        if start > 0 && end - start < min_tail {
            break;
        }
        spans.push((start, end));
        start = end;
    }
    spans
}
