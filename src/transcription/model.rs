//! # Whisper Model Loading and Decoding
//!
//! Downloads pre-trained Whisper weights from the Hugging Face Hub and runs
//! them with Candle. One `WhisperModel` decodes a single 30-second window at
//! a time; longer audio is windowed by the engine.
//!
//! ## Loading
//! 1. Resolve the Hub repository for the requested model size
//! 2. Download `config.json`, `tokenizer.json` and `model.safetensors`
//!    (cached locally by hf-hub)
//! 3. Build the mel filter bank for the model's bin count
//! 4. Memory-map the weights onto the requested device
//!
//! ## Decoding
//! Greedy token decoding with timestamp tokens enabled. Timestamp tokens
//! partition the output into timed segments at 20 ms resolution. A window
//! whose decode collapses into repetition is retried over an escalating
//! temperature ladder, sampling from the scaled token distribution with a
//! repeat penalty over the emitted context.

use candle_core::{Device, IndexOp, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::generation::LogitsProcessor;
use candle_transformers::models::whisper::{self as m, Config};
use tokenizers::Tokenizer;
use anyhow::{anyhow, Result};

use crate::transcription::language::Language;

/// Available Whisper model sizes with their characteristics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelSize {
    Tiny,
    Base,
    Small,
    Medium,
    Large,
}

impl ModelSize {
    pub const ALL: [ModelSize; 5] = [
        ModelSize::Tiny,
        ModelSize::Base,
        ModelSize::Small,
        ModelSize::Medium,
        ModelSize::Large,
    ];

    /// The HuggingFace model repository holding the weights.
    pub fn repo_name(&self) -> &'static str {
        match self {
            ModelSize::Tiny => "openai/whisper-tiny",
            ModelSize::Base => "openai/whisper-base",
            ModelSize::Small => "openai/whisper-small",
            ModelSize::Medium => "openai/whisper-medium",
            ModelSize::Large => "openai/whisper-large-v2",
        }
    }

    /// Approximate weight size in MB, used for memory accounting.
    pub fn size_mb(&self) -> u32 {
        match self {
            ModelSize::Tiny => 39,
            ModelSize::Base => 74,
            ModelSize::Small => 244,
            ModelSize::Medium => 769,
            ModelSize::Large => 1550,
        }
    }

    /// Expected speed/accuracy trade-off.
    pub fn performance(&self) -> &'static str {
        match self {
            ModelSize::Tiny => "fast",
            ModelSize::Base => "fast",
            ModelSize::Small => "balanced",
            ModelSize::Medium => "accurate",
            ModelSize::Large => "accurate",
        }
    }

    /// Human-readable description for the model picker.
    pub fn description(&self) -> &'static str {
        match self {
            ModelSize::Tiny => "Fastest, basic accuracy",
            ModelSize::Base => "Fast, good for short clips",
            ModelSize::Small => "Balanced speed and accuracy",
            ModelSize::Medium => "Good accuracy, handles technical vocabulary",
            ModelSize::Large => "Best accuracy, slowest processing",
        }
    }
}

impl Default for ModelSize {
    fn default() -> Self {
        ModelSize::Medium
    }
}

impl std::str::FromStr for ModelSize {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "tiny" => Ok(ModelSize::Tiny),
            "base" => Ok(ModelSize::Base),
            "small" => Ok(ModelSize::Small),
            "medium" => Ok(ModelSize::Medium),
            "large" => Ok(ModelSize::Large),
            _ => Err(anyhow!("Unknown model size: {}", s)),
        }
    }
}

impl std::fmt::Display for ModelSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ModelSize::Tiny => "tiny",
            ModelSize::Base => "base",
            ModelSize::Small => "small",
            ModelSize::Medium => "medium",
            ModelSize::Large => "large",
        };
        write!(f, "{}", name)
    }
}

/// Descriptive information about a Whisper model.
#[derive(Debug, Clone)]
pub struct ModelInfo {
    pub size: ModelSize,
    pub name: String,
    pub description: String,
    pub size_mb: u32,
    pub performance: String,
    pub loaded: bool,
}

impl ModelInfo {
    pub fn new(size: ModelSize) -> Self {
        Self {
            name: size.to_string(),
            description: size.description().to_string(),
            size_mb: size.size_mb(),
            performance: size.performance().to_string(),
            loaded: false,
            size,
        }
    }
}

/// One timed span of recognized speech, relative to its window start.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowSegment {
    pub start_ms: i64,
    pub end_ms: i64,
    pub text: String,
}

/// Result of decoding one audio window.
#[derive(Debug)]
pub struct WindowTranscription {
    pub segments: Vec<WindowSegment>,
    /// The language actually used, detected when no hint was given.
    pub language: Language,
}

/// Vocabulary ids the decoder needs, resolved from the tokenizer at load time
/// so they stay correct across model revisions.
#[derive(Debug, Clone, Copy)]
struct SpecialTokens {
    sot: u32,
    eot: u32,
    transcribe: u32,
    /// Id of `<|0.00|>`; every id at or above this is a timestamp.
    timestamp_begin: u32,
}

impl SpecialTokens {
    fn resolve(tokenizer: &Tokenizer) -> Result<Self> {
        let lookup = |token: &str| {
            tokenizer
                .token_to_id(token)
                .ok_or_else(|| anyhow!("Tokenizer is missing required token {}", token))
        };
        Ok(Self {
            sot: lookup(m::SOT_TOKEN)?,
            eot: lookup(m::EOT_TOKEN)?,
            transcribe: lookup(m::TRANSCRIBE_TOKEN)?,
            timestamp_begin: lookup("<|0.00|>")?,
        })
    }
}

struct DecodeOutcome {
    tokens: Vec<u32>,
    /// True when the loop-guard aborted the decode.
    degenerate: bool,
}

/// Decode retry ladder. The first pass is a pure argmax walk; each retry
/// samples at the next higher temperature until one decode survives the
/// loop guard.
const TEMPERATURES: &[f64] = &[0.0, 0.2, 0.4, 0.6, 0.8, 1.0];

/// Penalty applied to recently emitted tokens on sampled retries.
const REPEAT_PENALTY: f32 = 1.3;

/// Fixed sampling seed; a rerun of the same window decodes identically.
const SAMPLING_SEED: u64 = 299792458;

/// A loaded Whisper model ready for transcription.
pub struct WhisperModel {
    model: m::model::Whisper,
    config: Config,
    device: Device,
    info: ModelInfo,
    tokenizer: Tokenizer,
    mel_filters: Vec<f32>,
    special: SpecialTokens,
}

impl WhisperModel {
    /// Download (or reuse the local cache of) and load a Whisper model.
    ///
    /// Respects `HF_TOKEN`, `HF_HUB_CACHE` and `HF_HOME` for authentication
    /// and cache placement; only safetensors weights are accepted.
    pub async fn load(size: ModelSize, device: Device) -> Result<Self> {
        tracing::info!("Loading Whisper {} model...", size);
        let start_time = std::time::Instant::now();

        let api = {
            use hf_hub::api::tokio::{Api, ApiBuilder};

            let mut builder = ApiBuilder::new();
            if let Ok(token) = std::env::var("HF_TOKEN") {
                builder = builder.with_token(Some(token));
            } else {
                builder = builder.with_token(None);
            }
            if let Ok(cache_dir) = std::env::var("HF_HUB_CACHE") {
                builder = builder.with_cache_dir(cache_dir.into());
            } else if let Ok(hf_home) = std::env::var("HF_HOME") {
                builder = builder.with_cache_dir(std::path::PathBuf::from(hf_home).join("hub"));
            }
            builder = builder.with_progress(false);

            match builder.build() {
                Ok(api) => api,
                Err(e) => {
                    tracing::warn!("hf-hub ApiBuilder failed ({}), falling back to defaults", e);
                    Api::new().map_err(|e2| {
                        anyhow!("Could not initialize the HuggingFace client: {} / {}", e, e2)
                    })?
                }
            }
        };

        let repo = api.model(size.repo_name().to_string());
        tracing::info!("Fetching model files from {}", size.repo_name());

        let config_filename = repo.get("config.json").await.map_err(|e| {
            anyhow!("Failed to download config.json from {}: {}", size.repo_name(), e)
        })?;
        let tokenizer_filename = repo.get("tokenizer.json").await.map_err(|e| {
            anyhow!("Failed to download tokenizer.json from {}: {}", size.repo_name(), e)
        })?;
        let model_filename = repo.get("model.safetensors").await.map_err(|e| {
            anyhow!("Failed to download safetensors weights from {}: {}", size.repo_name(), e)
        })?;

        let config: Config = serde_json::from_reader(std::fs::File::open(config_filename)?)?;
        let tokenizer = Tokenizer::from_file(tokenizer_filename)
            .map_err(|e| anyhow!("Failed to load tokenizer: {}", e))?;
        let special = SpecialTokens::resolve(&tokenizer)?;
        let mel_filters = mel_filter_bank(config.num_mel_bins);

        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[model_filename], m::DTYPE, &device)?
        };
        let model = m::model::Whisper::load(&vb, config.clone())?;

        let load_time = start_time.elapsed();
        tracing::info!("Whisper {} model loaded in {:.2}s", size, load_time.as_secs_f64());

        let mut info = ModelInfo::new(size);
        info.loaded = true;

        Ok(Self {
            model,
            config,
            device,
            info,
            tokenizer,
            mel_filters,
            special,
        })
    }

    /// Transcribe one audio window into timed segments.
    ///
    /// ## Audio Requirements:
    /// - 16 kHz mono f32 samples in [-1.0, 1.0]
    /// - At most 30 seconds; shorter windows are zero padded internally
    ///
    /// With `language == None` the language is detected from this window and
    /// returned so callers can pin it for subsequent windows.
    pub fn transcribe_window(
        &mut self,
        samples: &[f32],
        language: Option<Language>,
    ) -> Result<WindowTranscription> {
        if samples.is_empty() {
            return Err(anyhow!("Audio window is empty"));
        }
        let window_ms = samples.len() as i64 * 1000 / m::SAMPLE_RATE as i64;

        let mel = self.mel_spectrogram(samples)?;
        let features = self.model.encoder.forward(&mel, true)?;

        let language = match language {
            Some(lang) => lang,
            None => {
                let detected = self.detect_language(&features)?;
                tracing::debug!("Detected language: {}", detected.name());
                detected
            }
        };

        let prefix = vec![
            self.special.sot,
            self.language_token(language)?,
            self.special.transcribe,
        ];

        let mut outcome = self.decode(&features, &prefix, TEMPERATURES[0])?;
        if outcome.degenerate {
            for &temperature in &TEMPERATURES[1..] {
                tracing::debug!(
                    "Decode collapsed into repetition, retrying at temperature {:.1}",
                    temperature
                );
                let retry = self.decode(&features, &prefix, temperature)?;
                let clean = !retry.degenerate;
                if clean || retry.tokens.len() > outcome.tokens.len() {
                    outcome = retry;
                }
                if clean {
                    break;
                }
            }
        }

        let mut segments = Vec::new();
        for (start_ms, end_ms, text_tokens) in
            split_timestamp_runs(&outcome.tokens, self.special.timestamp_begin, window_ms)
        {
            let text = self.decode_text(&text_tokens)?;
            if !text.is_empty() {
                segments.push(WindowSegment { start_ms, end_ms, text });
            }
        }

        Ok(WindowTranscription { segments, language })
    }

    /// Token decoding over encoded audio features at one temperature.
    ///
    /// Temperature zero takes the most probable token at every step. A
    /// positive temperature samples from the softmax of the scaled logits,
    /// with recently emitted tokens penalized, so retries can escape the
    /// repetition that sank the greedy pass.
    ///
    /// The full prefix is re-fed each step; the cross-attention cache is
    /// flushed on the first step so stale state from a previous window can
    /// never leak in.
    fn decode(
        &mut self,
        features: &Tensor,
        prefix: &[u32],
        temperature: f64,
    ) -> Result<DecodeOutcome> {
        let sample_len = self.config.max_target_positions / 2;
        let mut tokens = prefix.to_vec();
        let mut degenerate = false;
        let mut sampler = (temperature > 0.0)
            .then(|| LogitsProcessor::new(SAMPLING_SEED, Some(temperature), None));

        for step in 0..sample_len {
            let input = Tensor::new(&tokens[..], &self.device)?.unsqueeze(0)?;
            let ys = self.model.decoder.forward(&input, features, step == 0)?;
            let (_, seq_len, _) = ys.dims3()?;
            let logits = self
                .model
                .decoder
                .final_linear(&ys.i((..1, seq_len - 1..))?)?
                .i(0)?
                .i(0)?;

            let logits = if sampler.is_some() && tokens.len() > prefix.len() {
                candle_transformers::utils::apply_repeat_penalty(
                    &logits,
                    REPEAT_PENALTY,
                    &tokens[prefix.len()..],
                )?
            } else {
                logits
            };

            let next = match sampler.as_mut() {
                Some(sampler) => sampler.sample(&logits)?,
                None => {
                    let logits: Vec<f32> = logits.to_vec1()?;
                    logits
                        .iter()
                        .enumerate()
                        .max_by(|(_, a), (_, b)| a.total_cmp(b))
                        .map(|(i, _)| i as u32)
                        .ok_or_else(|| anyhow!("Decoder produced empty logits"))?
                }
            };

            if next == self.special.eot {
                break;
            }
            if is_looping(&tokens[prefix.len()..], next) {
                degenerate = true;
                break;
            }
            tokens.push(next);
        }

        let emitted = tokens.split_off(prefix.len());
        Ok(DecodeOutcome { tokens: emitted, degenerate })
    }

    /// Pick the most probable language token after `<|startoftranscript|>`.
    fn detect_language(&mut self, features: &Tensor) -> Result<Language> {
        let input = Tensor::new(&[self.special.sot], &self.device)?.unsqueeze(0)?;
        let ys = self.model.decoder.forward(&input, features, true)?;
        let logits: Vec<f32> = self
            .model
            .decoder
            .final_linear(&ys.i((..1, ..1))?)?
            .i(0)?
            .i(0)?
            .to_vec1()?;

        let mut best: Option<(Language, f32)> = None;
        for lang in Language::ALL {
            let id = self.language_token(lang)? as usize;
            let score = *logits
                .get(id)
                .ok_or_else(|| anyhow!("Language token id {} outside vocabulary", id))?;
            if best.map_or(true, |(_, s)| score > s) {
                best = Some((lang, score));
            }
        }
        best.map(|(lang, _)| lang)
            .ok_or_else(|| anyhow!("Language detection produced no candidate"))
    }

    fn language_token(&self, language: Language) -> Result<u32> {
        self.tokenizer
            .token_to_id(language.token())
            .ok_or_else(|| anyhow!("Tokenizer has no token for language {}", language))
    }

    /// Pad the window to 30 s and convert it to a log-mel tensor of shape
    /// `(1, num_mel_bins, 3000)`.
    fn mel_spectrogram(&self, samples: &[f32]) -> Result<Tensor> {
        let mut padded = vec![0.0f32; m::N_SAMPLES];
        let len = samples.len().min(m::N_SAMPLES);
        padded[..len].copy_from_slice(&samples[..len]);

        let mel = m::audio::pcm_to_mel(&self.config, &padded, &self.mel_filters);
        let n_mels = self.config.num_mel_bins;
        let n_frames = mel.len() / n_mels;
        Ok(Tensor::from_vec(mel, (1, n_mels, n_frames), &self.device)?)
    }

    fn decode_text(&self, tokens: &[u32]) -> Result<String> {
        let text = self
            .tokenizer
            .decode(tokens, true)
            .map_err(|e| anyhow!("Tokenizer decode error: {}", e))?;
        Ok(text.trim().to_string())
    }

    pub fn info(&self) -> &ModelInfo {
        &self.info
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Rough resident-memory estimate for the loaded weights.
    pub fn estimated_memory_usage(&self) -> usize {
        self.info.size_mb as usize * 1024 * 1024
    }
}

/// Split a decoded token stream into `(start_ms, end_ms, text_tokens)` runs.
///
/// Timestamp tokens encode 20 ms steps above `timestamp_begin`. A timestamp
/// seen while text is pending closes the current run; otherwise it moves the
/// run start. Trailing text without a closing timestamp runs to the window
/// end. Runs starting in the zero-padded region past `window_ms` are dropped.
fn split_timestamp_runs(
    tokens: &[u32],
    timestamp_begin: u32,
    window_ms: i64,
) -> Vec<(i64, i64, Vec<u32>)> {
    let mut runs = Vec::new();
    let mut start_ms: Option<i64> = None;
    let mut text: Vec<u32> = Vec::new();

    for &tok in tokens {
        if tok >= timestamp_begin {
            let at_ms = ((tok - timestamp_begin) as i64 * 20).min(window_ms);
            if let (Some(begin), false) = (start_ms, text.is_empty()) {
                runs.push((begin, at_ms.max(begin), std::mem::take(&mut text)));
            }
            start_ms = Some(at_ms);
        } else {
            text.push(tok);
        }
    }
    if !text.is_empty() {
        let begin = start_ms.unwrap_or(0).min(window_ms);
        runs.push((begin, window_ms.max(begin), text));
    }

    runs.retain(|(begin, _, _)| *begin < window_ms);
    runs
}

/// Loop guard: three identical tokens in a row, or the same three-token
/// pattern emitted twice back to back.
fn is_looping(emitted: &[u32], next: u32) -> bool {
    let n = emitted.len();
    if n >= 2 && emitted[n - 1] == next && emitted[n - 2] == next {
        return true;
    }
    if n >= 5 {
        let candidate = [emitted[n - 2], emitted[n - 1], next];
        if emitted[n - 5..n - 2] == candidate {
            return true;
        }
    }
    false
}

/// Triangular mel filter bank on the Slaney scale, matching the layout the
/// mel conversion expects: `num_mel_bins` rows of `N_FFT / 2 + 1` weights.
fn mel_filter_bank(n_mels: usize) -> Vec<f32> {
    let n_freqs = m::N_FFT / 2 + 1;
    let f_max = m::SAMPLE_RATE as f32 / 2.0;

    let mel_max = hz_to_mel(f_max);
    let band_edges: Vec<f32> = (0..n_mels + 2)
        .map(|i| mel_to_hz(mel_max * i as f32 / (n_mels + 1) as f32))
        .collect();

    let mut filters = vec![0.0f32; n_mels * n_freqs];
    for mel in 0..n_mels {
        let (lower, center, upper) = (band_edges[mel], band_edges[mel + 1], band_edges[mel + 2]);
        // Slaney normalization keeps per-band energy comparable
        let norm = 2.0 / (upper - lower);
        for k in 0..n_freqs {
            let freq = k as f32 * f_max / (n_freqs - 1) as f32;
            let weight = if freq <= center {
                (freq - lower) / (center - lower)
            } else {
                (upper - freq) / (upper - center)
            };
            if weight > 0.0 {
                filters[mel * n_freqs + k] = weight * norm;
            }
        }
    }
    filters
}

/// Slaney mel scale: linear below 1 kHz, logarithmic above.
fn hz_to_mel(freq: f32) -> f32 {
    const LIN_STEP: f32 = 200.0 / 3.0;
    if freq < 1000.0 {
        freq / LIN_STEP
    } else {
        15.0 + (freq / 1000.0).ln() * 27.0 / 6.4f32.ln()
    }
}

fn mel_to_hz(mel: f32) -> f32 {
    const LIN_STEP: f32 = 200.0 / 3.0;
    if mel < 15.0 {
        mel * LIN_STEP
    } else {
        1000.0 * ((mel - 15.0) * 6.4f32.ln() / 27.0).exp()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_size_parsing() {
        assert_eq!("medium".parse::<ModelSize>().unwrap(), ModelSize::Medium);
        assert_eq!("LARGE".parse::<ModelSize>().unwrap(), ModelSize::Large);
        assert_eq!(ModelSize::default(), ModelSize::Medium);
        assert!("invalid".parse::<ModelSize>().is_err());
    }

    #[test]
    fn test_model_info() {
        let info = ModelInfo::new(ModelSize::Medium);
        assert_eq!(info.name, "medium");
        assert_eq!(info.size_mb, 769);
        assert_eq!(info.performance, "accurate");
        assert!(!info.loaded);
    }

    #[test]
    fn test_mel_scale_round_trip() {
        for freq in [0.0f32, 440.0, 999.0, 1000.0, 4000.0, 8000.0] {
            let back = mel_to_hz(hz_to_mel(freq));
            assert!((back - freq).abs() < 0.5, "{} -> {}", freq, back);
        }
    }

    #[test]
    fn test_mel_filter_bank_shape() {
        let filters = mel_filter_bank(80);
        assert_eq!(filters.len(), 80 * 201);
        assert!(filters.iter().all(|w| w.is_finite() && *w >= 0.0));
        // every band carries some weight
        for mel in 0..80 {
            let row = &filters[mel * 201..(mel + 1) * 201];
            assert!(row.iter().any(|w| *w > 0.0), "band {} is empty", mel);
        }
    }

    #[test]
    fn test_split_timestamp_runs() {
        const TS: u32 = 1000;
        // <|0.00|> hello(1,2) <|1.00|> <|1.00|> world(3) <|2.00|>
        let tokens = vec![TS, 1, 2, TS + 50, TS + 50, 3, TS + 100];
        let runs = split_timestamp_runs(&tokens, TS, 30_000);
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0], (0, 1000, vec![1, 2]));
        assert_eq!(runs[1], (1000, 2000, vec![3]));
    }

    #[test]
    fn test_split_timestamp_runs_unterminated() {
        const TS: u32 = 1000;
        let tokens = vec![TS + 10, 7, 8, 9];
        let runs = split_timestamp_runs(&tokens, TS, 5000);
        assert_eq!(runs, vec![(200, 5000, vec![7, 8, 9])]);
    }

    #[test]
    fn test_split_timestamp_runs_without_timestamps() {
        const TS: u32 = 1000;
        let runs = split_timestamp_runs(&[5, 6], TS, 1200);
        assert_eq!(runs, vec![(0, 1200, vec![5, 6])]);
    }

    #[test]
    fn test_split_timestamp_runs_clamps_to_window() {
        const TS: u32 = 1000;
        // Ends past the real audio get clamped, runs in the padding are dropped.
        let tokens = vec![TS, 1, TS + 500, TS + 600, 2, TS + 700];
        let runs = split_timestamp_runs(&tokens, TS, 4000);
        assert_eq!(runs, vec![(0, 4000, vec![1])]);
    }

    #[test]
    fn test_loop_guard() {
        assert!(is_looping(&[9, 9], 9));
        assert!(!is_looping(&[9, 8], 9));
        assert!(is_looping(&[1, 2, 3, 1, 2], 3));
        assert!(!is_looping(&[1, 2, 3, 1, 2], 4));
        assert!(!is_looping(&[], 1));
    }

    #[test]
    fn test_temperature_ladder_escalates() {
        // first pass greedy, then strictly increasing up to 1.0
        assert_eq!(TEMPERATURES[0], 0.0);
        assert!(TEMPERATURES.windows(2).all(|pair| pair[0] < pair[1]));
        assert_eq!(*TEMPERATURES.last().unwrap(), 1.0);
    }

    #[test]
    fn test_retry_sampler_follows_dominant_logit() {
        // a near-certain token must win at every retry temperature
        let logits = Tensor::new(&[14.0f32, -14.0, -14.0, -14.0], &Device::Cpu).unwrap();
        for &temperature in &TEMPERATURES[1..] {
            let mut sampler = LogitsProcessor::new(SAMPLING_SEED, Some(temperature), None);
            assert_eq!(sampler.sample(&logits).unwrap(), 0, "t={}", temperature);
        }
    }
}
