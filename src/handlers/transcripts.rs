//! # Transcript REST API Handlers
//!
//! The upload-to-export lifecycle:
//!
//! - `POST /transcripts` - Upload an audio file and transcribe it
//! - `GET /transcripts/{id}` - Read one page of segments
//! - `PUT /transcripts/{id}/segments/{index}` - Edit a segment's text
//! - `GET /transcripts/{id}/export` - Download as SRT, VTT or plain text
//! - `DELETE /transcripts/{id}` - Drop the stored transcript
//!
//! Transcription is synchronous: the upload request returns the finished
//! transcript's first page. Uploads are buffered in memory and never
//! written to disk.

use crate::audio::{
    decode_audio, is_supported_extension, prepare_for_transcription, SUPPORTED_EXTENSIONS,
};
use crate::error::{AppError, AppResult};
use crate::export::ExportFormat;
use crate::state::AppState;
use crate::transcript::Transcript;
use crate::transcription::language::parse_language_hint;
use crate::transcription::model::ModelSize;
use crate::transcription::registry::{current_timestamp, ModelStatus};
use actix_web::http::header::{ContentDisposition, DispositionParam, DispositionType};
use actix_web::{web, HttpResponse};
use futures_util::stream::StreamExt;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

/// Query parameters for paginated reads.
#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub page: Option<usize>,
    pub page_size: Option<usize>,
}

/// Body for segment edits.
#[derive(Debug, Deserialize)]
pub struct EditSegmentRequest {
    pub text: String,
}

/// Query parameters for exports.
#[derive(Debug, Deserialize)]
pub struct ExportQuery {
    pub format: String,
}

/// Fields accepted by the upload form.
struct UploadForm {
    audio: Vec<u8>,
    filename: String,
    language: Option<String>,
    model_size: Option<String>,
}

/// Upload an audio file and transcribe it synchronously.
///
/// ## Endpoint: `POST /api/v1/transcripts`
///
/// ## Request:
/// Multipart form data with fields:
/// - `audio` (file, required): wav, mp3, ogg or m4a
/// - `language` (text, optional): ISO code or name, empty/"auto" detects
/// - `model_size` (text, optional): overrides the configured default
///
/// ## Response: `201 Created`
/// The stored transcript with its first page of segments.
pub async fn create_transcript(
    app_state: web::Data<AppState>,
    payload: actix_multipart::Multipart,
) -> AppResult<HttpResponse> {
    let config = app_state.get_config();
    let max_bytes = config.max_upload_bytes();

    let form = read_upload_form(payload, max_bytes).await?;

    let language_hint = match form.language.as_deref() {
        Some(raw) => parse_language_hint(raw)
            .map_err(|e| AppError::ValidationError(e.to_string()))?,
        None => None,
    };

    let model_size = match form.model_size.as_deref() {
        Some(raw) => raw
            .parse::<ModelSize>()
            .map_err(|e| AppError::ValidationError(format!("Invalid model size: {}", e)))?,
        None => config.default_model_size(),
    };

    // Decode before touching the model so bad uploads fail fast and cheap.
    let decoded = decode_audio(form.audio, &form.filename)?;
    let audio_duration = decoded.duration_seconds() as f64;
    let samples = prepare_for_transcription(decoded);

    ensure_model_ready(&app_state, model_size).await?;

    app_state.increment_active_transcriptions();
    let result = app_state
        .engine
        .transcribe(&samples, language_hint, model_size)
        .await;
    app_state.decrement_active_transcriptions();

    let output = match result {
        Ok(output) => output,
        Err(e) => {
            app_state
                .registry
                .update_model_metrics(model_size, audio_duration, 0, false)
                .await;
            return Err(AppError::Internal(format!("Transcription failed: {}", e)));
        }
    };

    app_state
        .registry
        .update_model_metrics(
            model_size,
            output.audio_duration,
            output.processing_time_ms,
            true,
        )
        .await;

    let transcript = Transcript::new(
        form.filename,
        output.model,
        output.language,
        output.language_detected,
        output.audio_duration,
        output.processing_time_ms,
        output.segments,
    );

    let page_size = config.transcripts.page_size;
    let body = transcript_response(&transcript, 1, page_size)?;
    app_state.transcripts.insert(transcript)?;

    Ok(HttpResponse::Created().json(body))
}

/// Read one page of a stored transcript.
///
/// ## Endpoint: `GET /api/v1/transcripts/{id}?page=1&page_size=50`
///
/// Pages are 1-based; an out-of-range page is a 404.
pub async fn get_transcript(
    app_state: web::Data<AppState>,
    path: web::Path<Uuid>,
    query: web::Query<PageQuery>,
) -> AppResult<HttpResponse> {
    let id = path.into_inner();
    let transcript = app_state
        .transcripts
        .get(&id)
        .ok_or_else(|| AppError::NotFound(format!("Transcript {} not found", id)))?;

    let page = query.page.unwrap_or(1);
    let page_size = match query.page_size {
        Some(0) => {
            return Err(AppError::ValidationError(
                "page_size must be greater than 0".to_string(),
            ))
        }
        Some(size) => size,
        None => app_state.get_config().transcripts.page_size,
    };

    let body = transcript_response(&transcript, page, page_size)?;
    Ok(HttpResponse::Ok().json(body))
}

/// Replace the text of one segment.
///
/// ## Endpoint: `PUT /api/v1/transcripts/{id}/segments/{index}`
///
/// ## Request Body:
/// ```json
/// { "text": "corrected wording" }
/// ```
///
/// Timestamps are immutable; only the text changes, so segment order is
/// preserved no matter what the client sends.
pub async fn edit_segment(
    app_state: web::Data<AppState>,
    path: web::Path<(Uuid, usize)>,
    body: web::Json<EditSegmentRequest>,
) -> AppResult<HttpResponse> {
    let (id, index) = path.into_inner();
    let segment = app_state
        .transcripts
        .update_segment(&id, index, body.into_inner().text)?;

    Ok(HttpResponse::Ok().json(json!({
        "index": index,
        "segment": segment,
        "timestamp": chrono::Utc::now().to_rfc3339()
    })))
}

/// Download the transcript in a subtitle or text format.
///
/// ## Endpoint: `GET /api/v1/transcripts/{id}/export?format=srt`
///
/// Formats: `srt`, `vtt`, `txt`. The response is an attachment with the
/// format's content type.
pub async fn export_transcript(
    app_state: web::Data<AppState>,
    path: web::Path<Uuid>,
    query: web::Query<ExportQuery>,
) -> AppResult<HttpResponse> {
    let id = path.into_inner();
    let format: ExportFormat = query
        .format
        .parse()
        .map_err(|e: anyhow::Error| AppError::ValidationError(e.to_string()))?;

    let transcript = app_state
        .transcripts
        .get(&id)
        .ok_or_else(|| AppError::NotFound(format!("Transcript {} not found", id)))?;

    let document = format.render(transcript.segments());

    Ok(HttpResponse::Ok()
        .content_type(format.content_type())
        .insert_header(ContentDisposition {
            disposition: DispositionType::Attachment,
            parameters: vec![DispositionParam::Filename(format.download_filename())],
        })
        .body(document))
}

/// Drop a stored transcript.
///
/// ## Endpoint: `DELETE /api/v1/transcripts/{id}`
pub async fn delete_transcript(
    app_state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> AppResult<HttpResponse> {
    let id = path.into_inner();
    if !app_state.transcripts.remove(&id) {
        return Err(AppError::NotFound(format!("Transcript {} not found", id)));
    }

    Ok(HttpResponse::Ok().json(json!({
        "deleted": true,
        "id": id,
        "timestamp": chrono::Utc::now().to_rfc3339()
    })))
}

/// Load `size` into the shared engine if it is not resident yet, keeping
/// the registry's lifecycle records in step.
///
/// This check is advisory; `TranscriptionEngine::transcribe` confirms the
/// size again under the write lock before decoding.
async fn ensure_model_ready(app_state: &AppState, size: ModelSize) -> AppResult<()> {
    if app_state.engine.loaded_model().await == Some(size) {
        return Ok(());
    }

    if !app_state.registry.can_load_model(size).await {
        return Err(AppError::ValidationError(format!(
            "Loading the {} model would exceed the memory budget; unload the current model first",
            size
        )));
    }

    app_state
        .registry
        .update_model_status(size, ModelStatus::Loading)
        .await;

    match app_state.engine.load_model(size).await {
        Ok(()) => {
            app_state
                .registry
                .update_model_status(
                    size,
                    ModelStatus::Loaded {
                        loaded_at: current_timestamp(),
                        memory_usage_bytes: size.size_mb() as usize * 1024 * 1024,
                    },
                )
                .await;
            Ok(())
        }
        Err(e) => {
            app_state
                .registry
                .update_model_status(
                    size,
                    ModelStatus::Error {
                        message: e.to_string(),
                        error_at: current_timestamp(),
                    },
                )
                .await;
            Err(AppError::Internal(format!("Failed to load model: {}", e)))
        }
    }
}

/// Drain the multipart payload into an [`UploadForm`], enforcing the size
/// cap while streaming so oversized uploads stop early.
async fn read_upload_form(
    mut payload: actix_multipart::Multipart,
    max_bytes: usize,
) -> AppResult<UploadForm> {
    let mut audio: Option<Vec<u8>> = None;
    let mut filename: Option<String> = None;
    let mut language: Option<String> = None;
    let mut model_size: Option<String> = None;

    while let Some(item) = payload.next().await {
        let mut field = item
            .map_err(|e| AppError::ValidationError(format!("Multipart error: {}", e)))?;

        let content_disposition = field
            .content_disposition()
            .ok_or_else(|| AppError::ValidationError("Missing content disposition".to_string()))?;

        let field_name = content_disposition
            .get_name()
            .ok_or_else(|| AppError::ValidationError("Missing field name".to_string()))?
            .to_string();

        match field_name.as_str() {
            "audio" => {
                filename = content_disposition.get_filename().map(|s| s.to_string());

                // Reject on the filename before buffering anything; the
                // decoder re-checks against the actual bytes later.
                if let Some(name) = filename.as_deref() {
                    if !is_supported_extension(name) {
                        return Err(AppError::UnsupportedMedia(format!(
                            "'{}' is not one of {}",
                            name,
                            SUPPORTED_EXTENSIONS.join(", ")
                        )));
                    }
                }

                let mut bytes = Vec::new();
                while let Some(chunk) = field.next().await {
                    let chunk = chunk
                        .map_err(|e| AppError::ValidationError(format!("Upload error: {}", e)))?;
                    if bytes.len() + chunk.len() > max_bytes {
                        return Err(AppError::PayloadTooLarge(format!(
                            "Upload exceeds the {} MB limit",
                            max_bytes / (1024 * 1024)
                        )));
                    }
                    bytes.extend_from_slice(&chunk);
                }
                audio = Some(bytes);
            }
            "language" => language = Some(read_text_field(&mut field).await?),
            "model_size" => model_size = Some(read_text_field(&mut field).await?),
            // Unknown fields are drained and ignored.
            _ => while field.next().await.is_some() {},
        }
    }

    let audio =
        audio.ok_or_else(|| AppError::ValidationError("No audio file provided".to_string()))?;
    let filename =
        filename.ok_or_else(|| AppError::ValidationError("Audio file has no filename".to_string()))?;

    Ok(UploadForm {
        audio,
        filename,
        language,
        model_size,
    })
}

async fn read_text_field(field: &mut actix_multipart::Field) -> AppResult<String> {
    let mut bytes = Vec::new();
    while let Some(chunk) = field.next().await {
        let chunk =
            chunk.map_err(|e| AppError::ValidationError(format!("Upload error: {}", e)))?;
        bytes.extend_from_slice(&chunk);
    }
    String::from_utf8(bytes)
        .map_err(|_| AppError::ValidationError("Form field is not valid UTF-8".to_string()))
}

/// JSON shape shared by the create and read endpoints: metadata plus one
/// page of segments.
fn transcript_response(
    transcript: &Transcript,
    page: usize,
    page_size: usize,
) -> AppResult<serde_json::Value> {
    let segments = transcript.page(page, page_size).ok_or_else(|| {
        AppError::NotFound(format!(
            "Page {} out of range (transcript has {} page(s))",
            page,
            transcript.page_count(page_size)
        ))
    })?;

    Ok(json!({
        "id": transcript.id,
        "source_filename": transcript.source_filename,
        "model": transcript.model.to_string(),
        "language": transcript.language.code(),
        "language_name": transcript.language.name(),
        "language_detected": transcript.language_detected,
        "audio_duration_seconds": transcript.audio_duration_seconds,
        "processing_time_ms": transcript.processing_time_ms,
        "segment_count": transcript.segment_count(),
        "page": page,
        "page_size": page_size,
        "page_count": transcript.page_count(page_size),
        "segments": segments,
        "created_at": transcript.created_at.to_rfc3339(),
        "updated_at": transcript.updated_at.to_rfc3339()
    }))
}
