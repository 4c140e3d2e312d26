//! # Single-Shot Translation Endpoint
//!
//! Runs one uploaded recording through the same pipeline the calls use.
//!
//! ## Endpoint: `POST /api/v1/translate`
//!
//! ## Request:
//! Multipart form data:
//! - `file`: WAV or raw 16 kHz mono PCM16LE audio
//! - `source_lang`: spoken language of the recording
//! - `target_lang`: language of the synthesized reply
//!
//! ## Response:
//! `audio/wav` body with percent-encoded `X-Source-Text` and
//! `X-Translated-Text` headers. A recording with no recognisable speech is a
//! 422.

use actix_multipart::{Field, Multipart};
use actix_web::{web, HttpResponse};
use futures_util::stream::StreamExt;

use crate::audio::vad::{FlushTrigger, Segment};
use crate::error::AppError;
use crate::pipeline::Utterance;
use crate::state::AppState;

const MAX_UPLOAD_BYTES: usize = 25 * 1024 * 1024;

#[derive(Debug, Default)]
struct TranslateForm {
    file: Option<Vec<u8>>,
    source_lang: Option<String>,
    target_lang: Option<String>,
}

async fn read_field(field: &mut Field, limit: usize) -> Result<Vec<u8>, AppError> {
    let mut bytes = Vec::new();
    while let Some(chunk) = field.next().await {
        let chunk = chunk?;
        if bytes.len() + chunk.len() > limit {
            return Err(AppError::ValidationError(format!(
                "upload exceeds {} bytes",
                limit
            )));
        }
        bytes.extend_from_slice(&chunk);
    }
    Ok(bytes)
}

async fn read_form(mut payload: Multipart) -> Result<TranslateForm, AppError> {
    let mut form = TranslateForm::default();

    while let Some(item) = payload.next().await {
        let mut field = item?;
        let name = field
            .content_disposition()
            .and_then(|cd| cd.get_name())
            .map(str::to_string)
            .ok_or_else(|| AppError::BadRequest("multipart field without a name".into()))?;

        match name.as_str() {
            "file" => form.file = Some(read_field(&mut field, MAX_UPLOAD_BYTES).await?),
            "source_lang" | "target_lang" => {
                let raw = read_field(&mut field, 64).await?;
                let value = String::from_utf8(raw)
                    .map_err(|_| AppError::BadRequest(format!("'{}' is not UTF-8", name)))?
                    .trim()
                    .to_lowercase();
                if name == "source_lang" {
                    form.source_lang = Some(value);
                } else {
                    form.target_lang = Some(value);
                }
            }
            other => {
                tracing::debug!(field = %other, "Ignoring unknown multipart field");
                read_field(&mut field, MAX_UPLOAD_BYTES).await?;
            }
        }
    }

    Ok(form)
}

fn required<T>(value: Option<T>, name: &str) -> Result<T, AppError> {
    value.ok_or_else(|| AppError::BadRequest(format!("missing multipart field '{}'", name)))
}

pub async fn translate_audio(
    state: web::Data<AppState>,
    payload: Multipart,
) -> Result<HttpResponse, AppError> {
    let form = read_form(payload).await?;
    let audio = required(form.file, "file")?;
    let source_lang = required(form.source_lang, "source_lang")?;
    let target_lang = required(form.target_lang, "target_lang")?;

    if source_lang.is_empty() {
        return Err(AppError::ValidationError("source_lang is empty".into()));
    }
    if !state.supports_language(&target_lang) {
        return Err(AppError::ValidationError(format!(
            "language '{}' is not supported",
            target_lang
        )));
    }

    let samples = state.transcoder.to_canonical(&audio)?;
    let utterance = Utterance::new(
        Segment {
            samples,
            trigger: FlushTrigger::Manual,
        },
        &source_lang,
        &target_lang,
    );

    tracing::info!(
        utterance_id = %utterance.id,
        bytes = audio.len(),
        from = %source_lang,
        to = %target_lang,
        "Single-shot translation request"
    );

    state.metrics.pipeline_started();
    let result = match state
        .orchestrator
        .process_within(&utterance, state.pipeline_timeout())
        .await
    {
        Ok(result) => result,
        Err(e) => {
            state.metrics.pipeline_failed();
            return Err(e.into());
        }
    };

    let Some(wav) = result.audio_bytes else {
        state.metrics.recognition_failed();
        return Err(AppError::Unprocessable("no speech recognised".into()));
    };

    Ok(HttpResponse::Ok()
        .content_type("audio/wav")
        .insert_header((
            "X-Source-Text",
            urlencoding::encode(&result.source_text).into_owned(),
        ))
        .insert_header((
            "X-Translated-Text",
            urlencoding::encode(&result.translated_text).into_owned(),
        ))
        .body(wav))
}
