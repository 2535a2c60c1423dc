//! Document upload answered with a live progress stream

use axum::{
    extract::{multipart::MultipartRejection, Multipart, State},
    http::{header, HeaderName},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
};
use bytes::Bytes;
use futures::StreamExt;
use std::convert::Infallible;

use crate::error::{Error, Result};
use crate::ingestion::{check_filename, AnalysisRequest, UploadRejection};
use crate::processing::AnalysisStream;
use crate::server::state::AppState;

const X_ACCEL_BUFFERING: HeaderName = HeaderName::from_static("x-accel-buffering");

struct Upload {
    filename: String,
    data: Bytes,
}

/// POST /analyze - Queue a PDF and stream its progress
///
/// Validation failures are reported inside the stream, after the initial
/// acknowledgment, and never reach the queue.
pub async fn analyze(
    State(state): State<AppState>,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Result<Response> {
    let upload = match multipart {
        Ok(multipart) => read_upload(multipart).await?,
        Err(rejection) => {
            tracing::debug!("Analyze request without multipart body: {}", rejection);
            None
        }
    };

    let stream = match upload {
        None => AnalysisStream::rejected(UploadRejection::NoFile.message()),
        Some(upload) => {
            let config = state.config();
            match check_filename(&upload.filename, &config.analysis.allowed_extensions) {
                Err(rejection) => {
                    tracing::info!(
                        "Rejected upload '{}': {}",
                        upload.filename,
                        rejection.message()
                    );
                    AnalysisStream::rejected(rejection.message())
                }
                Ok(()) => {
                    tracing::info!(
                        "Queueing {} ({} bytes)",
                        upload.filename,
                        upload.data.len()
                    );
                    let queue = state.queue().clone();
                    let (task_id, progress) = queue.submit_with_progress(AnalysisRequest {
                        filename: upload.filename.clone(),
                        data: upload.data,
                    });
                    AnalysisStream::new(
                        queue,
                        task_id,
                        progress,
                        upload.filename,
                        config.stream.clone(),
                    )
                }
            }
        }
    };

    Ok(event_stream_response(stream))
}

/// Find the `file` field, if any
async fn read_upload(mut multipart: Multipart) -> Result<Option<Upload>> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| Error::invalid_input(format!("Failed to read multipart field: {}", e)))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let filename = field.file_name().unwrap_or_default().to_string();
        let data = field
            .bytes()
            .await
            .map_err(|e| Error::invalid_input(format!("Failed to read file {}: {}", filename, e)))?;

        return Ok(Some(Upload { filename, data }));
    }
    Ok(None)
}

fn event_stream_response<R: Send + 'static>(stream: AnalysisStream<R>) -> Response {
    let events = stream
        .into_stream()
        .map(|event| Ok::<_, Infallible>(Event::default().data(event.to_json())));

    (
        [
            (header::CACHE_CONTROL, "no-cache"),
            (X_ACCEL_BUFFERING, "no"),
        ],
        Sse::new(events).keep_alive(KeepAlive::default()),
    )
        .into_response()
}
