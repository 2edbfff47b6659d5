use crate::pipeline::{self, CallOutcome, PipelineReport};
use crate::types::AppState;
use crate::uniq_types::WebhookEnvelope;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use std::sync::Arc;
use tracing::{error, trace};

/// Uniq webhook endpoint.  Every handled event answers HTTP 200 with its
/// terminal status in the body — the sender retries aggressively on non-200,
/// so only an unparseable body earns a 400.
pub async fn webhook_handler(
    State(app_state): State<Arc<AppState>>,
    body: String,
) -> impl IntoResponse {
    trace!(body = %body, "webhook request body");
    let envelope = match serde_json::from_str::<WebhookEnvelope>(&body) {
        Ok(envelope) => envelope,
        Err(e) => {
            error!(error = %e, "failed to deserialize uniq webhook payload");
            return (
                StatusCode::BAD_REQUEST,
                Json(PipelineReport {
                    status: CallOutcome::Error,
                    detail: Some(e.to_string()),
                }),
            );
        }
    };

    let report = pipeline::process_event(envelope.payload, &app_state).await;
    (StatusCode::OK, Json(report))
}
