// ---------------------------------------------------------------------------
// handlers/llm.rs - REST bridge to the upstream chat API
// ---------------------------------------------------------------------------

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures_util::{Stream, StreamExt};

use super::ApiError;
use crate::auth::SessionPrincipal;
use crate::llm::prompts::LlmTask;
use crate::llm::relay::{RelayEvent, relay};
use crate::llm::sse::DONE_SENTINEL;
use crate::llm::{ChatRequest, LlmError, StreamChunk};
use crate::models::{LlmModelsResponse, LlmQueryRequest, LlmQueryResponse, StreamDeltaEvent, UsageSummary};
use crate::state::AppState;

fn build_request(state: &AppState, body: Result<Json<LlmQueryRequest>, JsonRejection>) -> Result<ChatRequest, ApiError> {
    let Json(req) = body.map_err(|e| ApiError::BadRequest(format!("Invalid request body: {}", e.body_text())))?;
    let task = LlmTask::from_query(req.kind, req.payload).map_err(ApiError::BadRequest)?;
    let model = req
        .model
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| state.config.llm.default_model.clone());

    let mut chat = ChatRequest::new(model, task.messages());
    if let Some(options) = req.options {
        chat.temperature = options.temperature;
        chat.top_p = options.top_p;
        chat.max_tokens = options.max_tokens;
    }
    Ok(chat)
}

/// POST /api/llm/query - one-shot completion.
pub async fn llm_query(
    State(state): State<AppState>,
    SessionPrincipal(user_id): SessionPrincipal,
    body: Result<Json<LlmQueryRequest>, JsonRejection>,
) -> Result<Json<LlmQueryResponse>, ApiError> {
    let chat = build_request(&state, body)?;
    let requested_model = chat.model.clone();
    tracing::info!(user_id = %user_id, model = %requested_model, "llm query");

    let response = state.llm.complete(chat).await?;
    let result = response
        .first_text()
        .filter(|t| !t.is_empty())
        .ok_or(LlmError::EmptyResult)?
        .to_string();

    Ok(Json(LlmQueryResponse {
        result,
        model: if response.model.is_empty() { requested_model } else { response.model },
        usage: response.usage.map(UsageSummary::from).unwrap_or_default(),
    }))
}

fn delta_event(chunk: StreamChunk) -> Event {
    let payload = StreamDeltaEvent {
        delta: chunk.content().to_string(),
        finish_reason: chunk.finish_reason().map(str::to_string),
        usage: chunk.usage.map(UsageSummary::from),
        id: chunk.id,
        model: chunk.model,
    };
    match serde_json::to_string(&payload) {
        Ok(json) => Event::default().data(json),
        // StreamDeltaEvent has only string/number fields.
        Err(_) => Event::default().comment("unserializable delta"),
    }
}

/// POST /api/llm/stream - one SSE event per delta unit, then `[DONE]`.
/// An aborted upstream ends the body with an error and no `[DONE]`.
pub async fn llm_stream(
    State(state): State<AppState>,
    SessionPrincipal(user_id): SessionPrincipal,
    body: Result<Json<LlmQueryRequest>, JsonRejection>,
) -> Result<Sse<impl Stream<Item = Result<Event, LlmError>>>, ApiError> {
    let chat = build_request(&state, body)?;
    tracing::info!(user_id = %user_id, model = %chat.model, "llm stream");

    let events = relay(state.llm.clone(), chat).map(|item| {
        item.map(|event| match event {
            RelayEvent::Delta(chunk) => delta_event(chunk),
            RelayEvent::Done(_) => Event::default().data(DONE_SENTINEL),
        })
    });

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

/// GET /api/llm/models - upstream model ids, cached for 60 s.
pub async fn llm_models(
    State(state): State<AppState>,
    SessionPrincipal(_): SessionPrincipal,
) -> Result<Json<LlmModelsResponse>, ApiError> {
    if let Some(models) = state.model_cache.read().await.fresh() {
        return Ok(Json(LlmModelsResponse { models: models.to_vec() }));
    }

    let models = state.llm.list_models().await?;
    state.model_cache.write().await.store(models.clone());
    tracing::debug!(count = models.len(), "model list refreshed");
    Ok(Json(LlmModelsResponse { models }))
}

