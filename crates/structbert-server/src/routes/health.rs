use crate::state::AppState;
use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde_json::{json, Value};
use structbert::models::message::Message;
use structbert::providers::factory;

const TEST_PROMPT: &str = "Say hello in one short sentence.";
const PREVIEW_CHARS: usize = 100;

/// Check the provider is configured and answering with a one-shot generation
async fn connectivity(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    match check(&state).await {
        Ok(report) => (StatusCode::OK, Json(report)),
        Err(error) => {
            tracing::warn!("provider check failed: {}", error);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"status": "error", "error": error})),
            )
        }
    }
}

async fn check(state: &AppState) -> Result<Value, String> {
    let provider_type = state.provider_config.provider_type();
    let provider = factory::get_provider(state.provider_config.clone()).map_err(|e| e.to_string())?;

    let (message, _usage) = provider
        .complete("", &[Message::user().with_text(TEST_PROMPT)], &[])
        .await
        .map_err(|e| e.to_string())?;
    let preview: String = message.text().chars().take(PREVIEW_CHARS).collect();

    Ok(json!({
        "status": "success",
        "message": format!("{} API is working", provider_type),
        "model": provider.model(),
        "test_response": preview,
    }))
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/test", get(connectivity))
        .with_state(state)
}
