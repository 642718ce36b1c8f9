use crate::{
    auth::ExtractAuth,
    error::{AppError, AppResult},
    llm,
};
use axum::{http::StatusCode, routing::post, Json, Router};
use serde::{Deserialize, Serialize};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChatRequest {
    message: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ChatResponse {
    response: String,
}

async fn chat(
    ExtractAuth(_caller): ExtractAuth,
    Json(req): Json<ChatRequest>,
) -> AppResult<Json<ChatResponse>> {
    if req.message.trim().is_empty() {
        return Err(AppError::status(
            StatusCode::BAD_REQUEST,
            "Message is required",
        ));
    }

    let response = llm::generate(&req.message).await?;
    Ok(Json(ChatResponse { response }))
}

pub fn app() -> Router {
    Router::new().route("/chat", post(chat))
}
