use std::collections::HashMap;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Form, Json};
use serde_json::json;

use crate::error::AppError;
use crate::utils::sanitize::sanitize_fields;
use crate::AppState;

/// Gateway payment callback (form encoded).
///
/// 200 for every handled outcome, including duplicates and declines; 401 on
/// a bad signature; 404 for an unknown transaction; 500 otherwise.
pub async fn payment_callback(
    State(state): State<AppState>,
    Form(fields): Form<HashMap<String, String>>,
) -> Result<impl IntoResponse, AppError> {
    tracing::info!(fields = %sanitize_fields(&fields), "gateway callback received");

    // Settlement runs on its own task so a client hanging up cannot cancel it
    // halfway.
    let orchestrator = state.orchestrator.clone();
    let outcome = tokio::spawn(async move { orchestrator.handle_callback(&fields).await })
        .await
        .map_err(|e| AppError::Internal(format!("settlement task aborted: {}", e)))??;

    let tx = outcome.transaction();
    Ok((
        StatusCode::OK,
        Json(json!({
            "status": outcome.label(),
            "transactionId": tx.id,
            "transactionStatus": tx.status,
            "coinsEarned": tx.coins_earned,
        })),
    ))
}
