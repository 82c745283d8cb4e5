use axum::{extract::State, response::IntoResponse, Json};
use chrono::Utc;

use crate::error::AppError;
use crate::middleware::auth::SessionUser;
use crate::AppState;

/// The session user's balance and live batches.
pub async fn get_coins(
    State(state): State<AppState>,
    SessionUser(user_id): SessionUser,
) -> Result<impl IntoResponse, AppError> {
    let summary = state.ledger.summary(&user_id, Utc::now()).await?;
    Ok(Json(summary))
}
