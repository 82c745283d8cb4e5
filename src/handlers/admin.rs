use axum::{extract::State, response::IntoResponse, Json};
use serde::Deserialize;
use serde_json::json;

use crate::error::AppError;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct AdminCoinRequest {
    pub target_user_id: String,
    pub coin_amount: i64,
    pub reason: String,
}

pub async fn mint_coins(
    State(state): State<AppState>,
    Json(payload): Json<AdminCoinRequest>,
) -> Result<impl IntoResponse, AppError> {
    let adjustment = state
        .ledger
        .admin_mint(&payload.target_user_id, payload.coin_amount, &payload.reason)
        .await?;

    Ok(Json(json!({
        "success": true,
        "minted": adjustment.amount,
        "balance_after": adjustment.balance_after,
    })))
}

pub async fn burn_coins(
    State(state): State<AppState>,
    Json(payload): Json<AdminCoinRequest>,
) -> Result<impl IntoResponse, AppError> {
    let adjustment = state
        .ledger
        .admin_burn(&payload.target_user_id, payload.coin_amount, &payload.reason)
        .await?;

    Ok(Json(json!({
        "success": true,
        "burned": adjustment.amount,
        "balance_after": adjustment.balance_after,
    })))
}
