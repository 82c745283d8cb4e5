use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::Utc;

use crate::error::AppError;
use crate::middleware::auth::SessionUser;
use crate::validation::{validate_initiation, InitiateTransactionRequest, ValidationError};
use crate::AppState;

/// Record a payment the user is about to make. The payer is always the
/// session user; amounts are re-checked here whatever the client computed.
pub async fn initiate_transaction(
    State(state): State<AppState>,
    SessionUser(payer_id): SessionUser,
    Json(request): Json<InitiateTransactionRequest>,
) -> Result<impl IntoResponse, AppError> {
    let new = validate_initiation(&request, &payer_id, &state.config.commission.redemption_cap)?;
    let now = Utc::now();

    if new.coins_applied > 0 {
        let redeemable = state.ledger.redeemable(&payer_id, now).await?;
        if new.coins_applied > redeemable {
            return Err(ValidationError::new(
                "coinsApplied",
                format!("exceeds redeemable balance of {}", redeemable),
            )
            .into());
        }
    }

    let tx = state.transactions.insert(&new, now).await?;
    tracing::info!(
        transaction_id = %tx.id,
        user_id = %tx.payer_id,
        merchant_id = %tx.merchant_id,
        amount = %tx.gross_amount,
        coins_applied = tx.coins_applied,
        "transaction initiated"
    );

    Ok((StatusCode::CREATED, Json(tx)))
}

pub async fn get_transaction(
    State(state): State<AppState>,
    SessionUser(user_id): SessionUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    // Someone else's transaction looks exactly like a missing one.
    let tx = state
        .transactions
        .get(&id)
        .await?
        .filter(|tx| tx.payer_id == user_id)
        .ok_or_else(|| AppError::NotFound(format!("Transaction {} not found", id)))?;

    Ok(Json(tx))
}
