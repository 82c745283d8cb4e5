//! Service-to-service routes, behind the internal token.

use axum::{extract::State, response::IntoResponse, Json};
use bigdecimal::BigDecimal;
use serde::Deserialize;
use serde_json::json;

use crate::error::AppError;
use crate::validation::{validate_identifier, TRANSACTION_ID_MAX_LEN};
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpireCoinsRequest {
    pub batch_limit: Option<i64>,
}

pub async fn expire_coins(
    State(state): State<AppState>,
    body: Option<Json<ExpireCoinsRequest>>,
) -> Result<impl IntoResponse, AppError> {
    let request = body.map(|Json(request)| request).unwrap_or_default();
    let limit = request.batch_limit.unwrap_or(state.config.expiry.batch_limit);

    let expired = state.expiry.sweep(limit).await?;
    Ok(Json(json!({ "expired": expired })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessReferralRequest {
    pub referee_id: String,
    pub transaction_id: String,
    /// Optional cross-check; qualification always uses the stored amount.
    pub fiat_amount: Option<BigDecimal>,
}

pub async fn process_referral(
    State(state): State<AppState>,
    Json(request): Json<ProcessReferralRequest>,
) -> Result<impl IntoResponse, AppError> {
    let referee_id = validate_identifier("refereeId", &request.referee_id, 128)?;
    let transaction_id = validate_identifier("transactionId", &request.transaction_id, TRANSACTION_ID_MAX_LEN)?;

    let outcome = state
        .referrals
        .process_for_transaction(&referee_id, &transaction_id, request.fiat_amount.as_ref())
        .await?;
    Ok(Json(outcome))
}
