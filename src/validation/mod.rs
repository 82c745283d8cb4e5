use std::fmt;

use bigdecimal::BigDecimal;
use serde::Deserialize;

use crate::domain::NewTransaction;

pub const TRANSACTION_ID_MAX_LEN: usize = 64;
pub const MERCHANT_ID_MAX_LEN: usize = 64;
pub const REASON_MAX_LEN: usize = 255;

/// Upper bound on any payment amount. At the highest reward rate this keeps
/// `amount × basis points` well inside `i64` and every coin column in `BIGINT`.
pub const MAX_AMOUNT: i64 = 1_000_000_000_000;

/// Largest allowed gap between `gross − coins` and `fiat`, in currency units.
pub const ROUNDING_TOLERANCE: i64 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

pub type ValidationResult = Result<(), ValidationError>;

/// Body of a transaction-initiation request from the paying client.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct InitiateTransactionRequest {
    pub transaction_id: String,
    pub merchant_id: String,
    pub gross_amount: BigDecimal,
    pub fiat_amount: BigDecimal,
    pub coins_applied: i64,
}

pub fn sanitize_string(value: &str) -> String {
    value
        .chars()
        .filter(|ch| !ch.is_control())
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn validate_required(field: &'static str, value: &str) -> ValidationResult {
    if value.trim().is_empty() {
        return Err(ValidationError::new(field, "must not be empty"));
    }

    Ok(())
}

pub fn validate_max_len(field: &'static str, value: &str, max_len: usize) -> ValidationResult {
    if value.len() > max_len {
        return Err(ValidationError::new(
            field,
            format!("must be at most {} characters", max_len),
        ));
    }

    Ok(())
}

pub fn validate_identifier(field: &'static str, value: &str, max_len: usize) -> Result<String, ValidationError> {
    let value = sanitize_string(value);
    validate_required(field, &value)?;
    validate_max_len(field, &value, max_len)?;

    if value.contains(' ') {
        return Err(ValidationError::new(field, "must not contain whitespace"));
    }

    Ok(value)
}

pub fn validate_positive_amount(field: &'static str, amount: &BigDecimal) -> ValidationResult {
    if amount <= &BigDecimal::from(0) {
        return Err(ValidationError::new(field, "must be greater than zero"));
    }

    Ok(())
}

pub fn validate_positive_coins(field: &'static str, coins: i64) -> ValidationResult {
    if coins <= 0 {
        return Err(ValidationError::new(field, "must be greater than zero"));
    }

    Ok(())
}

pub fn validate_reason(reason: &str) -> Result<String, ValidationError> {
    let reason = sanitize_string(reason);
    validate_required("reason", &reason)?;
    validate_max_len("reason", &reason, REASON_MAX_LEN)?;
    Ok(reason)
}

/// Server-side check of the amounts a client proposes. Nothing here trusts
/// the client's own arithmetic.
pub fn validate_initiation(
    request: &InitiateTransactionRequest,
    payer_id: &str,
    redemption_cap: &BigDecimal,
) -> Result<NewTransaction, ValidationError> {
    let id = validate_identifier("transactionId", &request.transaction_id, TRANSACTION_ID_MAX_LEN)?;
    let merchant_id = validate_identifier("merchantId", &request.merchant_id, MERCHANT_ID_MAX_LEN)?;

    let zero = BigDecimal::from(0);
    let gross = &request.gross_amount;
    let fiat = &request.fiat_amount;
    let coins = BigDecimal::from(request.coins_applied);

    validate_positive_amount("grossAmount", gross)?;
    if gross > &BigDecimal::from(MAX_AMOUNT) {
        return Err(ValidationError::new(
            "grossAmount",
            format!("must not exceed {}", MAX_AMOUNT),
        ));
    }
    if fiat < &zero {
        return Err(ValidationError::new("fiatAmount", "must not be negative"));
    }
    if request.coins_applied < 0 {
        return Err(ValidationError::new("coinsApplied", "must not be negative"));
    }
    if fiat > gross {
        return Err(ValidationError::new("fiatAmount", "must not exceed grossAmount"));
    }

    let gap = (gross - &coins) - fiat;
    if gap.abs() > BigDecimal::from(ROUNDING_TOLERANCE) {
        return Err(ValidationError::new(
            "fiatAmount",
            "must equal grossAmount minus coinsApplied",
        ));
    }

    if coins > gross * redemption_cap {
        return Err(ValidationError::new(
            "coinsApplied",
            format!("must not exceed {} of grossAmount", redemption_cap),
        ));
    }

    Ok(NewTransaction {
        id,
        payer_id: payer_id.to_string(),
        merchant_id,
        gross_amount: gross.clone(),
        fiat_amount: fiat.clone(),
        coins_applied: request.coins_applied,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn cap() -> BigDecimal {
        BigDecimal::from_str("0.8").unwrap()
    }

    fn request(gross: &str, fiat: &str, coins: i64) -> InitiateTransactionRequest {
        InitiateTransactionRequest {
            transaction_id: "txn-001".to_string(),
            merchant_id: "merchant-9".to_string(),
            gross_amount: BigDecimal::from_str(gross).unwrap(),
            fiat_amount: BigDecimal::from_str(fiat).unwrap(),
            coins_applied: coins,
        }
    }

    #[test]
    fn validates_required_field() {
        assert!(validate_required("field", "value").is_ok());
        assert!(validate_required("field", "   ").is_err());
    }

    #[test]
    fn sanitizes_string() {
        assert_eq!(sanitize_string("  hello\tworld  "), "hello world");
        assert_eq!(sanitize_string("ab\u{0000}cd\u{0007}"), "abcd");
    }

    #[test]
    fn accepts_consistent_amounts() {
        let tx = validate_initiation(&request("500.00", "400.00", 100), "payer-1", &cap()).unwrap();
        assert_eq!(tx.id, "txn-001");
        assert_eq!(tx.payer_id, "payer-1");
        assert_eq!(tx.coins_applied, 100);
    }

    #[test]
    fn tolerates_one_unit_of_rounding() {
        assert!(validate_initiation(&request("500.40", "400.00", 100), "p", &cap()).is_ok());
        assert!(validate_initiation(&request("501.50", "400.00", 100), "p", &cap()).is_err());
    }

    #[test]
    fn rejects_non_positive_gross() {
        let err = validate_initiation(&request("0", "0", 0), "p", &cap()).unwrap_err();
        assert_eq!(err.field, "grossAmount");
    }

    #[test]
    fn rejects_negative_parts() {
        assert_eq!(
            validate_initiation(&request("100", "-1", 0), "p", &cap()).unwrap_err().field,
            "fiatAmount"
        );
        assert_eq!(
            validate_initiation(&request("100", "100", -1), "p", &cap()).unwrap_err().field,
            "coinsApplied"
        );
    }

    #[test]
    fn caps_payment_size() {
        let max = MAX_AMOUNT.to_string();
        assert!(validate_initiation(&request(&max, &max, 0), "p", &cap()).is_ok());

        let over = (MAX_AMOUNT + 1).to_string();
        let err = validate_initiation(&request(&over, &over, 0), "p", &cap()).unwrap_err();
        assert_eq!(err.field, "grossAmount");

        let err = validate_initiation(&request("10000000000000000", "10000000000000000", 0), "p", &cap()).unwrap_err();
        assert_eq!(err.field, "grossAmount");
    }

    #[test]
    fn rejects_fiat_above_gross() {
        let err = validate_initiation(&request("100", "100.5", 0), "p", &cap()).unwrap_err();
        assert_eq!(err.field, "fiatAmount");
    }

    #[test]
    fn enforces_redemption_cap() {
        assert!(validate_initiation(&request("100", "20", 80), "p", &cap()).is_ok());
        let err = validate_initiation(&request("100", "19", 81), "p", &cap()).unwrap_err();
        assert_eq!(err.field, "coinsApplied");
    }

    #[test]
    fn rejects_blank_identifiers() {
        let mut req = request("100", "100", 0);
        req.transaction_id = "  ".to_string();
        assert_eq!(validate_initiation(&req, "p", &cap()).unwrap_err().field, "transactionId");
    }

    #[test]
    fn rejects_unknown_fields() {
        let parsed = serde_json::from_str::<InitiateTransactionRequest>(
            r#"{"transactionId":"t","merchantId":"m","grossAmount":10,"fiatAmount":10,"coinsApplied":0,"discount":5}"#,
        );
        assert!(parsed.is_err());
    }
}
