//! Authenticity checks for inbound calls.
//!
//! Two independent modes: the gateway's HMAC-SHA512 over a fixed field order,
//! and a static pre-shared token for service-to-service calls. Both fail
//! closed.

use std::collections::HashMap;

use hmac::{Hmac, Mac};
use sha2::{Sha256, Sha512};
use thiserror::Error;

use crate::config::SecretsConfig;

type HmacSha512 = Hmac<Sha512>;
type HmacSha256 = Hmac<Sha256>;

/// Header carrying the internal service token.
pub const INTERNAL_TOKEN_HEADER: &str = "x-internal-token";

/// Empty slots between `status` and `email` in the hash input.
const RESERVED_SLOTS: usize = 9;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("missing required field '{0}'")]
    MissingField(&'static str),

    #[error("gateway salt is not configured")]
    SecretNotConfigured,

    #[error("hash is not valid hex")]
    MalformedHash,

    #[error("merchant key does not match")]
    MerchantKeyMismatch,

    #[error("hash does not match")]
    Mismatch,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InternalAuthError {
    #[error("internal token header is missing")]
    Missing,

    #[error("internal token does not match")]
    Mismatch,

    #[error("internal token is not configured")]
    NotConfigured,
}

/// The subset of gateway callback fields this service acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayCallback {
    pub key: String,
    pub txnid: String,
    pub amount: String,
    pub productinfo: String,
    pub firstname: String,
    pub email: String,
    pub status: String,
    pub hash: String,
    pub mihpayid: Option<String>,
    pub error_message: Option<String>,
}

impl GatewayCallback {
    pub fn from_fields(fields: &HashMap<String, String>) -> Result<Self, SignatureError> {
        let required = |name: &'static str| -> Result<String, SignatureError> {
            fields
                .get(name)
                .map(|value| value.trim())
                .filter(|value| !value.is_empty())
                .map(str::to_string)
                .ok_or(SignatureError::MissingField(name))
        };
        let optional = |name: &str| {
            fields
                .get(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        Ok(Self {
            key: required("key")?,
            txnid: required("txnid")?,
            amount: required("amount")?,
            productinfo: required("productinfo")?,
            firstname: required("firstname")?,
            email: required("email")?,
            status: required("status")?,
            hash: required("hash")?,
            mihpayid: optional("mihpayid"),
            error_message: optional("error_Message").or_else(|| optional("error")),
        })
    }

    pub fn is_success(&self) -> bool {
        self.status.eq_ignore_ascii_case("success")
    }
}

/// `salt|status|<9 empty>|email|firstname|productinfo|amount|txnid|key`
pub fn hash_input(salt: &str, callback: &GatewayCallback) -> String {
    let mut parts: Vec<&str> = Vec::with_capacity(RESERVED_SLOTS + 7);
    parts.push(salt);
    parts.push(&callback.status);
    parts.extend(std::iter::repeat("").take(RESERVED_SLOTS));
    parts.extend([
        callback.email.as_str(),
        callback.firstname.as_str(),
        callback.productinfo.as_str(),
        callback.amount.as_str(),
        callback.txnid.as_str(),
        callback.key.as_str(),
    ]);
    parts.join("|")
}

fn callback_mac(salt: &str, callback: &GatewayCallback) -> Result<HmacSha512, SignatureError> {
    let mut mac = HmacSha512::new_from_slice(salt.as_bytes())
        .map_err(|_| SignatureError::SecretNotConfigured)?;
    mac.update(hash_input(salt, callback).as_bytes());
    Ok(mac)
}

/// Lower-case hex authentication code for `callback`.
pub fn sign(salt: &str, callback: &GatewayCallback) -> Result<String, SignatureError> {
    Ok(hex::encode(callback_mac(salt, callback)?.finalize().into_bytes()))
}

#[derive(Debug, Clone, Default)]
pub struct SignatureVerifier {
    salt: Option<String>,
    merchant_key: Option<String>,
    internal_token: Option<String>,
}

impl SignatureVerifier {
    pub fn new(secrets: &SecretsConfig) -> Self {
        Self {
            salt: secrets.gateway_salt.clone(),
            merchant_key: secrets.gateway_merchant_key.clone(),
            internal_token: secrets.internal_token.clone(),
        }
    }

    /// Parse and authenticate raw callback fields.
    pub fn verify_callback(
        &self,
        fields: &HashMap<String, String>,
    ) -> Result<GatewayCallback, SignatureError> {
        let salt = self.salt.as_deref().ok_or(SignatureError::SecretNotConfigured)?;
        let callback = GatewayCallback::from_fields(fields)?;

        if let Some(expected_key) = &self.merchant_key {
            if !tokens_match(expected_key, &callback.key) {
                return Err(SignatureError::MerchantKeyMismatch);
            }
        }

        let received = hex::decode(callback.hash.to_ascii_lowercase())
            .map_err(|_| SignatureError::MalformedHash)?;

        // verify_slice compares in constant time.
        callback_mac(salt, &callback)?
            .verify_slice(&received)
            .map_err(|_| SignatureError::Mismatch)?;

        Ok(callback)
    }

    pub fn verify_internal_token(&self, presented: Option<&str>) -> Result<(), InternalAuthError> {
        let expected = self
            .internal_token
            .as_deref()
            .ok_or(InternalAuthError::NotConfigured)?;
        let presented = presented.ok_or(InternalAuthError::Missing)?;

        if tokens_match(expected, presented) {
            Ok(())
        } else {
            Err(InternalAuthError::Mismatch)
        }
    }
}

/// Constant-time equality for shared secrets: both values key an HMAC over
/// the same message and the tags are compared with `verify_slice`.
pub fn tokens_match(expected: &str, presented: &str) -> bool {
    const MESSAGE: &[u8] = b"token-equality";

    let tag = |key: &str| {
        HmacSha256::new_from_slice(key.as_bytes()).map(|mut mac| {
            mac.update(MESSAGE);
            mac
        })
    };

    match (tag(expected), tag(presented)) {
        (Ok(expected), Ok(presented)) => presented
            .verify_slice(&expected.finalize().into_bytes())
            .is_ok(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SALT: &str = "test-salt";

    fn fields() -> HashMap<String, String> {
        let mut fields: HashMap<String, String> = [
            ("key", "merchant-key"),
            ("txnid", "txn-001"),
            ("amount", "1000.00"),
            ("productinfo", "Order 42"),
            ("firstname", "Asha"),
            ("email", "asha@example.com"),
            ("status", "success"),
            ("mihpayid", "403993715521"),
            ("hash", ""),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let mut unsigned = fields.clone();
        unsigned.insert("hash".to_string(), "00".to_string());
        let callback = GatewayCallback::from_fields(&unsigned).unwrap();
        fields.insert("hash".to_string(), sign(SALT, &callback).unwrap());
        fields
    }

    fn verifier() -> SignatureVerifier {
        SignatureVerifier::new(&SecretsConfig {
            gateway_salt: Some(SALT.to_string()),
            gateway_merchant_key: Some("merchant-key".to_string()),
            internal_token: Some("internal-secret".to_string()),
            ..SecretsConfig::default()
        })
    }

    #[test]
    fn hash_input_follows_field_order() {
        let callback = GatewayCallback::from_fields(&fields()).unwrap();
        assert_eq!(
            hash_input(SALT, &callback),
            "test-salt|success||||||||||asha@example.com|Asha|Order 42|1000.00|txn-001|merchant-key"
        );
    }

    #[test]
    fn accepts_a_correctly_signed_callback() {
        let callback = verifier().verify_callback(&fields()).unwrap();
        assert_eq!(callback.txnid, "txn-001");
        assert_eq!(callback.mihpayid.as_deref(), Some("403993715521"));
        assert!(callback.is_success());
    }

    #[test]
    fn accepts_upper_case_hex() {
        let mut fields = fields();
        let upper = fields["hash"].to_ascii_uppercase();
        fields.insert("hash".to_string(), upper);
        assert!(verifier().verify_callback(&fields).is_ok());
    }

    #[test]
    fn rejects_an_altered_amount() {
        let mut fields = fields();
        fields.insert("amount".to_string(), "1.00".to_string());
        assert_eq!(verifier().verify_callback(&fields), Err(SignatureError::Mismatch));
    }

    #[test]
    fn rejects_an_altered_status() {
        let mut fields = fields();
        fields.insert("status".to_string(), "failure".to_string());
        assert_eq!(verifier().verify_callback(&fields), Err(SignatureError::Mismatch));
    }

    #[test]
    fn rejects_missing_fields() {
        let mut fields = fields();
        fields.remove("email");
        assert_eq!(
            verifier().verify_callback(&fields),
            Err(SignatureError::MissingField("email"))
        );
    }

    #[test]
    fn rejects_when_salt_is_unconfigured() {
        let verifier = SignatureVerifier::default();
        assert_eq!(
            verifier.verify_callback(&fields()),
            Err(SignatureError::SecretNotConfigured)
        );
    }

    #[test]
    fn rejects_foreign_merchant_key() {
        let mut fields = fields();
        fields.insert("key".to_string(), "someone-else".to_string());
        assert_eq!(
            verifier().verify_callback(&fields),
            Err(SignatureError::MerchantKeyMismatch)
        );
    }

    #[test]
    fn rejects_non_hex_hash() {
        let mut fields = fields();
        fields.insert("hash".to_string(), "not-hex".to_string());
        assert_eq!(verifier().verify_callback(&fields), Err(SignatureError::MalformedHash));
    }

    #[test]
    fn internal_token_modes() {
        let verifier = verifier();
        assert!(verifier.verify_internal_token(Some("internal-secret")).is_ok());
        assert_eq!(
            verifier.verify_internal_token(Some("internal-secreT")),
            Err(InternalAuthError::Mismatch)
        );
        assert_eq!(verifier.verify_internal_token(None), Err(InternalAuthError::Missing));
        assert_eq!(
            SignatureVerifier::default().verify_internal_token(Some("anything")),
            Err(InternalAuthError::NotConfigured)
        );
    }

    #[test]
    fn tokens_match_is_exact() {
        assert!(tokens_match("abc", "abc"));
        assert!(!tokens_match("abc", "abcd"));
        assert!(!tokens_match("abc", ""));
    }
}
