//! Parsing of the service-account key payload returned by the broker.

use base64::Engine as _;
use serde::Deserialize;

use crate::error::{BrokerError, CloudError};

/// The shape of a cloud service-account key, as embedded (base64-encoded)
/// in the broker's `private_key_data` field.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    #[serde(rename = "private_key_id")]
    pub private_key_id: String,
    #[serde(rename = "private_key")]
    pub private_key: String,
    #[serde(rename = "client_email")]
    pub client_email: String,
    #[serde(rename = "token_uri", default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    "https://oauth2.googleapis.com/token".to_owned()
}

/// Extract, base64-decode, and parse the `private_key_data` field from a
/// broker secret response.
///
/// # Errors
///
/// Returns [`BrokerError::MissingField`] if the field is absent, or wraps
/// base64/JSON failures from [`CloudError`] into the same error surface
/// reported by a refresh attempt.
pub fn extract_service_account_key(
    path: &str,
    data: &serde_json::Map<String, serde_json::Value>,
) -> Result<(ServiceAccountKey, Vec<u8>), BrokerError> {
    let encoded = data
        .get("private_key_data")
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| BrokerError::MissingField {
            path: path.to_owned(),
            field: "private_key_data".to_owned(),
        })?;

    let raw = decode_key_bytes(encoded).map_err(|e| BrokerError::MalformedField {
        path: path.to_owned(),
        field: "private_key_data".to_owned(),
        reason: e.to_string(),
    })?;

    let key: ServiceAccountKey = serde_json::from_slice(&raw).map_err(BrokerError::Malformed)?;

    Ok((key, raw))
}

/// Base64-decode (standard alphabet) raw key bytes, for use by the cloud
/// client factory when it only has the already-validated bytes.
///
/// # Errors
///
/// Returns [`CloudError::InvalidBase64`] on malformed input.
pub fn decode_key_bytes(encoded: &str) -> Result<Vec<u8>, CloudError> {
    Ok(base64::engine::general_purpose::STANDARD.decode(encoded.trim())?)
}
