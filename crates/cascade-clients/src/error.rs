//! Error types for the collaborator clients.

/// Errors from the secrets broker client.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// The broker rejected the AppRole login (bad role ID / secret ID).
    #[error("broker login failed: {reason}")]
    LoginFailed { reason: String },

    /// No session token is available yet — `ensure_token` has not
    /// succeeded since the client was created or since the last failure.
    #[error("no session token available")]
    NoToken,

    /// The requested secret path does not exist or returned no data.
    #[error("secret not found at path '{path}'")]
    NotFound { path: String },

    /// The secret exists but is missing a required field.
    #[error("secret at '{path}' is missing field '{field}'")]
    MissingField { path: String, field: String },

    /// A required field was present but not decodable (bad base64 or JSON).
    #[error("secret at '{path}' field '{field}' is malformed: {reason}")]
    MalformedField {
        path: String,
        field: String,
        reason: String,
    },

    /// The transport to the broker failed.
    #[error("broker request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The broker's response body could not be parsed.
    #[error("broker response malformed: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Errors from the cloud API client.
#[derive(Debug, thiserror::Error)]
pub enum CloudError {
    /// The service-account key payload was not valid base64.
    #[error("service account key is not valid base64: {0}")]
    InvalidBase64(#[from] base64::DecodeError),

    /// The decoded key payload was not valid JSON in the expected shape.
    #[error("service account key is not valid JSON: {0}")]
    InvalidKeyJson(serde_json::Error),

    /// Signing the OAuth2 assertion JWT failed.
    #[error("failed to sign cloud credentials: {0}")]
    SigningFailed(#[from] jsonwebtoken::errors::Error),

    /// The OAuth2 token exchange or API call failed at the transport layer.
    #[error("cloud request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The cloud API returned a non-success status.
    #[error("cloud API returned {status}: {message}")]
    Api { status: u16, message: String },
}
