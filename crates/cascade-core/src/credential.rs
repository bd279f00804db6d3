//! The credential a controller owns and hands to its children.

use std::time::Duration;

/// A refreshed credential, or the empty value a controller holds while
/// unhealthy or suspended.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credential {
    /// Opaque material (a token, a base64 key blob, …). Empty when invalid.
    pub material: Vec<u8>,
    /// Lifetime reported by the issuer, in seconds. Zero when invalid.
    pub ttl_seconds: u64,
    /// A non-secret identifier suitable for logging (e.g. a key ID).
    pub identifier: String,
}

impl Credential {
    /// The zeroed, invalid credential a controller holds before its first
    /// successful refresh and whenever it is suspended.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Whether this credential has ever been successfully populated.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.material.is_empty()
    }

    /// Lifetime as a [`Duration`], for healthy-period arithmetic.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }
}
