use std::fmt;

/// A signing key failed to produce a signature.
#[derive(Debug, thiserror::Error)]
#[error("key '{key}' could not sign token: {reason}")]
pub struct SignError {
    pub key: String,
    pub reason: String,
}

impl SignError {
    pub fn new(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

/// One candidate host key for `AUTH`.
///
/// `adbd` sends a 20-byte token that it has already hashed, so
/// implementations sign it as a pre-computed digest. The key algorithm and
/// storage are up to the implementation.
pub trait AuthSigner: Send + Sync {
    /// Sign an `AUTH(TOKEN)` challenge.
    fn sign(&self, token: &[u8]) -> Result<Vec<u8>, SignError>;

    /// Public key in the daemon's `adbkey.pub` text format, if this key can
    /// be offered for approval.
    fn public_key(&self) -> Option<Vec<u8>> {
        None
    }

    /// Short label used in logs.
    fn name(&self) -> &str;
}

impl fmt::Debug for dyn AuthSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthSigner")
            .field("name", &self.name())
            .field("offers_public_key", &self.public_key().is_some())
            .finish()
    }
}
