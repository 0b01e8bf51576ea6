use std::fmt;
use std::path::{Path, PathBuf};

use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::DecodePrivateKey;
use rsa::traits::PublicKeyParts;
use rsa::{Pkcs1v15Sign, RsaPrivateKey};
use sha1::Sha1;
use tracing::debug;

use crate::auth::{AuthSigner, SignError};

/// Length of the token `adbd` sends in `AUTH(TOKEN)`; it is already a SHA-1 digest.
pub const AUTH_TOKEN_SIZE: usize = 20;

/// A private key could not be read or decoded.
#[derive(Debug, thiserror::Error)]
pub enum KeyLoadError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("not a PKCS#8 or PKCS#1 RSA private key: {0}")]
    Decode(String),
}

/// RSA host key in the format `adb keygen` writes.
///
/// The token is signed as a pre-computed SHA-1 digest: PKCS#1 v1.5 padding
/// with the SHA-1 `DigestInfo` prefix, and no second hash.
pub struct RsaSigner {
    name: String,
    key: RsaPrivateKey,
    public_key: Option<Vec<u8>>,
}

impl RsaSigner {
    /// Decode a PEM private key (`PRIVATE KEY` or `RSA PRIVATE KEY`).
    pub fn from_pem(name: impl Into<String>, pem: &str) -> Result<Self, KeyLoadError> {
        let key = match RsaPrivateKey::from_pkcs8_pem(pem) {
            Ok(key) => key,
            Err(pkcs8_err) => RsaPrivateKey::from_pkcs1_pem(pem).map_err(|pkcs1_err| {
                KeyLoadError::Decode(format!("pkcs8: {pkcs8_err}; pkcs1: {pkcs1_err}"))
            })?,
        };
        Ok(Self {
            name: name.into(),
            key,
            public_key: None,
        })
    }

    /// Load `path` and, if present, its `<path>.pub` companion.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, KeyLoadError> {
        let path = path.as_ref();
        let pem = std::fs::read_to_string(path).map_err(|source| KeyLoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let signer = Self::from_pem(path.display().to_string(), &pem)?;

        let mut pub_path = path.as_os_str().to_owned();
        pub_path.push(".pub");
        let pub_path = PathBuf::from(pub_path);
        match std::fs::read(&pub_path) {
            Ok(public_key) => Ok(signer.with_public_key(public_key)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %pub_path.display(), "no public key next to private key");
                Ok(signer)
            }
            Err(source) => Err(KeyLoadError::Io {
                path: pub_path,
                source,
            }),
        }
    }

    /// Attach the `adbkey.pub` text offered when the device does not know this key.
    pub fn with_public_key(mut self, public_key: impl Into<Vec<u8>>) -> Self {
        let mut public_key = public_key.into();
        while public_key.last().is_some_and(|&b| matches!(b, b'\n' | b'\r' | 0)) {
            public_key.pop();
        }
        self.public_key = Some(public_key);
        self
    }

    /// Modulus size in bits.
    pub fn bits(&self) -> usize {
        self.key.size() * 8
    }
}

impl AuthSigner for RsaSigner {
    fn sign(&self, token: &[u8]) -> Result<Vec<u8>, SignError> {
        if token.len() != AUTH_TOKEN_SIZE {
            return Err(SignError::new(
                &self.name,
                format!("token is {} bytes, expected {AUTH_TOKEN_SIZE}", token.len()),
            ));
        }
        self.key
            .sign(Pkcs1v15Sign::new::<Sha1>(), token)
            .map_err(|err| SignError::new(&self.name, err.to_string()))
    }

    fn public_key(&self) -> Option<Vec<u8>> {
        self.public_key.clone()
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for RsaSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RsaSigner")
            .field("name", &self.name)
            .field("bits", &self.bits())
            .field("key", &"<redacted>")
            .field("has_public_key", &self.public_key.is_some())
            .finish()
    }
}
