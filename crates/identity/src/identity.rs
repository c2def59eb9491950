//! Agent identity: an Ed25519 keypair and the identifier derived from it.
//!
//! # Security
//!
//! - The signing key never leaves this type; `Debug` prints only the identifier
//! - Intermediate seed buffers are zeroized after use
//! - Persisted key files are written owner-readable only on Unix

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use tracing::{debug, info};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::did::derive_identifier;
use crate::error::{IdentityError, IdentityResult};

/// Length of an Ed25519 seed in bytes.
pub const SEED_LEN: usize = 32;

/// OKP JSON Web Key holding an Ed25519 keypair.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct Jwk {
    pub kty: String,
    pub crv: String,
    /// Private seed, unpadded base64url. Absent for public-only keys.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub d: Option<String>,
    /// Public key, unpadded base64url.
    pub x: String,
}

impl fmt::Debug for Jwk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Jwk")
            .field("kty", &self.kty)
            .field("crv", &self.crv)
            .field("d", &self.d.as_ref().map(|_| "<redacted>"))
            .field("x", &self.x)
            .finish()
    }
}

/// Immutable signing identity.
pub struct Identity {
    signing_key: SigningKey,
    identifier: String,
}

impl Identity {
    /// Generates a fresh keypair from the thread RNG.
    pub fn generate() -> Self {
        use rand::RngCore;
        let mut seed = [0u8; SEED_LEN];
        rand::thread_rng().fill_bytes(&mut seed);
        let identity = Self::from_signing_key(SigningKey::from_bytes(&seed));
        seed.zeroize();
        identity
    }

    /// Reconstructs an identity from a raw 32-byte seed.
    pub fn from_seed(seed: &[u8]) -> IdentityResult<Self> {
        let mut array: [u8; SEED_LEN] = seed.try_into().map_err(|_| {
            IdentityError::InvalidKey(format!(
                "seed must be {} bytes, got {}",
                SEED_LEN,
                seed.len()
            ))
        })?;
        let identity = Self::from_signing_key(SigningKey::from_bytes(&array));
        array.zeroize();
        Ok(identity)
    }

    /// Reconstructs an identity from serialized key material: a JWK document or
    /// a raw 32-byte seed.
    pub fn load(serialized: &[u8]) -> IdentityResult<Self> {
        if serialized.is_empty() {
            return Err(IdentityError::Config("key material is empty".to_string()));
        }
        if serialized.len() == SEED_LEN {
            return Self::from_seed(serialized);
        }
        let jwk: Jwk = serde_json::from_slice(serialized)
            .map_err(|e| IdentityError::InvalidKey(format!("not a JWK or raw seed: {}", e)))?;
        Self::from_jwk(&jwk)
    }

    pub fn from_jwk(jwk: &Jwk) -> IdentityResult<Self> {
        if jwk.kty != "OKP" || jwk.crv != "Ed25519" {
            return Err(IdentityError::InvalidKey(format!(
                "unsupported key type {}/{}",
                jwk.kty, jwk.crv
            )));
        }
        let d = jwk
            .d
            .as_deref()
            .ok_or_else(|| IdentityError::Config("JWK has no private component".to_string()))?;

        let mut seed = decode_b64url(d)?;
        let identity = Self::from_seed(&seed);
        seed.zeroize();
        let identity = identity?;

        let x = decode_b64url(&jwk.x)?;
        if x.as_slice() != identity.public_key().as_bytes() {
            return Err(IdentityError::InvalidKey(
                "JWK public component does not match private key".to_string(),
            ));
        }
        Ok(identity)
    }

    pub fn to_jwk(&self) -> Jwk {
        Jwk {
            kty: "OKP".to_string(),
            crv: "Ed25519".to_string(),
            d: Some(URL_SAFE_NO_PAD.encode(self.signing_key.to_bytes())),
            x: URL_SAFE_NO_PAD.encode(self.public_key().as_bytes()),
        }
    }

    /// Loads a persisted JWK. A missing file is a configuration error.
    pub fn load_from_file(path: impl AsRef<Path>) -> IdentityResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(IdentityError::Config(format!(
                "key material not found at {}",
                path.display()
            )));
        }
        let mut raw = std::fs::read(path)?;
        let identity = Self::load(&raw);
        raw.zeroize();
        let identity = identity?;

        info!(
            identifier = %identity.identifier,
            path = %path.display(),
            "Loaded identity"
        );
        Ok(identity)
    }

    /// Writes the keypair as a JWK, creating parent directories.
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> IdentityResult<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut encoded = serde_json::to_vec_pretty(&self.to_jwk())?;
        let written = std::fs::write(path, &encoded);
        encoded.zeroize();
        written?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        debug!(identifier = %self.identifier, path = %path.display(), "Saved identity");
        Ok(())
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn public_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// Signs arbitrary bytes.
    pub fn sign(&self, message: &[u8]) -> Signature {
        self.signing_key.sign(message)
    }

    fn from_signing_key(signing_key: SigningKey) -> Self {
        let identifier = derive_identifier(&signing_key.verifying_key());
        Self {
            signing_key,
            identifier,
        }
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("identifier", &self.identifier)
            .finish_non_exhaustive()
    }
}

/// Checks an Ed25519 signature given as raw bytes.
pub fn verify_signature(
    public_key: &VerifyingKey,
    message: &[u8],
    signature: &[u8],
) -> IdentityResult<()> {
    let bytes: [u8; 64] = signature.try_into().map_err(|_| {
        IdentityError::SignatureVerification(format!(
            "signature must be 64 bytes, got {}",
            signature.len()
        ))
    })?;
    public_key
        .verify(message, &Signature::from_bytes(&bytes))
        .map_err(|e| IdentityError::SignatureVerification(e.to_string()))
}

fn decode_b64url(value: &str) -> IdentityResult<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(value.trim_end_matches('='))
        .map_err(|e| IdentityError::InvalidKey(format!("base64url decode failed: {}", e)))
}
