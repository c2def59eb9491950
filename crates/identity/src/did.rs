//! Self-certifying identifiers (`did:key`) for Ed25519 public keys.
//!
//! Encoding, version 1:
//!
//! ```text
//! did:key:z + base58btc( 0xed 0x01 ‖ public_key[32] )
//! ```
//!
//! `0xed 0x01` is the varint multicodec tag for an Ed25519 public key and the
//! leading `z` is the multibase marker for base58btc. The identifier carries the
//! key itself, so it can be turned back into a verifying key without a registry.

use ed25519_dalek::VerifyingKey;

use crate::error::{IdentityError, IdentityResult};

/// Method prefix followed by the base58btc multibase marker.
pub const DID_KEY_PREFIX: &str = "did:key:z";

/// Multicodec tag for Ed25519 public keys.
pub const ED25519_MULTICODEC: [u8; 2] = [0xed, 0x01];

/// Fragment naming the signing key inside a DID document.
pub const KEY_REFERENCE: &str = "#key-1";

/// Derives the identifier for a public key.
pub fn derive_identifier(public_key: &VerifyingKey) -> String {
    let mut tagged = Vec::with_capacity(ED25519_MULTICODEC.len() + 32);
    tagged.extend_from_slice(&ED25519_MULTICODEC);
    tagged.extend_from_slice(public_key.as_bytes());
    format!("{}{}", DID_KEY_PREFIX, bs58::encode(tagged).into_string())
}

/// Recovers the verifying key named by an identifier.
///
/// A trailing fragment (`#key-1`) is accepted so verification-method
/// references can be passed directly.
pub fn parse_identifier(identifier: &str) -> IdentityResult<VerifyingKey> {
    let invalid = |reason: &str| IdentityError::InvalidIdentifier {
        identifier: identifier.to_string(),
        reason: reason.to_string(),
    };

    let did = identifier.split('#').next().unwrap_or(identifier);
    let encoded = did
        .strip_prefix(DID_KEY_PREFIX)
        .ok_or_else(|| invalid("expected did:key with base58btc multibase"))?;
    let decoded = bs58::decode(encoded)
        .into_vec()
        .map_err(|e| invalid(&format!("base58 decode failed: {}", e)))?;

    let key_bytes = decoded
        .strip_prefix(&ED25519_MULTICODEC[..])
        .ok_or_else(|| invalid("unsupported multicodec tag"))?;
    let key_bytes: [u8; 32] = key_bytes
        .try_into()
        .map_err(|_| invalid("public key must be 32 bytes"))?;

    VerifyingKey::from_bytes(&key_bytes).map_err(|e| invalid(&format!("invalid point: {}", e)))
}

/// `identifier#key-1`
pub fn verification_method(identifier: &str) -> String {
    format!("{}{}", identifier, KEY_REFERENCE)
}
