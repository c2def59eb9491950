//! Identity and credentials for verifiable agent runs.
//!
//! Every execution trace and every credential is bound to one signing
//! identity. The identity's name is derived from its public key alone, so a
//! verifier can resolve the key from the name without any registry.
//!
//! # Core Concepts
//!
//! - **Identity**: an Ed25519 keypair loaded from a JWK or generated fresh
//! - **Identifier**: `did:key` encoding of the public key
//! - **Credential**: a signed claim envelope with an embedded proof block

pub mod credential;
pub mod did;
pub mod error;
pub mod identity;

pub use credential::{
    verify_credential, CredentialIssuer, CredentialProof, VerifiableCredential,
    DEFAULT_CREDENTIAL_TYPE,
};
pub use did::{derive_identifier, parse_identifier, verification_method};
pub use error::{IdentityError, IdentityResult};
pub use identity::{verify_signature, Identity, Jwk};
