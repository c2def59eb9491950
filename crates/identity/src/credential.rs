//! Verifiable credentials over execution claims.
//!
//! An issued credential is a self-contained assertion: the claim envelope is
//! canonicalized, signed by the issuing [`Identity`], and the signature is
//! attached as a proof block. Anyone holding the credential can check it with
//! [`verify_credential`]; the issuer's key is recovered from the issuer
//! identifier itself.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use provenance_core::canonicalize;

use crate::did::{parse_identifier, verification_method};
use crate::error::{IdentityError, IdentityResult};
use crate::identity::{verify_signature, Identity};

pub const CREDENTIALS_CONTEXT: &str = "https://www.w3.org/2018/credentials/v1";
pub const DEFAULT_CREDENTIAL_TYPE: &str = "VerifiableCredential";
pub const PROOF_TYPE: &str = "Ed25519Signature2020";
pub const PROOF_PURPOSE: &str = "assertionMethod";

/// Proof block attached to a signed credential.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialProof {
    #[serde(rename = "type")]
    pub proof_type: String,
    pub created: String,
    #[serde(rename = "verificationMethod")]
    pub verification_method: String,
    #[serde(rename = "proofPurpose")]
    pub proof_purpose: String,
    /// Hex-encoded Ed25519 signature over the canonical envelope.
    #[serde(rename = "proofValue")]
    pub proof_value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerifiableCredential {
    #[serde(rename = "@context")]
    pub context: Vec<String>,
    #[serde(rename = "type")]
    pub credential_type: Vec<String>,
    pub issuer: String,
    #[serde(rename = "issuanceDate")]
    pub issuance_date: String,
    #[serde(rename = "credentialSubject")]
    pub credential_subject: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proof: Option<CredentialProof>,
}

impl VerifiableCredential {
    /// Canonical bytes of the envelope without its proof block.
    pub fn signing_payload(&self) -> IdentityResult<Vec<u8>> {
        let mut envelope = self.clone();
        envelope.proof = None;
        Ok(canonicalize(&envelope)?)
    }
}

/// Issues credentials signed by one identity.
#[derive(Debug, Clone)]
pub struct CredentialIssuer {
    identity: Arc<Identity>,
}

impl CredentialIssuer {
    pub fn new(identity: Arc<Identity>) -> Self {
        Self { identity }
    }

    pub fn issuer_identifier(&self) -> &str {
        self.identity.identifier()
    }

    /// Wraps `subject` in a signed credential of type `credential_type`.
    pub fn issue<S: Serialize>(
        &self,
        subject: &S,
        credential_type: &str,
    ) -> IdentityResult<VerifiableCredential> {
        self.issue_at(subject, credential_type, Utc::now())
    }

    pub fn issue_at<S: Serialize>(
        &self,
        subject: &S,
        credential_type: &str,
        issued_at: DateTime<Utc>,
    ) -> IdentityResult<VerifiableCredential> {
        let timestamp = issued_at.to_rfc3339_opts(SecondsFormat::Millis, true);
        let mut credential = VerifiableCredential {
            context: vec![CREDENTIALS_CONTEXT.to_string()],
            credential_type: vec![credential_type.to_string()],
            issuer: self.identity.identifier().to_string(),
            issuance_date: timestamp.clone(),
            credential_subject: serde_json::to_value(subject)?,
            proof: None,
        };

        let payload = credential.signing_payload()?;
        let signature = self.identity.sign(&payload);

        credential.proof = Some(CredentialProof {
            proof_type: PROOF_TYPE.to_string(),
            created: timestamp,
            verification_method: verification_method(self.identity.identifier()),
            proof_purpose: PROOF_PURPOSE.to_string(),
            proof_value: hex::encode(signature.to_bytes()),
        });

        debug!(
            issuer = %credential.issuer,
            credential_type = credential_type,
            "Issued credential"
        );
        Ok(credential)
    }
}

/// Checks a credential's proof. Never fails loudly: any problem is `false`.
pub fn verify_credential(credential: &VerifiableCredential) -> bool {
    match check_credential(credential) {
        Ok(()) => true,
        Err(e) => {
            debug!(issuer = %credential.issuer, error = %e, "Credential not verified");
            false
        }
    }
}

fn check_credential(credential: &VerifiableCredential) -> IdentityResult<()> {
    let proof = credential.proof.as_ref().ok_or_else(|| {
        IdentityError::SignatureVerification("credential carries no proof".to_string())
    })?;

    if proof.proof_type != PROOF_TYPE {
        return Err(IdentityError::SignatureVerification(format!(
            "unsupported proof type {}",
            proof.proof_type
        )));
    }
    if proof.verification_method != verification_method(&credential.issuer) {
        return Err(IdentityError::SignatureVerification(format!(
            "verification method {} does not belong to issuer",
            proof.verification_method
        )));
    }

    let public_key = parse_identifier(&credential.issuer)?;
    let signature = hex::decode(&proof.proof_value)
        .map_err(|e| IdentityError::SignatureVerification(format!("proof value: {}", e)))?;
    let payload = credential.signing_payload()?;

    verify_signature(&public_key, &payload, &signature)
}
