// HMAC-SHA256 signatures over the canonical JSON form of a claim.

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use super::TransactionVerifier;
use crate::error::{AppError, AppResult, VerificationError};
use crate::models::{PurchaseFact, TransactionClaim, TransactionEvent, VerificationOutcome};

type HmacSha256 = Hmac<Sha256>;

fn mac_for(secret: &[u8], claim: &TransactionClaim) -> Result<HmacSha256, VerificationError> {
    let payload = serde_json::to_vec(claim)
        .map_err(|e| VerificationError::FailedVerification(format!("unencodable claim: {}", e)))?;
    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|e| VerificationError::FailedVerification(e.to_string()))?;
    mac.update(&payload);
    Ok(mac)
}

/// Hex signature for `claim`, as the store would attach it.
pub fn sign_claim(secret: &[u8], claim: &TransactionClaim) -> AppResult<String> {
    let mac = mac_for(secret, claim).map_err(AppError::from)?;
    Ok(hex::encode(mac.finalize().into_bytes()))
}

pub struct SharedSecretVerifier {
    secret: Vec<u8>,
}

impl SharedSecretVerifier {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self { secret: secret.into() }
    }
}

#[async_trait]
impl TransactionVerifier for SharedSecretVerifier {
    async fn verify(&self, event: &TransactionEvent) -> Result<PurchaseFact, VerificationError> {
        let signature = hex::decode(&event.signature)
            .map_err(|_| VerificationError::FailedVerification("signature is not hex".to_string()))?;

        mac_for(&self.secret, &event.claim)?
            .verify_slice(&signature)
            .map_err(|_| VerificationError::FailedVerification("signature mismatch".to_string()))?;

        Ok(event.to_fact(VerificationOutcome::Verified))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LifecycleState;
    use chrono::Utc;

    fn claim() -> TransactionClaim {
        TransactionClaim {
            transaction_id: "t1".into(),
            offering_id: "monthly".into(),
            observed_at: Utc::now(),
            state: LifecycleState::Active,
            renewal_offering_id: None,
        }
    }

    fn signed(secret: &[u8], claim: TransactionClaim) -> TransactionEvent {
        let signature = sign_claim(secret, &claim).unwrap();
        TransactionEvent { claim, signature, requires_acknowledgment: true }
    }

    #[tokio::test]
    async fn test_valid_signature_verifies() {
        let verifier = SharedSecretVerifier::new(b"sandbox-secret".to_vec());
        let fact = verifier.verify(&signed(b"sandbox-secret", claim())).await.unwrap();
        assert!(fact.is_verified());
        assert_eq!(fact.offering_id, "monthly");
    }

    #[tokio::test]
    async fn test_wrong_secret_fails() {
        let verifier = SharedSecretVerifier::new(b"sandbox-secret".to_vec());
        let result = verifier.verify(&signed(b"other-secret", claim())).await;
        assert!(matches!(result, Err(VerificationError::FailedVerification(_))));
    }

    #[tokio::test]
    async fn test_tampered_claim_fails() {
        let verifier = SharedSecretVerifier::new(b"sandbox-secret".to_vec());
        let mut event = signed(b"sandbox-secret", claim());
        event.claim.offering_id = "lifetime".into();
        assert!(verifier.verify(&event).await.is_err());
    }

    #[tokio::test]
    async fn test_garbage_signature_fails() {
        let verifier = SharedSecretVerifier::new(b"sandbox-secret".to_vec());
        let mut event = signed(b"sandbox-secret", claim());
        event.signature = "not-hex".into();
        let err = verifier.verify(&event).await.unwrap_err();
        assert_eq!(err, VerificationError::FailedVerification("signature is not hex".into()));
    }
}
