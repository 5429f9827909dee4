use taskbridge_protocol::crypto::{parse_public_key, verify};
use taskbridge_protocol::{canonical_from_str, ProtocolResult, RejectionReason};
use tracing::{debug, warn};

/// How a dispatch got past authentication.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verification {
    /// The signature checked out against the orchestrator key.
    Verified,
    /// No orchestrator key is configured and unverified dispatch is allowed.
    Bypassed,
}

/// Checks dispatch signatures against the orchestrator's public key.
#[derive(Debug, Clone)]
pub struct Authenticator {
    orchestrator_key: Option<String>,
    allow_unverified: bool,
}

impl Authenticator {
    /// A configured key must parse; without one, `allow_unverified` decides
    /// whether dispatches are accepted at all.
    pub fn new(orchestrator_key: Option<&str>, allow_unverified: bool) -> ProtocolResult<Self> {
        let orchestrator_key = match orchestrator_key.map(str::trim).filter(|k| !k.is_empty()) {
            Some(key) => {
                parse_public_key(key)?;
                Some(key.to_ascii_lowercase())
            }
            None => None,
        };
        Ok(Self {
            orchestrator_key,
            allow_unverified,
        })
    }

    pub fn has_key(&self) -> bool {
        self.orchestrator_key.is_some()
    }

    /// Verifies `signature_hex` over the canonical re-encoding of
    /// `task_plan_json`.
    pub fn check(
        &self,
        task_plan_json: &str,
        signature_hex: &str,
    ) -> Result<Verification, RejectionReason> {
        let Some(key) = &self.orchestrator_key else {
            if self.allow_unverified {
                warn!(
                    verification = "bypassed",
                    "No orchestrator key configured; accepting dispatch without signature check"
                );
                return Ok(Verification::Bypassed);
            }
            warn!("No orchestrator key configured; refusing dispatch");
            return Err(RejectionReason::InvalidSignature);
        };

        if signature_hex.trim().is_empty() {
            warn!("Dispatch carries no signature");
            return Err(RejectionReason::InvalidSignature);
        }
        let payload = canonical_from_str(task_plan_json).map_err(|e| {
            warn!("Dispatch payload is not JSON: {}", e);
            RejectionReason::InvalidSignature
        })?;
        if verify(key, &payload, signature_hex) {
            debug!(verification = "verified", "Dispatch signature valid");
            Ok(Verification::Verified)
        } else {
            warn!("Dispatch signature mismatch");
            Err(RejectionReason::InvalidSignature)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskbridge_protocol::crypto::{generate_keypair, public_key_hex, sign};

    const PLAN: &str = r#"{"task_id":"task_1","steps":[]}"#;

    #[test]
    fn signed_payload_verifies_after_reformatting() {
        let key = generate_keypair();
        let auth = Authenticator::new(Some(&public_key_hex(&key)), false).unwrap();
        let signature = sign(&key, PLAN.as_bytes());
        let reformatted = "{ \"steps\": [], \"task_id\": \"task_1\" }";
        assert_eq!(auth.check(reformatted, &signature), Ok(Verification::Verified));
    }

    #[test]
    fn wrong_key_or_payload_fails() {
        let key = generate_keypair();
        let other = generate_keypair();
        let auth = Authenticator::new(Some(&public_key_hex(&other)), false).unwrap();
        let signature = sign(&key, PLAN.as_bytes());
        assert_eq!(
            auth.check(PLAN, &signature),
            Err(RejectionReason::InvalidSignature)
        );

        let auth = Authenticator::new(Some(&public_key_hex(&key)), false).unwrap();
        assert_eq!(
            auth.check(r#"{"task_id":"task_2","steps":[]}"#, &signature),
            Err(RejectionReason::InvalidSignature)
        );
        assert_eq!(auth.check("not json", &signature), Err(RejectionReason::InvalidSignature));
        assert_eq!(auth.check(PLAN, ""), Err(RejectionReason::InvalidSignature));
    }

    #[test]
    fn bypass_needs_opt_in() {
        let strict = Authenticator::new(None, false).unwrap();
        assert_eq!(strict.check(PLAN, ""), Err(RejectionReason::InvalidSignature));

        let lax = Authenticator::new(Some("  "), true).unwrap();
        assert!(!lax.has_key());
        assert_eq!(lax.check(PLAN, ""), Ok(Verification::Bypassed));
    }

    #[test]
    fn configured_key_must_parse() {
        assert!(Authenticator::new(Some("abcd"), true).is_err());
    }
}
