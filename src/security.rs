//! Credential verification.
//!
//! Verification sits behind a trait so the comparison scheme can be swapped
//! without touching the login path.

/// Checks a supplied password against the stored credential.
pub trait CredentialVerifier: Send + Sync {
    fn verify(&self, supplied: &str, stored: &str) -> bool;
}

// TODO: password hashing. Stored credentials are currently compared by
// value, so the column holds the plaintext password.
pub struct PlaintextVerifier;

impl CredentialVerifier for PlaintextVerifier {
    fn verify(&self, supplied: &str, stored: &str) -> bool {
        supplied == stored
    }
}
