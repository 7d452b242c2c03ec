//! Time based one time passwords (RFC 6238) with HMAC-SHA1, 6 digits and 30 second steps.

use base32::Alphabet;
use boringauth::oath::TOTPBuilder;
use ring::rand::{SecureRandom, SystemRandom};
use url::Url;

pub const STEP_SECS: i64 = 30;
pub const DIGITS: usize = 6;
/// Accepted clock drift, in steps, on either side of the current one.
pub const SKEW_STEPS: i64 = 1;
const SECRET_LEN: usize = 20;
const ALPHABET: Alphabet = Alphabet::RFC4648 { padding: false };

/// Fresh random secret, base32 encoded as authenticator apps expect it.
pub fn generate_secret() -> Option<String> {
    let mut secret = [0u8; SECRET_LEN];
    SystemRandom::new().fill(&mut secret).ok()?;
    Some(base32::encode(ALPHABET, &secret))
}

/// Code of `secret` for the step containing `timestamp`. `None` when the secret is not base32.
pub fn code_at(secret: &str, timestamp: i64) -> Option<String> {
    let secret = secret.trim().to_uppercase();
    if secret.is_empty() {
        return None;
    }
    TOTPBuilder::new()
        .base32_key(&secret)
        .output_len(DIGITS)
        .timestamp(timestamp)
        .finalize()
        .ok()
        .map(|totp| totp.generate())
}

/// Checks `code` against the steps around `now_secs`.
pub fn verify(secret: &str, code: &str, now_secs: i64) -> bool {
    let code = code.trim();
    if code.len() != DIGITS || !code.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }
    (-SKEW_STEPS..=SKEW_STEPS)
        .filter_map(|skew| code_at(secret, now_secs + skew * STEP_SECS))
        .any(|expected| expected == code)
}

pub fn verify_now(secret: &str, code: &str) -> bool {
    verify(secret, code, utils::time::time_now_secs())
}

/// `otpauth://` URI for enrolling `secret` in an authenticator app.
pub fn provisioning_uri(secret: &str, account: &str, issuer: &str) -> Result<String, url::ParseError> {
    let mut uri = Url::parse("otpauth://totp/")?;
    uri.set_path(&format!("/{}:{}", issuer, account));
    uri.query_pairs_mut()
        .append_pair("secret", secret)
        .append_pair("issuer", issuer)
        .append_pair("algorithm", "SHA1")
        .append_pair("digits", &DIGITS.to_string())
        .append_pair("period", &STEP_SECS.to_string());
    Ok(uri.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    // RFC 6238 appendix B seed for SHA1.
    const RFC_SEED: &[u8] = b"12345678901234567890";

    fn rfc_secret() -> String {
        base32::encode(ALPHABET, RFC_SEED)
    }

    #[test]
    fn rfc6238_vectors() {
        let secret = rfc_secret();
        assert_eq!(code_at(&secret, 59).as_deref(), Some("287082"));
        assert_eq!(code_at(&secret, 1_111_111_109).as_deref(), Some("081804"));
        assert_eq!(code_at(&secret, 1_234_567_890).as_deref(), Some("005924"));
    }

    #[test]
    fn neighbouring_steps_are_accepted() {
        let secret = rfc_secret();
        assert!(verify(&secret, "287082", 59));
        assert!(verify(&secret, "287082", 59 + STEP_SECS));
        assert!(!verify(&secret, "287082", 59 + 3 * STEP_SECS));
    }

    #[test]
    fn leading_zeros_matter() {
        let secret = rfc_secret();
        assert!(verify(&secret, "005924", 1_234_567_890));
        assert!(!verify(&secret, "5924", 1_234_567_890));
    }

    #[test]
    fn garbage_never_verifies() {
        assert!(!verify(&rfc_secret(), "abcdef", 59));
        assert!(!verify("", "287082", 59));
    }

    #[test]
    fn generated_secrets_produce_codes() {
        let secret = generate_secret().unwrap();
        assert_eq!(base32::decode(ALPHABET, &secret).unwrap().len(), SECRET_LEN);
        assert_ne!(secret, generate_secret().unwrap());

        let code = code_at(&secret, 1_700_000_000).unwrap();
        assert!(verify(&secret, &code, 1_700_000_000));
    }

    #[test]
    fn uri_carries_secret_and_issuer() {
        let uri = provisioning_uri("JBSWY3DPEHPK3PXP", "satoshi@example.com", "lnhub").unwrap();
        assert!(uri.starts_with("otpauth://totp/lnhub:satoshi@example.com?"));
        assert!(uri.contains("secret=JBSWY3DPEHPK3PXP"));
        assert!(uri.contains("issuer=lnhub"));
        assert!(uri.contains("period=30"));
    }
}
