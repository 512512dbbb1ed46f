//! Authorization metadata and the person identifier digest.
//!
//! The subject identifier is only ever stored as a keyed HMAC-SHA256 digest,
//! so leaked metadata or placeholder emails reveal nothing about the upstream
//! identity without the server secret.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::models::{AuthorizationMetadata, RawAttributes};

type HmacSha256 = Hmac<Sha256>;

/// Domain separation prefix mixed into every digest.
const DIGEST_CONTEXT: &[u8] = b"tunnistamo-person-identifier:";

/// Digest length in bytes (32 hex characters).
const DIGEST_LENGTH: usize = 16;

/// Collects storable metadata from the raw attribute bag.
pub struct MetadataCollector<'a> {
    raw: &'a RawAttributes,
    secret: &'a str,
}

impl<'a> MetadataCollector<'a> {
    pub fn new(raw: &'a RawAttributes, secret: &'a str) -> Self {
        Self { raw, secret }
    }

    /// Flat record stored on the authorization.
    pub fn metadata(&self) -> AuthorizationMetadata {
        AuthorizationMetadata {
            name: self.raw.get("name"),
            given_name: self.raw.first_of(&["given_name", "first_name"]),
            family_name: self.raw.first_of(&["family_name", "last_name"]),
            birthdate: self.raw.get("birthdate"),
            amr: self
                .raw
                .auth_method_ref
                .as_ref()
                .and_then(|amr| amr.joined()),
        }
    }

    /// Keyed digest of the subject identifier, `None` without a subject.
    pub fn person_identifier_digest(&self) -> Option<String> {
        let subject = self.raw.subject()?;
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes()).ok()?;
        mac.update(DIGEST_CONTEXT);
        mac.update(subject.as_bytes());
        let digest = mac.finalize().into_bytes();
        Some(
            digest[..DIGEST_LENGTH]
                .iter()
                .map(|b| format!("{b:02x}"))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw() -> RawAttributes {
        RawAttributes::with_subject("f4f3a4b2-9c1e-4b47-a3c6-9d6a1f0c2e11")
            .claim("name", "Marja Mirja Mainio")
            .claim("given_name", vec!["Marja", "Mirja"])
            .claim("family_name", "Mainio")
            .claim("birthdate", "1985-07-15")
            .amr(vec!["suomi_fi", "mfa"])
    }

    #[test]
    fn metadata_flattens_and_joins_values() {
        let raw = raw();
        let metadata = MetadataCollector::new(&raw, "secret").metadata();
        assert_eq!(metadata.name.as_deref(), Some("Marja Mirja Mainio"));
        assert_eq!(metadata.given_name.as_deref(), Some("Marja,Mirja"));
        assert_eq!(metadata.family_name.as_deref(), Some("Mainio"));
        assert_eq!(metadata.birthdate.as_deref(), Some("1985-07-15"));
        assert_eq!(metadata.amr.as_deref(), Some("suomi_fi,mfa"));
    }

    #[test]
    fn metadata_falls_back_to_first_and_last_name() {
        let raw = RawAttributes::with_subject("s")
            .claim("first_name", "Matti")
            .claim("last_name", "Meikäläinen");
        let metadata = MetadataCollector::new(&raw, "secret").metadata();
        assert_eq!(metadata.given_name.as_deref(), Some("Matti"));
        assert_eq!(metadata.family_name.as_deref(), Some("Meikäläinen"));
        assert_eq!(metadata.amr, None);
    }

    #[test]
    fn digest_is_deterministic_hex() {
        let raw = raw();
        let a = MetadataCollector::new(&raw, "secret").person_identifier_digest();
        let b = MetadataCollector::new(&raw, "secret").person_identifier_digest();
        assert_eq!(a, b);
        let digest = a.unwrap();
        assert_eq!(digest.len(), 32);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn digest_depends_on_secret_and_subject() {
        let raw = raw();
        let other = RawAttributes::with_subject("someone-else");
        let base = MetadataCollector::new(&raw, "secret").person_identifier_digest();
        assert_ne!(
            base,
            MetadataCollector::new(&raw, "another-secret").person_identifier_digest()
        );
        assert_ne!(
            base,
            MetadataCollector::new(&other, "secret").person_identifier_digest()
        );
    }

    #[test]
    fn blank_subject_has_no_digest() {
        let raw = RawAttributes::with_subject("   ");
        assert_eq!(
            MetadataCollector::new(&raw, "secret").person_identifier_digest(),
            None
        );
    }
}
