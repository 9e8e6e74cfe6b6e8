use crate::error::AppError;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use crypto_core::{decrypt_at_rest, encrypt_at_rest, generate_nonce};
use hkdf::Hkdf;
use sha2::Sha256;
use uuid::Uuid;

/// Sentinel returned when a stored ciphertext cannot be decrypted. History
/// rendering must never hard-fail on one bad row.
pub const DECRYPT_PLACEHOLDER: &str = "[unable to decrypt message]";

/// Server-managed at-rest encryption derived from a single master key.
#[derive(Clone)]
pub struct EncryptionService {
    master_key: [u8; 32],
}

impl EncryptionService {
    pub fn new(master_key: [u8; 32]) -> Self {
        Self { master_key }
    }

    fn derive_conversation_key(&self, conversation_id: Uuid) -> [u8; 32] {
        let hk = Hkdf::<Sha256>::new(None, &self.master_key);
        let mut key = [0u8; 32];
        hk.expand(conversation_id.as_bytes(), &mut key)
            .expect("HKDF expand must succeed for 32 byte output");
        key
    }

    /// Encrypt a message body; returns base64 ciphertext and nonce as stored.
    pub fn encrypt(
        &self,
        conversation_id: Uuid,
        plaintext: &str,
    ) -> Result<(String, String), AppError> {
        let key = self.derive_conversation_key(conversation_id);
        let nonce = generate_nonce();
        let ciphertext = encrypt_at_rest(plaintext.as_bytes(), &key, &nonce)
            .map_err(|e| AppError::Encryption(e.to_string()))?;
        Ok((STANDARD.encode(ciphertext), STANDARD.encode(nonce)))
    }

    fn try_decrypt(
        &self,
        conversation_id: Uuid,
        ciphertext_b64: &str,
        nonce_b64: &str,
    ) -> Result<String, AppError> {
        let key = self.derive_conversation_key(conversation_id);
        let ciphertext = STANDARD
            .decode(ciphertext_b64)
            .map_err(|e| AppError::Encryption(e.to_string()))?;
        let nonce = STANDARD
            .decode(nonce_b64)
            .map_err(|e| AppError::Encryption(e.to_string()))?;
        let plaintext = decrypt_at_rest(&ciphertext, &key, &nonce)
            .map_err(|e| AppError::Encryption(e.to_string()))?;
        String::from_utf8(plaintext).map_err(|e| AppError::Encryption(e.to_string()))
    }

    /// Decrypt a stored body, degrading to the placeholder on any failure
    /// (corrupt row, key mismatch, bad encoding).
    pub fn decrypt_or_placeholder(
        &self,
        conversation_id: Uuid,
        ciphertext_b64: &str,
        nonce_b64: &str,
    ) -> String {
        match self.try_decrypt(conversation_id, ciphertext_b64, nonce_b64) {
            Ok(plaintext) => plaintext,
            Err(e) => {
                tracing::warn!(%conversation_id, error=%e, "failed to decrypt message body");
                DECRYPT_PLACEHOLDER.to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> EncryptionService {
        EncryptionService::new([42u8; 32])
    }

    #[test]
    fn roundtrip() {
        let svc = service();
        let conversation_id = Uuid::new_v4();
        let (ct, nonce) = svc.encrypt(conversation_id, "hello").unwrap();
        assert_ne!(ct, "hello");
        assert_eq!(svc.decrypt_or_placeholder(conversation_id, &ct, &nonce), "hello");
    }

    #[test]
    fn corrupted_ciphertext_degrades_to_placeholder() {
        let svc = service();
        let conversation_id = Uuid::new_v4();
        let (_, nonce) = svc.encrypt(conversation_id, "hello").unwrap();
        let out = svc.decrypt_or_placeholder(conversation_id, "AAAAB/not-valid", &nonce);
        assert_eq!(out, DECRYPT_PLACEHOLDER);
    }

    #[test]
    fn key_is_conversation_scoped() {
        let svc = service();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let (ct, nonce) = svc.encrypt(a, "hello").unwrap();
        assert_eq!(svc.decrypt_or_placeholder(b, &ct, &nonce), DECRYPT_PLACEHOLDER);
    }
}
