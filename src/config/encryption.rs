//! At-rest encryption for stored connection secrets.
//! AES-256-GCM with a PBKDF2 key derived from a per-machine fingerprint.

use crate::error::{AppError, Result};
use ring::aead::{AES_256_GCM, Aad, LessSafeKey, NONCE_LEN, Nonce, UnboundKey};
use ring::pbkdf2::{PBKDF2_HMAC_SHA256, derive};
use ring::rand::{SecureRandom, SystemRandom};
use std::num::NonZeroU32;

const SALT_LEN: usize = 16;
const KEY_LEN: usize = 32;
const PBKDF2_ITERATIONS: u32 = 100_000;

/// Encrypts and decrypts the static/challenge secrets kept in profile
/// records. Ciphertext layout: salt || nonce || sealed data, base64.
pub struct SecretCipher {
    rng: SystemRandom,
}

impl SecretCipher {
    pub fn new() -> Self {
        Self {
            rng: SystemRandom::new(),
        }
    }

    fn derive_key(&self, salt: &[u8]) -> Result<[u8; KEY_LEN]> {
        let mut key = [0u8; KEY_LEN];

        let iterations = NonZeroU32::new(PBKDF2_ITERATIONS)
            .ok_or_else(|| AppError::Encryption("Invalid iteration count".to_string()))?;

        derive(
            PBKDF2_HMAC_SHA256,
            iterations,
            salt,
            self.machine_fingerprint().as_bytes(),
            &mut key,
        );

        Ok(key)
    }

    /// Hostname + user as key material. Profiles do not decrypt on a
    /// different machine or account, which is the intended scope.
    fn machine_fingerprint(&self) -> String {
        let hostname = std::env::var("HOSTNAME")
            .or_else(|_| std::env::var("COMPUTERNAME"))
            .unwrap_or_else(|_| "default_host".to_string());

        let username = std::env::var("USER")
            .or_else(|_| std::env::var("USERNAME"))
            .unwrap_or_else(|_| "default_user".to_string());

        format!("hopsync_{}_{}", hostname, username)
    }

    pub fn encrypt(&self, secret: &str) -> Result<String> {
        let mut salt = [0u8; SALT_LEN];
        self.rng
            .fill(&mut salt)
            .map_err(|_| AppError::Encryption("Failed to generate salt".to_string()))?;

        let mut nonce_bytes = [0u8; NONCE_LEN];
        self.rng
            .fill(&mut nonce_bytes)
            .map_err(|_| AppError::Encryption("Failed to generate nonce".to_string()))?;

        let key_bytes = self.derive_key(&salt)?;
        let unbound_key = UnboundKey::new(&AES_256_GCM, &key_bytes)
            .map_err(|_| AppError::Encryption("Failed to create encryption key".to_string()))?;
        let key = LessSafeKey::new(unbound_key);
        let nonce = Nonce::assume_unique_for_key(nonce_bytes);

        let mut sealed = secret.as_bytes().to_vec();
        key.seal_in_place_append_tag(nonce, Aad::empty(), &mut sealed)
            .map_err(|_| AppError::Encryption("Failed to encrypt secret".to_string()))?;

        let mut result = Vec::with_capacity(SALT_LEN + NONCE_LEN + sealed.len());
        result.extend_from_slice(&salt);
        result.extend_from_slice(&nonce_bytes);
        result.extend_from_slice(&sealed);

        use base64::{Engine as _, engine::general_purpose};
        Ok(general_purpose::STANDARD.encode(&result))
    }

    pub fn decrypt(&self, encrypted: &str) -> Result<String> {
        use base64::{Engine as _, engine::general_purpose};
        let data = general_purpose::STANDARD
            .decode(encrypted)
            .map_err(|_| AppError::Encryption("Invalid base64 encoding".to_string()))?;

        // salt + nonce + at least a GCM tag
        if data.len() < SALT_LEN + NONCE_LEN + 16 {
            return Err(AppError::Encryption(
                "Invalid encrypted data length".to_string(),
            ));
        }

        let salt = &data[0..SALT_LEN];
        let nonce_bytes: [u8; NONCE_LEN] = data[SALT_LEN..SALT_LEN + NONCE_LEN]
            .try_into()
            .map_err(|_| AppError::Encryption("Invalid nonce length".to_string()))?;
        let mut sealed = data[SALT_LEN + NONCE_LEN..].to_vec();

        let key_bytes = self.derive_key(salt)?;
        let unbound_key = UnboundKey::new(&AES_256_GCM, &key_bytes)
            .map_err(|_| AppError::Encryption("Failed to create decryption key".to_string()))?;
        let key = LessSafeKey::new(unbound_key);
        let nonce = Nonce::assume_unique_for_key(nonce_bytes);

        let opened = key
            .open_in_place(nonce, Aad::empty(), &mut sealed)
            .map_err(|_| AppError::Encryption("Failed to decrypt secret".to_string()))?;

        String::from_utf8(opened.to_vec())
            .map_err(|_| AppError::Encryption("Invalid UTF-8 in decrypted secret".to_string()))
    }
}

impl Default for SecretCipher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let cipher = SecretCipher::new();
        let encrypted = cipher.encrypt("hunter2-pin-9914").unwrap();
        assert_ne!(encrypted, "hunter2-pin-9914");
        assert_eq!(cipher.decrypt(&encrypted).unwrap(), "hunter2-pin-9914");
    }

    #[test]
    fn test_roundtrip_empty_and_unicode() {
        let cipher = SecretCipher::new();
        for secret in ["", "пароль_测试_🔐"] {
            let encrypted = cipher.encrypt(secret).unwrap();
            assert_eq!(cipher.decrypt(&encrypted).unwrap(), secret);
        }
    }

    #[test]
    fn test_random_salt_gives_distinct_ciphertexts() {
        let cipher = SecretCipher::new();
        let a = cipher.encrypt("same").unwrap();
        let b = cipher.encrypt("same").unwrap();
        assert_ne!(a, b);
        assert_eq!(cipher.decrypt(&a).unwrap(), cipher.decrypt(&b).unwrap());
    }

    #[test]
    fn test_decrypt_rejects_garbage() {
        let cipher = SecretCipher::new();
        assert!(cipher.decrypt("not_valid_base64!@#").is_err());

        use base64::{Engine as _, engine::general_purpose};
        let short = general_purpose::STANDARD.encode([1, 2, 3]);
        assert!(cipher.decrypt(&short).is_err());
    }

    #[test]
    fn test_decrypt_rejects_tampered_ciphertext() {
        let cipher = SecretCipher::new();
        let encrypted = cipher.encrypt("secret").unwrap();

        use base64::{Engine as _, engine::general_purpose};
        let mut raw = general_purpose::STANDARD.decode(&encrypted).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0xFF;
        let tampered = general_purpose::STANDARD.encode(&raw);

        assert!(cipher.decrypt(&tampered).is_err());
    }
}
