//! Signing capability.
//!
//! Every mutating operation takes an explicit `&dyn OperationSigner`; there is
//! no ambient wallet or session state. `KeyManager` loads an ed25519 secret
//! key once at startup.

use std::path::PathBuf;

use ed25519_dalek::{Signer as _, SigningKey, SECRET_KEY_LENGTH};
use rwa_core::Address;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::Zeroizing;

/// Something that can sign ledger operations on behalf of an identity.
pub trait OperationSigner: Send + Sync {
    /// Ledger identity of the signer (its public key).
    fn address(&self) -> Address;

    /// Sign a message digest.
    fn sign(&self, message: &[u8]) -> [u8; 64];
}

/// ed25519 keypair signer.
pub struct KeypairSigner {
    key: SigningKey,
}

impl KeypairSigner {
    #[must_use]
    pub fn new(key: SigningKey) -> Self {
        Self { key }
    }

    /// Fresh random keypair.
    #[must_use]
    pub fn generate() -> Self {
        Self::new(SigningKey::generate(&mut rand::rngs::OsRng))
    }

    /// Build from 32 secret bytes, or 64 bytes of `secret || public`.
    ///
    /// In the 64-byte form the public half must match the secret.
    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        match bytes.len() {
            SECRET_KEY_LENGTH => {
                let mut secret = Zeroizing::new([0u8; SECRET_KEY_LENGTH]);
                secret.copy_from_slice(bytes);
                Ok(Self::new(SigningKey::from_bytes(&secret)))
            }
            64 => {
                let signer = Self::from_secret_bytes(&bytes[..SECRET_KEY_LENGTH])?;
                let embedded = Address::from_slice(&bytes[SECRET_KEY_LENGTH..])
                    .map_err(|e| KeyError::InvalidKey(e.to_string()))?;
                if signer.address() != embedded {
                    return Err(KeyError::AddressMismatch {
                        expected: embedded,
                        actual: signer.address(),
                    });
                }
                Ok(signer)
            }
            n => Err(KeyError::InvalidKey(format!(
                "expected 32 or 64 key bytes, got {n}"
            ))),
        }
    }
}

impl OperationSigner for KeypairSigner {
    fn address(&self) -> Address {
        Address::new(self.key.verifying_key().to_bytes())
    }

    fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.key.sign(message).to_bytes()
    }
}

impl std::fmt::Debug for KeypairSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeypairSigner")
            .field("address", &self.address())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// KeySource and KeyManager
// =============================================================================

/// Source of the secret key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum KeySource {
    /// Hex key in an environment variable (development).
    EnvVar { var_name: String },
    /// Hex key in a file (production, 0600 permissions).
    File { path: PathBuf },
}

/// Holds the desk operator's signing key.
///
/// Keys are loaded once; key material is never logged.
pub struct KeyManager {
    signer: KeypairSigner,
}

impl KeyManager {
    /// Load the key from `source`, optionally verifying the derived address.
    pub fn load(source: &KeySource, expected: Option<Address>) -> Result<Self, KeyError> {
        fn parse_hex_key(hex_str: &str) -> Result<Zeroizing<Vec<u8>>, KeyError> {
            let trimmed = hex_str.trim().trim_start_matches("0x");
            Ok(Zeroizing::new(hex::decode(trimmed)?))
        }

        let secret_bytes = match source {
            KeySource::EnvVar { var_name } => {
                let value = Zeroizing::new(
                    std::env::var(var_name)
                        .map_err(|_| KeyError::EnvVarNotFound(var_name.clone()))?,
                );
                parse_hex_key(&value)?
            }
            KeySource::File { path } => {
                let content = Zeroizing::new(std::fs::read_to_string(path)?);
                parse_hex_key(&content)?
            }
        };

        let signer = KeypairSigner::from_secret_bytes(&secret_bytes)?;
        if let Some(expected) = expected {
            if signer.address() != expected {
                return Err(KeyError::AddressMismatch {
                    expected,
                    actual: signer.address(),
                });
            }
        }

        Ok(Self { signer })
    }

    #[must_use]
    pub fn signer(&self) -> &KeypairSigner {
        &self.signer
    }

    #[must_use]
    pub fn into_signer(self) -> KeypairSigner {
        self.signer
    }

    #[must_use]
    pub fn address(&self) -> Address {
        self.signer.address()
    }
}

/// Key management errors.
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),

    #[error("Failed to decode hex: {0}")]
    HexDecode(#[from] hex::FromHexError),

    #[error("Invalid secret key: {0}")]
    InvalidKey(String),

    #[error("Address mismatch: expected {expected}, got {actual}")]
    AddressMismatch { expected: Address, actual: Address },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signature, Verifier, VerifyingKey};

    #[test]
    fn test_sign_verifies_with_address() {
        let signer = KeypairSigner::from_secret_bytes(&[5u8; 32]).unwrap();
        let sig = signer.sign(b"hello");
        let vk = VerifyingKey::from_bytes(signer.address().as_bytes()).unwrap();
        assert!(vk.verify(b"hello", &Signature::from_bytes(&sig)).is_ok());
    }

    #[test]
    fn test_keypair_form_checks_public_half() {
        let signer = KeypairSigner::from_secret_bytes(&[5u8; 32]).unwrap();
        let mut keypair = vec![5u8; 32];
        keypair.extend_from_slice(signer.address().as_bytes());
        assert_eq!(
            KeypairSigner::from_secret_bytes(&keypair).unwrap().address(),
            signer.address()
        );

        let mut bad = vec![5u8; 32];
        bad.extend_from_slice(&[0u8; 32]);
        assert!(matches!(
            KeypairSigner::from_secret_bytes(&bad),
            Err(KeyError::AddressMismatch { .. })
        ));
    }

    #[test]
    fn test_rejects_bad_length() {
        assert!(matches!(
            KeypairSigner::from_secret_bytes(&[1u8; 10]),
            Err(KeyError::InvalidKey(_))
        ));
    }

    #[test]
    fn test_key_manager_env_var() {
        let var = "RWA_TEST_SIGNER_KEY_ENV";
        std::env::set_var(var, format!("0x{}", hex::encode([3u8; 32])));
        let source = KeySource::EnvVar {
            var_name: var.to_string(),
        };
        let expected = KeypairSigner::from_secret_bytes(&[3u8; 32]).unwrap().address();
        let manager = KeyManager::load(&source, Some(expected)).unwrap();
        assert_eq!(manager.address(), expected);

        let wrong = KeyManager::load(&source, Some(Address::ZERO));
        assert!(matches!(wrong, Err(KeyError::AddressMismatch { .. })));
        std::env::remove_var(var);
    }

    #[test]
    fn test_key_manager_missing_env_var() {
        let source = KeySource::EnvVar {
            var_name: "RWA_TEST_SIGNER_KEY_MISSING".to_string(),
        };
        assert!(matches!(
            KeyManager::load(&source, None),
            Err(KeyError::EnvVarNotFound(_))
        ));
    }

    #[test]
    fn test_key_manager_file() {
        let path = std::env::temp_dir().join(format!("rwa-key-{}.hex", std::process::id()));
        std::fs::write(&path, format!("{}\n", hex::encode([4u8; 32]))).unwrap();
        let manager = KeyManager::load(&KeySource::File { path: path.clone() }, None).unwrap();
        assert_eq!(
            manager.address(),
            KeypairSigner::from_secret_bytes(&[4u8; 32]).unwrap().address()
        );
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_debug_hides_secret() {
        let signer = KeypairSigner::from_secret_bytes(&[6u8; 32]).unwrap();
        let dbg = format!("{signer:?}");
        assert!(!dbg.contains(&hex::encode([6u8; 32])));
    }
}
