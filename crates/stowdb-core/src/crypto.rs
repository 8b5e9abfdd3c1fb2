//! Key resolution and the cipher contract used by encrypted fields.
//!
//! `ChaChaCipher` is the default cipher; other primitives plug in through
//! the `Cipher` trait.

use crate::{
    error::{Error, ErrorClass, ErrorOrigin},
    value::UnsupportedError,
};
use chacha20poly1305::{
    ChaCha20Poly1305, Nonce,
    aead::{Aead, AeadCore, KeyInit, OsRng},
};
use derive_more::Deref;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::{
    fmt,
    path::{Path, PathBuf},
};

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

///
/// KeyDescriptor
///
/// Where an encrypted field's key material comes from.
///

#[derive(Clone, Deserialize, Eq, PartialEq, Serialize)]
pub enum KeyDescriptor {
    Inline(#[serde(with = "serde_bytes")] Vec<u8>),
    File(PathBuf),
    Certificate { store: String, thumbprint: String },
}

// inline material stays out of logs
impl fmt::Debug for KeyDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inline(bytes) => write!(f, "Inline(<{} bytes>)", bytes.len()),
            Self::File(path) => f.debug_tuple("File").field(path).finish(),
            Self::Certificate { store, thumbprint } => f
                .debug_struct("Certificate")
                .field("store", store)
                .field("thumbprint", thumbprint)
                .finish(),
        }
    }
}

impl fmt::Display for KeyDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inline(_) => f.write_str("inline key"),
            Self::File(path) => write!(f, "key file '{}'", path.display()),
            Self::Certificate { store, thumbprint } => {
                write!(f, "certificate '{thumbprint}' in store '{store}'")
            }
        }
    }
}

///
/// KeyMaterial
///

#[derive(Clone, Deref, Eq, PartialEq)]
pub struct KeyMaterial(Vec<u8>);

impl KeyMaterial {
    #[must_use]
    pub const fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyMaterial(<{} bytes>)", self.0.len())
    }
}

///
/// KeySource
///

pub trait KeySource: Send + Sync {
    fn resolve_key(&self, descriptor: &KeyDescriptor) -> Result<KeyMaterial, Error>;
}

///
/// DefaultKeySource
///
/// Resolves inline material and key files. Relative key file paths are
/// resolved against `key_dir` when one is configured.
/// Certificate stores are platform services and are not supported here.
///

#[derive(Clone, Debug, Default)]
pub struct DefaultKeySource {
    key_dir: Option<PathBuf>,
}

impl DefaultKeySource {
    #[must_use]
    pub const fn new(key_dir: Option<PathBuf>) -> Self {
        Self { key_dir }
    }

    fn resolve_path(&self, path: &Path) -> PathBuf {
        match &self.key_dir {
            Some(dir) if path.is_relative() => dir.join(path),
            _ => path.to_path_buf(),
        }
    }
}

impl KeySource for DefaultKeySource {
    fn resolve_key(&self, descriptor: &KeyDescriptor) -> Result<KeyMaterial, Error> {
        let bytes = match descriptor {
            KeyDescriptor::Inline(bytes) => bytes.clone(),
            KeyDescriptor::File(path) => {
                let path = self.resolve_path(path);
                std::fs::read(&path).map_err(|err| {
                    Error::new(
                        ErrorClass::NotFound,
                        ErrorOrigin::Crypto,
                        format!("cannot read key file '{}': {err}", path.display()),
                    )
                })?
            }
            KeyDescriptor::Certificate { .. } => {
                return Err(UnsupportedError::KeySource {
                    descriptor: descriptor.to_string(),
                }
                .into());
            }
        };

        if bytes.is_empty() {
            return Err(Error::new(
                ErrorClass::Config,
                ErrorOrigin::Crypto,
                format!("{descriptor} resolved to empty key material"),
            ));
        }

        Ok(KeyMaterial(bytes))
    }
}

///
/// Cipher
///

pub trait Cipher: Send + Sync {
    fn encrypt(&self, key: &KeyMaterial, plain: &[u8]) -> Result<Vec<u8>, Error>;

    fn decrypt(&self, key: &KeyMaterial, sealed: &[u8]) -> Result<Vec<u8>, Error>;
}

///
/// ChaChaCipher
///
/// ChaCha20-Poly1305 with a fresh random nonce prepended to every sealed
/// value. The cipher key is the SHA-256 digest of the resolved material, so
/// keys of any length are accepted.
///

#[derive(Clone, Copy, Debug, Default)]
pub struct ChaChaCipher;

impl ChaChaCipher {
    fn aead(key: &KeyMaterial) -> Result<ChaCha20Poly1305, Error> {
        let digest = Sha256::digest(&key.0);

        ChaCha20Poly1305::new_from_slice(&digest).map_err(|err| {
            Error::invariant(ErrorOrigin::Crypto, format!("derived key rejected: {err}"))
        })
    }
}

impl Cipher for ChaChaCipher {
    fn encrypt(&self, key: &KeyMaterial, plain: &[u8]) -> Result<Vec<u8>, Error> {
        let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
        let body = Self::aead(key)?
            .encrypt(&nonce, plain)
            .map_err(|_| Error::invariant(ErrorOrigin::Crypto, "encryption failed"))?;

        let mut out = Vec::with_capacity(NONCE_LEN + body.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&body);

        Ok(out)
    }

    fn decrypt(&self, key: &KeyMaterial, sealed: &[u8]) -> Result<Vec<u8>, Error> {
        if sealed.len() < NONCE_LEN + TAG_LEN {
            return Err(Error::corruption(
                ErrorOrigin::Crypto,
                format!("ciphertext too short: {} bytes", sealed.len()),
            ));
        }

        let (nonce, body) = sealed.split_at(NONCE_LEN);
        Self::aead(key)?
            .decrypt(Nonce::from_slice(nonce), body)
            .map_err(|_| {
                Error::corruption(
                    ErrorOrigin::Crypto,
                    "ciphertext integrity check failed (wrong key or tampered data)",
                )
            })
    }
}

///
/// TESTS
///

#[cfg(test)]
mod tests {
    use super::*;

    fn key(bytes: &[u8]) -> KeyMaterial {
        KeyMaterial::new(bytes.to_vec())
    }

    #[test]
    fn cipher_round_trips_multi_block_payload() {
        let plain: Vec<u8> = (0..100u8).collect();
        let sealed = ChaChaCipher.encrypt(&key(b"secret"), &plain).unwrap();

        assert_eq!(sealed.len(), NONCE_LEN + plain.len() + TAG_LEN);
        assert!(!sealed.windows(plain.len()).any(|w| w == &plain[..]));
        assert_eq!(ChaChaCipher.decrypt(&key(b"secret"), &sealed).unwrap(), plain);
    }

    #[test]
    fn equal_plaintexts_seal_differently() {
        let first = ChaChaCipher.encrypt(&key(b"secret"), b"111-11-1111").unwrap();
        let second = ChaChaCipher.encrypt(&key(b"secret"), b"111-11-1111").unwrap();

        assert_ne!(first, second);
        assert_ne!(first[..NONCE_LEN], second[..NONCE_LEN]);
        assert_eq!(
            ChaChaCipher.decrypt(&key(b"secret"), &second).unwrap(),
            b"111-11-1111"
        );
    }

    #[test]
    fn wrong_key_fails_integrity_check() {
        let sealed = ChaChaCipher.encrypt(&key(b"right"), b"hello").unwrap();
        let err = ChaChaCipher.decrypt(&key(b"wrong"), &sealed).unwrap_err();

        assert_eq!(err.class, ErrorClass::Corruption);
        assert_eq!(err.origin, ErrorOrigin::Crypto);
    }

    #[test]
    fn tampered_or_truncated_ciphertext_is_corruption() {
        let mut sealed = ChaChaCipher.encrypt(&key(b"secret"), b"hello").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;

        let err = ChaChaCipher.decrypt(&key(b"secret"), &sealed).unwrap_err();
        assert_eq!(err.class, ErrorClass::Corruption);

        let err = ChaChaCipher.decrypt(&key(b"secret"), &sealed[..NONCE_LEN]).unwrap_err();
        assert!(err.message.contains("too short"));
    }

    #[test]
    fn certificate_descriptor_is_unsupported() {
        let err = DefaultKeySource::default()
            .resolve_key(&KeyDescriptor::Certificate {
                store: "My".into(),
                thumbprint: "ab12".into(),
            })
            .unwrap_err();

        assert!(err.is_unsupported());
        assert!(err.message.contains("ab12"));
    }

    #[test]
    fn key_file_resolves_relative_to_key_dir() {
        let dir = std::env::temp_dir().join(format!("stowdb-keys-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("field.key"), b"file-key").unwrap();

        let source = DefaultKeySource::new(Some(dir.clone()));
        let material = source
            .resolve_key(&KeyDescriptor::File(PathBuf::from("field.key")))
            .unwrap();

        assert_eq!(&material[..], b"file-key");
        std::fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn missing_key_file_is_not_found() {
        let err = DefaultKeySource::default()
            .resolve_key(&KeyDescriptor::File(PathBuf::from("/nonexistent/stowdb.key")))
            .unwrap_err();

        assert_eq!(err.class, ErrorClass::NotFound);
    }

    #[test]
    fn inline_key_debug_hides_material() {
        let descriptor = KeyDescriptor::Inline(b"topsecret".to_vec());

        assert!(!format!("{descriptor:?}").contains("topsecret"));
    }
}
