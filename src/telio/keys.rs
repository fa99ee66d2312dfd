//! WireGuard keys
//!
//! Both key kinds are 32 bytes and travel as standard base64 text.

use std::fmt;
use std::str::FromStr;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};

use super::error::TelioError;

pub const KEY_SIZE: usize = 32;

/// Key parsing errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    #[error("key is not valid base64: {0}")]
    Encoding(String),

    #[error("key must be {KEY_SIZE} bytes, got {0}")]
    Length(usize),
}

impl From<KeyError> for TelioError {
    fn from(_: KeyError) -> Self {
        TelioError::InvalidKey
    }
}

fn decode(text: &str) -> Result<[u8; KEY_SIZE], KeyError> {
    let bytes = STANDARD
        .decode(text.trim())
        .map_err(|e| KeyError::Encoding(e.to_string()))?;
    <[u8; KEY_SIZE]>::try_from(bytes.as_slice()).map_err(|_| KeyError::Length(bytes.len()))
}

macro_rules! key_type {
    ($name:ident) => {
        impl $name {
            pub const fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
                Self(bytes)
            }

            pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
                &self.0
            }
        }

        impl FromStr for $name {
            type Err = KeyError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                decode(s).map(Self)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&STANDARD.encode(self.0))
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let text = String::deserialize(deserializer)?;
                text.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

/// X25519 private key.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SecretKey([u8; KEY_SIZE]);

/// X25519 public key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PublicKey([u8; KEY_SIZE]);

key_type!(SecretKey);
key_type!(PublicKey);

impl SecretKey {
    /// Fresh clamped key from the OS random source.
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        OsRng.fill_bytes(&mut bytes);
        bytes[0] &= 248;
        bytes[31] &= 127;
        bytes[31] |= 64;
        Self(bytes)
    }

    pub fn public(&self) -> PublicKey {
        let secret = StaticSecret::from(self.0);
        PublicKey(X25519PublicKey::from(&secret).to_bytes())
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretKey(****)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_is_clamped() {
        let key = SecretKey::generate();
        let bytes = key.as_bytes();
        assert_eq!(bytes[0] & 7, 0);
        assert_eq!(bytes[31] & 128, 0);
        assert_eq!(bytes[31] & 64, 64);
    }

    #[test]
    fn test_public_matches_x25519() {
        // RFC 7748 section 6.1, Alice.
        let secret: SecretKey = "dwdtCnMYpX08FsFyUbJmRd9ML4frwJkqsXf7pR25LCo=".parse().unwrap();
        let public = secret.public();
        assert_eq!(
            hex::encode(public.as_bytes()),
            "8520f0098930a754748b7ddcb43ef75a0dbf3a0d26381af4eba4a98eaa9b4e6a"
        );
    }

    #[test]
    fn test_text_form() {
        let key = SecretKey::generate();
        let text = key.to_string();
        assert_eq!(text.len(), 44);
        assert_eq!(text.parse::<SecretKey>().unwrap(), key);
    }

    #[test]
    fn test_invalid_keys() {
        assert!(matches!("not base64!".parse::<PublicKey>(), Err(KeyError::Encoding(_))));
        assert_eq!("AAAA".parse::<PublicKey>(), Err(KeyError::Length(3)));
        assert_eq!(TelioError::from(KeyError::Length(3)), TelioError::InvalidKey);
    }

    #[test]
    fn test_secret_debug_redacted() {
        assert_eq!(format!("{:?}", SecretKey::generate()), "SecretKey(****)");
    }

    #[test]
    fn test_serde_as_string() {
        let key = SecretKey::generate().public();
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, format!("\"{key}\""));
        assert_eq!(serde_json::from_str::<PublicKey>(&json).unwrap(), key);
    }
}
