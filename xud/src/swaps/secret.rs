use rand::RngCore;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::{fmt, str::FromStr};

const PREFIX: &str = "0x";

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FromHexError {
    #[error("expected 32 bytes, got {0}")]
    InvalidLength(usize),
    #[error("value is not valid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),
    #[error("value is missing the 0x prefix")]
    MissingPrefix,
}

fn decode_32(hex_str: &str) -> Result<[u8; 32], FromHexError> {
    let bytes = hex::decode(hex_str)?;
    let len = bytes.len();
    <[u8; 32]>::try_from(bytes).map_err(|_| FromHexError::InvalidLength(len))
}

/// The preimage of a hash-lock. Revealing it redeems both legs of a swap.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Secret([u8; 32]);

impl Secret {
    pub fn random() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Secret(bytes)
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Secret(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, FromHexError> {
        <[u8; 32]>::try_from(bytes)
            .map(Secret)
            .map_err(|_| FromHexError::InvalidLength(bytes.len()))
    }

    /// Parses the `0x`-prefixed form used by Ethereum-style backends.
    pub fn from_prefixed_hex(hex_str: &str) -> Result<Self, FromHexError> {
        let stripped = hex_str
            .strip_prefix(PREFIX)
            .ok_or(FromHexError::MissingPrefix)?;
        stripped.parse()
    }

    pub fn hash(&self) -> SecretHash {
        SecretHash(Sha256::digest(self.0).into())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_prefixed_hex(&self) -> String {
        format!("{}{}", PREFIX, self)
    }
}

impl FromStr for Secret {
    type Err = FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        decode_32(s).map(Secret)
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secret({})", self)
    }
}

/// The sha256 hash of a [`Secret`]. Identifies a deal across both legs.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SecretHash([u8; 32]);

impl SecretHash {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        SecretHash(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_hash_of(&self, secret: &Secret) -> bool {
        secret.hash() == *self
    }

    pub fn to_prefixed_hex(&self) -> String {
        format!("{}{}", PREFIX, self)
    }
}

impl FromStr for SecretHash {
    type Err = FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        decode_32(s.strip_prefix(PREFIX).unwrap_or(s)).map(SecretHash)
    }
}

impl fmt::Display for SecretHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for SecretHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretHash({})", self)
    }
}

macro_rules! impl_hex_serde {
    ($t:ty) => {
        impl Serialize for $t {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_string())
            }
        }

        impl<'de> Deserialize<'de> for $t {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(de::Error::custom)
            }
        }
    };
}

impl_hex_serde!(Secret);
impl_hex_serde!(SecretHash);

#[cfg(test)]
mod tests {
    use super::*;
    use spectral::prelude::*;

    const PREIMAGE: &str = "68656c6c6f20776f726c642121212121212121212121212121212121212121a0";

    #[test]
    fn hash_is_sha256_of_the_preimage() {
        let secret = Secret::from_bytes([0u8; 32]);

        assert_eq!(
            secret.hash().to_string(),
            "66687aadf862bd776c8fc18b8e9f8e20089714856ee233b3902a591d0d5f2925"
        );
    }

    #[test]
    fn prefixed_hex_requires_the_prefix() {
        let without = Secret::from_prefixed_hex(PREIMAGE);
        let with = Secret::from_prefixed_hex(&format!("0x{}", PREIMAGE));

        assert_eq!(without, Err(FromHexError::MissingPrefix));
        assert_that(&with).is_ok();
        assert_eq!(with.unwrap().to_string(), PREIMAGE);
    }

    #[test]
    fn short_values_are_rejected() {
        assert_eq!(
            "abcd".parse::<Secret>(),
            Err(FromHexError::InvalidLength(2))
        );
    }

    #[test]
    fn secret_hash_accepts_both_forms() {
        let secret: Secret = PREIMAGE.parse().unwrap();
        let hash = secret.hash();

        let plain: SecretHash = hash.to_string().parse().unwrap();
        let prefixed: SecretHash = hash.to_prefixed_hex().parse().unwrap();

        assert_eq!(plain, hash);
        assert_eq!(prefixed, hash);
        assert_that(&hash.is_hash_of(&secret)).is_true();
        assert_that(&hash.is_hash_of(&Secret::random())).is_false();
    }

    #[test]
    fn serializes_as_plain_hex_string() {
        let secret: Secret = PREIMAGE.parse().unwrap();

        let json = serde_json::to_string(&secret).unwrap();

        assert_eq!(json, format!("\"{}\"", PREIMAGE));
        assert_eq!(serde_json::from_str::<Secret>(&json).unwrap(), secret);
    }
}
