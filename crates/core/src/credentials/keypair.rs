use crate::rng::RandomSource;
use data_encoding::BASE64URL_NOPAD;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use x25519_dalek::{PublicKey as DalekPublicKey, StaticSecret};

/// Raw key length for both halves
pub const KEY_LEN: usize = 32;

/// X25519 private key of the transport. Never leaves the credential store.
#[derive(Clone, PartialEq, Eq)]
pub struct PrivateKey([u8; KEY_LEN]);

impl PrivateKey {
    /// Clamp raw bytes into a valid X25519 scalar
    pub fn from_bytes(mut bytes: [u8; KEY_LEN]) -> Self {
        bytes[0] &= 248;
        bytes[31] &= 127;
        bytes[31] |= 64;
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    /// Derive the matching public key
    pub fn public_key(&self) -> PublicKey {
        let secret = StaticSecret::from(self.0);
        PublicKey(DalekPublicKey::from(&secret).to_bytes())
    }

    /// Unpadded URL-safe base64, the engine's textual form
    pub fn to_base64(&self) -> String {
        BASE64URL_NOPAD.encode(&self.0)
    }

    pub fn from_base64(s: &str) -> Result<Self, KeyPairError> {
        decode_key(s).map(Self::from_bytes)
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateKey(<redacted>)")
    }
}

impl Serialize for PrivateKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_base64())
    }
}

impl<'de> Deserialize<'de> for PrivateKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_base64(&s).map_err(serde::de::Error::custom)
    }
}

/// X25519 public key handed to clients
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey([u8; KEY_LEN]);

impl PublicKey {
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    pub fn to_base64(&self) -> String {
        BASE64URL_NOPAD.encode(&self.0)
    }

    pub fn from_base64(s: &str) -> Result<Self, KeyPairError> {
        decode_key(s).map(Self)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self.to_base64())
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base64())
    }
}

impl Serialize for PublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_base64())
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_base64(&s).map_err(serde::de::Error::custom)
    }
}

/// Transport keypair
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPair {
    private_key: PrivateKey,
    public_key: PublicKey,
}

impl KeyPair {
    /// Generate a fresh keypair from the given randomness
    pub fn generate(rng: &dyn RandomSource) -> Self {
        let mut secret_bytes = [0u8; KEY_LEN];
        rng.fill_bytes(&mut secret_bytes);
        Self::from_private(PrivateKey::from_bytes(secret_bytes))
    }

    pub fn from_private(private_key: PrivateKey) -> Self {
        let public_key = private_key.public_key();
        Self {
            private_key,
            public_key,
        }
    }

    pub fn private_key(&self) -> &PrivateKey {
        &self.private_key
    }

    pub fn public_key(&self) -> PublicKey {
        self.public_key
    }

    /// Whether the stored public half still matches the private half
    pub fn is_consistent(&self) -> bool {
        self.private_key.public_key() == self.public_key
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &self.public_key.to_base64())
            .field("private_key", &"<redacted>")
            .finish()
    }
}

/// Errors related to keypair operations
#[derive(Debug, thiserror::Error)]
pub enum KeyPairError {
    #[error("Invalid key encoding: {0}")]
    InvalidEncoding(String),

    #[error("Invalid key length: {0} (expected 32)")]
    InvalidLength(usize),
}

fn decode_key(s: &str) -> Result<[u8; KEY_LEN], KeyPairError> {
    let bytes = BASE64URL_NOPAD
        .decode(s.trim().as_bytes())
        .map_err(|e| KeyPairError::InvalidEncoding(e.to_string()))?;

    if bytes.len() != KEY_LEN {
        return Err(KeyPairError::InvalidLength(bytes.len()));
    }

    let mut array = [0u8; KEY_LEN];
    array.copy_from_slice(&bytes);
    Ok(array)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::{OsRandom, SeededRandom};

    #[test]
    fn test_keypair_generation() {
        let keypair = KeyPair::generate(&OsRandom);
        assert!(keypair.is_consistent());
        assert_eq!(keypair.private_key().to_base64().len(), 43);
        assert_eq!(keypair.public_key().to_base64().len(), 43);
    }

    #[test]
    fn test_fresh_keys_differ() {
        let a = KeyPair::generate(&OsRandom);
        let b = KeyPair::generate(&OsRandom);
        assert_ne!(a.private_key(), b.private_key());
        assert_ne!(a.public_key(), b.public_key());
    }

    #[test]
    fn test_seeded_generation_is_reproducible() {
        let a = KeyPair::generate(&SeededRandom::new(9));
        let b = KeyPair::generate(&SeededRandom::new(9));
        assert_eq!(a, b);
    }

    #[test]
    fn test_private_key_is_clamped() {
        let key = PrivateKey::from_bytes([0xff; KEY_LEN]);
        assert_eq!(key.as_bytes()[0] & 7, 0);
        assert_eq!(key.as_bytes()[31] & 0x80, 0);
        assert_eq!(key.as_bytes()[31] & 0x40, 0x40);
    }

    #[test]
    fn test_base64_roundtrip_preserves_public_key() {
        let keypair = KeyPair::generate(&OsRandom);
        let encoded = keypair.private_key().to_base64();

        let restored = KeyPair::from_private(PrivateKey::from_base64(&encoded).unwrap());
        assert_eq!(restored.public_key(), keypair.public_key());
    }

    #[test]
    fn test_rejects_bad_keys() {
        assert!(matches!(
            PublicKey::from_base64("!!!"),
            Err(KeyPairError::InvalidEncoding(_))
        ));
        assert!(matches!(
            PublicKey::from_base64("AAAA"),
            Err(KeyPairError::InvalidLength(3))
        ));
    }

    #[test]
    fn test_debug_redacts_private_key() {
        let keypair = KeyPair::generate(&OsRandom);
        let debug = format!("{:?}", keypair);
        assert!(debug.contains("<redacted>"));
        assert!(!debug.contains(&keypair.private_key().to_base64()));
    }
}
