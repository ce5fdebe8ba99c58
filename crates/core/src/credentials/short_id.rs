use crate::rng::{token, RandomSource};
use serde::{Deserialize, Serialize};
use std::fmt;
use xpanel_common::config::reality::{MAX_SHORT_IDS, MIN_SHORT_IDS, SHORT_ID_LEN};

const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Short transport-level discriminator, `[a-z0-9]{8}`
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ShortId(String);

impl ShortId {
    pub fn generate(rng: &dyn RandomSource) -> Self {
        Self(token(rng, ALPHABET, SHORT_ID_LEN))
    }

    pub fn parse(s: &str) -> Result<Self, ShortIdError> {
        if s.len() != SHORT_ID_LEN {
            return Err(ShortIdError::InvalidLength(s.len()));
        }
        if !s.bytes().all(|b| ALPHABET.contains(&b)) {
            return Err(ShortIdError::InvalidCharacter(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ShortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ShortId({})", self.0)
    }
}

impl fmt::Display for ShortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ShortId {
    type Error = ShortIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ShortId> for String {
    fn from(value: ShortId) -> Self {
        value.0
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ShortIdError {
    #[error("short id must be 8 characters, got {0}")]
    InvalidLength(usize),

    #[error("short id must be lowercase alphanumeric: {0}")]
    InvalidCharacter(String),
}

/// Draw between `MIN_SHORT_IDS` and `MAX_SHORT_IDS` distinct short ids
pub fn generate_short_ids(rng: &dyn RandomSource) -> Vec<ShortId> {
    let count = MIN_SHORT_IDS + rng.below(MAX_SHORT_IDS - MIN_SHORT_IDS + 1);
    let mut ids: Vec<ShortId> = Vec::with_capacity(count);

    while ids.len() < count {
        let candidate = ShortId::generate(rng);
        if !ids.contains(&candidate) {
            ids.push(candidate);
        }
    }

    ids
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::{OsRandom, SeededRandom};

    fn matches_shape(id: &ShortId) -> bool {
        id.as_str().len() == 8
            && id
                .as_str()
                .bytes()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
    }

    #[test]
    fn test_generated_sets_have_valid_shape() {
        for _ in 0..200 {
            let ids = generate_short_ids(&OsRandom);
            assert!((2..=4).contains(&ids.len()));
            assert!(ids.iter().all(matches_shape));

            let mut unique = ids.clone();
            unique.sort();
            unique.dedup();
            assert_eq!(unique.len(), ids.len());
        }
    }

    #[test]
    fn test_every_count_is_reachable() {
        let rng = SeededRandom::new(3);
        let mut seen = [false; 5];
        for _ in 0..500 {
            seen[generate_short_ids(&rng).len()] = true;
        }
        assert!(seen[2] && seen[3] && seen[4]);
    }

    #[test]
    fn test_parse_validates() {
        assert!(ShortId::parse("ab12cd34").is_ok());
        assert_eq!(
            ShortId::parse("short").unwrap_err(),
            ShortIdError::InvalidLength(5)
        );
        assert!(matches!(
            ShortId::parse("AB12CD34"),
            Err(ShortIdError::InvalidCharacter(_))
        ));
    }

    #[test]
    fn test_serde_rejects_malformed() {
        let ok: ShortId = serde_json::from_str("\"0a1b2c3d\"").unwrap();
        assert_eq!(ok.as_str(), "0a1b2c3d");
        assert!(serde_json::from_str::<ShortId>("\"0a1b\"").is_err());
    }
}
