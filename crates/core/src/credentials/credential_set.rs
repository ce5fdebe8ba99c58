use super::{generate_short_ids, KeyPair, PublicKey, ShortId};
use crate::rng::RandomSource;
use serde::{Deserialize, Serialize};
use xpanel_common::Timestamp;

/// The live transport credentials of the deployment.
///
/// Replaced as a whole on rotation; the keypair and short ids always
/// travel together so no reader sees a new key with old short ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialSet {
    pub keypair: KeyPair,

    /// Ordered short identifiers, 2 to 4 of them
    pub short_ids: Vec<ShortId>,

    /// Masquerade server names
    pub server_names: Vec<String>,

    /// Masquerade destination (host:port)
    pub dest: String,

    /// Public address of the server, used when building links
    #[serde(default)]
    pub external_address: Option<String>,

    pub last_rotated: Timestamp,

    pub updated_at: Timestamp,
}

impl CredentialSet {
    /// Generate a brand-new set stamped with `now`
    pub fn generate(
        rng: &dyn RandomSource,
        dest: impl Into<String>,
        server_names: Vec<String>,
        now: Timestamp,
    ) -> Self {
        Self {
            keypair: KeyPair::generate(rng),
            short_ids: generate_short_ids(rng),
            server_names,
            dest: dest.into(),
            external_address: None,
            last_rotated: now,
            updated_at: now,
        }
    }

    pub fn with_external_address(mut self, address: Option<String>) -> Self {
        self.external_address = address;
        self
    }

    pub fn public_key(&self) -> PublicKey {
        self.keypair.public_key()
    }

    /// Host part of the masquerade destination
    pub fn dest_host(&self) -> &str {
        match self.dest.rsplit_once(':') {
            Some((host, _)) => host.trim_start_matches('[').trim_end_matches(']'),
            None => &self.dest,
        }
    }

    /// Whether `interval` has passed since the last rotation
    pub fn is_rotation_due(&self, now: Timestamp, interval: std::time::Duration) -> bool {
        now.since(self.last_rotated) >= interval
    }
}
