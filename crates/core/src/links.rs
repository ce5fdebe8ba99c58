//! Subscription links.
//!
//! A link is built in two steps: a [`VlessDescriptor`] is resolved from the
//! user and the live credentials (including the random SNI and short id
//! choice), then rendered into one of the client dialects. Rendering is
//! pure, so every dialect rendered from one descriptor shares the same
//! random selections.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;
use xpanel_common::config::reality::{FINGERPRINT, PLACEHOLDER_ADDRESS};
use xpanel_common::{ConnectionId, PanelError, User};

use crate::credentials::CredentialSet;
use crate::rng::{pick, RandomSource};

/// Client application URI dialect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    V2rayNg,
    Shadowrocket,
    /// Same encoding as v2rayNG
    Nekoray,
}

impl Dialect {
    pub const ALL: [Dialect; 3] = [Dialect::V2rayNg, Dialect::Shadowrocket, Dialect::Nekoray];

    pub fn as_str(&self) -> &'static str {
        match self {
            Dialect::V2rayNg => "v2rayng",
            Dialect::Shadowrocket => "shadowrocket",
            Dialect::Nekoray => "nekoray",
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dialect {
    type Err = PanelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "v2rayng" => Ok(Dialect::V2rayNg),
            "shadowrocket" => Ok(Dialect::Shadowrocket),
            "nekoray" => Ok(Dialect::Nekoray),
            other => Err(PanelError::invalid(format!("unknown dialect '{}'", other))),
        }
    }
}

/// Where the link's server address came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressSource {
    Explicit,
    Stored,
    Configured,
    Placeholder,
}

/// Dialect-independent connection descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VlessDescriptor {
    pub id: ConnectionId,
    pub label: String,
    pub address: String,
    pub address_source: AddressSource,
    pub port: u16,
    /// Host part of the masquerade destination
    pub host: String,
    /// Empty when the set has no server names
    pub sni: String,
    pub public_key: String,
    /// Empty when the set has no short ids
    pub short_id: String,
    pub fingerprint: String,
}

#[derive(Debug)]
pub struct EncodedLink {
    pub uri: String,
    /// `AddressUnresolved` when the placeholder host was used
    pub warning: Option<PanelError>,
}

/// All dialects for one user
#[derive(Debug, Serialize)]
pub struct SubscriptionLinks {
    pub links: BTreeMap<Dialect, String>,
    pub warnings: Vec<String>,
}

impl SubscriptionLinks {
    pub fn get(&self, dialect: Dialect) -> Option<&str> {
        self.links.get(&dialect).map(String::as_str)
    }
}

pub struct LinkEncoder {
    rng: Arc<dyn RandomSource>,
    default_address: Option<String>,
    port: u16,
    label_prefix: String,
}

impl LinkEncoder {
    pub fn new(rng: Arc<dyn RandomSource>, port: u16) -> Self {
        Self {
            rng,
            default_address: None,
            port,
            label_prefix: xpanel_common::config::reality::DEFAULT_LINK_LABEL_PREFIX.to_string(),
        }
    }

    /// Address used when neither the caller nor the store provide one
    pub fn with_default_address(mut self, address: Option<String>) -> Self {
        self.default_address = address.filter(|a| !a.trim().is_empty());
        self
    }

    pub fn with_label_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.label_prefix = prefix.into();
        self
    }

    /// Resolve the address: explicit, then stored, then configured, then placeholder
    pub fn resolve_address(
        &self,
        explicit: Option<&str>,
        credentials: &CredentialSet,
    ) -> (String, AddressSource) {
        let non_empty = |s: &&str| !s.trim().is_empty();

        if let Some(addr) = explicit.filter(non_empty) {
            return (addr.trim().to_string(), AddressSource::Explicit);
        }
        if let Some(addr) = credentials.external_address.as_deref().filter(non_empty) {
            return (addr.trim().to_string(), AddressSource::Stored);
        }
        if let Some(addr) = self.default_address.as_deref().filter(non_empty) {
            return (addr.trim().to_string(), AddressSource::Configured);
        }
        (PLACEHOLDER_ADDRESS.to_string(), AddressSource::Placeholder)
    }

    /// Build the descriptor, drawing a random SNI and short id
    pub fn descriptor(
        &self,
        user: &User,
        credentials: &CredentialSet,
        address: Option<&str>,
    ) -> VlessDescriptor {
        let (address, address_source) = self.resolve_address(address, credentials);
        if address_source == AddressSource::Placeholder {
            warn!(
                "No server address configured, link for '{}' uses placeholder {}",
                user.name, PLACEHOLDER_ADDRESS
            );
        }

        let rng = self.rng.as_ref();
        VlessDescriptor {
            id: user.connection_id,
            label: format!("{}{}", self.label_prefix, user.name),
            address,
            address_source,
            port: self.port,
            host: credentials.dest_host().to_string(),
            sni: pick(rng, &credentials.server_names)
                .cloned()
                .unwrap_or_default(),
            public_key: credentials.public_key().to_base64(),
            short_id: pick(rng, &credentials.short_ids)
                .map(|s| s.as_str().to_string())
                .unwrap_or_default(),
            fingerprint: FINGERPRINT.to_string(),
        }
    }

    /// Render a descriptor in `dialect`. Pure.
    pub fn render(descriptor: &VlessDescriptor, dialect: Dialect) -> String {
        let d = descriptor;
        let params: Vec<(&str, &str)> = match dialect {
            Dialect::V2rayNg | Dialect::Nekoray => vec![
                ("type", "tcp"),
                ("security", "reality"),
                ("sni", d.sni.as_str()),
                ("fp", d.fingerprint.as_str()),
                ("pbk", d.public_key.as_str()),
                ("sid", d.short_id.as_str()),
                ("spx", ""),
            ],
            Dialect::Shadowrocket => vec![
                ("encryption", "none"),
                ("type", "tcp"),
                ("security", "reality"),
                ("sni", d.sni.as_str()),
                ("fp", d.fingerprint.as_str()),
                ("pbk", d.public_key.as_str()),
                ("sid", d.short_id.as_str()),
            ],
        };

        let query = params
            .iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");

        format!(
            "vless://{}@{}:{}?{}#{}",
            d.id,
            uri_host(&d.address),
            d.port,
            query,
            urlencoding::encode(&d.label)
        )
    }

    /// Link for one dialect
    pub fn encode(
        &self,
        user: &User,
        credentials: &CredentialSet,
        address: Option<&str>,
        dialect: Dialect,
    ) -> EncodedLink {
        let descriptor = self.descriptor(user, credentials, address);
        EncodedLink {
            uri: Self::render(&descriptor, dialect),
            warning: placeholder_warning(&descriptor),
        }
    }

    /// Links for every dialect from a single descriptor
    pub fn encode_all(
        &self,
        user: &User,
        credentials: &CredentialSet,
        address: Option<&str>,
    ) -> SubscriptionLinks {
        let descriptor = self.descriptor(user, credentials, address);
        let links = Dialect::ALL
            .iter()
            .map(|&dialect| (dialect, Self::render(&descriptor, dialect)))
            .collect();

        SubscriptionLinks {
            links,
            warnings: placeholder_warning(&descriptor)
                .map(|w| vec![w.to_string()])
                .unwrap_or_default(),
        }
    }
}

impl fmt::Debug for LinkEncoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkEncoder")
            .field("default_address", &self.default_address)
            .field("port", &self.port)
            .field("label_prefix", &self.label_prefix)
            .finish_non_exhaustive()
    }
}

fn placeholder_warning(descriptor: &VlessDescriptor) -> Option<PanelError> {
    (descriptor.address_source == AddressSource::Placeholder).then(|| {
        PanelError::AddressUnresolved {
            placeholder: PLACEHOLDER_ADDRESS.to_string(),
        }
    })
}

/// IPv6 literals need brackets in the authority part
fn uri_host(address: &str) -> String {
    if address.contains(':') && !address.starts_with('[') {
        format!("[{}]", address)
    } else {
        address.to_string()
    }
}
