//! Engine routing rules.
//!
//! Rules are evaluated by the engine top to bottom, so group order matters:
//! region-direct rules come before the ad-block rule.

use serde::{Deserialize, Serialize};
use xpanel_common::RoutingToggles;

pub const DIRECT_TAG: &str = "direct";
pub const BLOCKED_TAG: &str = "blocked";
pub const DOMAIN_STRATEGY: &str = "IPIfNonMatch";

pub const REGION_GEOIP: &str = "geoip:ir";
pub const REGION_GEOSITE: &str = "geosite:ir";
pub const ADS_GEOSITE: &str = "geosite:category-ads-all";

/// One engine routing rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingRule {
    #[serde(rename = "type")]
    pub kind: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ip: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub domain: Vec<String>,

    #[serde(rename = "outboundTag")]
    pub outbound_tag: String,
}

impl RoutingRule {
    fn field(outbound_tag: &str) -> Self {
        Self {
            kind: "field".to_string(),
            ip: Vec::new(),
            domain: Vec::new(),
            outbound_tag: outbound_tag.to_string(),
        }
    }

    /// Rule matching IP tags
    pub fn ip(tags: &[&str], outbound_tag: &str) -> Self {
        Self {
            ip: tags.iter().map(|t| t.to_string()).collect(),
            ..Self::field(outbound_tag)
        }
    }

    /// Rule matching domain tags
    pub fn domain(tags: &[&str], outbound_tag: &str) -> Self {
        Self {
            domain: tags.iter().map(|t| t.to_string()).collect(),
            ..Self::field(outbound_tag)
        }
    }
}

/// The `routing` section of the engine document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingConfig {
    #[serde(rename = "domainStrategy")]
    pub domain_strategy: String,

    pub rules: Vec<RoutingRule>,
}

/// Builds the rule list from toggles. Stateless.
pub struct RoutingPolicy;

impl RoutingPolicy {
    pub fn build(region_direct: bool, ad_block: bool) -> Vec<RoutingRule> {
        let mut rules = Vec::new();

        if region_direct {
            rules.push(RoutingRule::ip(&[REGION_GEOIP], DIRECT_TAG));
            rules.push(RoutingRule::domain(&[REGION_GEOSITE], DIRECT_TAG));
        }

        if ad_block {
            rules.push(RoutingRule::domain(&[ADS_GEOSITE], BLOCKED_TAG));
        }

        rules
    }

    /// Full `routing` section for the given toggles
    pub fn config(toggles: RoutingToggles) -> RoutingConfig {
        RoutingConfig {
            domain_strategy: DOMAIN_STRATEGY.to_string(),
            rules: Self::build(toggles.region_direct, toggles.ad_block),
        }
    }

    pub fn append(mut rules: Vec<RoutingRule>, rule: RoutingRule) -> Vec<RoutingRule> {
        rules.push(rule);
        rules
    }

    /// Drop every rule sending traffic to `tag`
    pub fn remove_by_tag(mut rules: Vec<RoutingRule>, tag: &str) -> Vec<RoutingRule> {
        rules.retain(|r| r.outbound_tag != tag);
        rules
    }
}
