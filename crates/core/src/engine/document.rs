use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, warn};
use xpanel_common::{ConnectionId, Result};

use crate::routing::RoutingConfig;

/// Tag of the inbound listener carrying the clients
pub const INBOUND_TAG: &str = "vless-reality";

const CLIENT_PROTOCOL: &str = "vless";

/// Complete engine-ready configuration.
///
/// Wraps the raw JSON so that fields the panel does not manage survive
/// regeneration verbatim.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigDocument(Value);

/// One entry of an inbound's client list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientEntry {
    pub id: ConnectionId,
    pub email: String,
    pub flow: String,
}

/// The `realitySettings` block of the inbound
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RealitySettings {
    pub dest: String,

    #[serde(rename = "serverNames")]
    pub server_names: Vec<String>,

    #[serde(rename = "privateKey")]
    pub private_key: String,

    #[serde(rename = "shortIds")]
    pub short_ids: Vec<String>,

    pub show: bool,
}

impl ConfigDocument {
    pub fn from_value(value: Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }

    pub(crate) fn as_value_mut(&mut self) -> &mut Value {
        &mut self.0
    }

    /// Inbounds speaking the client protocol
    pub fn client_inbounds(&self) -> impl Iterator<Item = &Value> {
        self.0
            .get("inbounds")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter(|inbound| is_client_inbound(inbound))
    }

    /// Client list of the first client inbound
    pub fn clients(&self) -> Result<Vec<ClientEntry>> {
        let clients = self
            .client_inbounds()
            .next()
            .and_then(|inbound| inbound.pointer("/settings/clients"))
            .cloned()
            .unwrap_or_else(|| Value::Array(Vec::new()));
        Ok(serde_json::from_value(clients)?)
    }

    /// Transport block of the first client inbound
    pub fn reality_settings(&self) -> Result<Option<RealitySettings>> {
        match self
            .client_inbounds()
            .next()
            .and_then(|inbound| inbound.pointer("/streamSettings/realitySettings"))
        {
            Some(block) => Ok(Some(serde_json::from_value(block.clone())?)),
            None => Ok(None),
        }
    }

    pub fn routing(&self) -> Result<Option<RoutingConfig>> {
        match self.0.get("routing") {
            Some(routing) => Ok(Some(serde_json::from_value(routing.clone())?)),
            None => Ok(None),
        }
    }

    pub fn to_pretty_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.0)?)
    }
}

pub(crate) fn is_client_inbound(inbound: &Value) -> bool {
    inbound.get("protocol").and_then(Value::as_str) == Some(CLIENT_PROTOCOL)
}

/// Built-in document used when no template is available
pub fn default_document(listen_port: u16) -> Value {
    json!({
        "log": {
            "loglevel": "warning",
            "access": "/var/log/xray/access.log",
            "error": "/var/log/xray/error.log"
        },
        "stats": {},
        "api": {
            "tag": "api",
            "services": ["StatsService", "HandlerService"]
        },
        "inbounds": [default_inbound(listen_port)],
        "outbounds": [
            {"protocol": "freedom", "tag": "direct"},
            {"protocol": "blackhole", "tag": "blocked"}
        ],
        "routing": {
            "domainStrategy": "IPIfNonMatch",
            "rules": []
        }
    })
}

fn default_inbound(listen_port: u16) -> Value {
    json!({
        "tag": INBOUND_TAG,
        "port": listen_port,
        "protocol": CLIENT_PROTOCOL,
        "settings": {
            "clients": [],
            "decryption": "none"
        },
        "streamSettings": {
            "network": "tcp",
            "security": "reality",
            "realitySettings": {},
            "sockopt": {
                "tcpFastOpen": true
            }
        },
        "fragment": {
            "packets": "tlshello",
            "length": "100-200",
            "interval": "10-20"
        }
    })
}

/// Read the document template, `None` when absent or unreadable
pub async fn load_template(path: Option<&Path>) -> Option<Value> {
    let path = path?;

    let contents = match tokio::fs::read_to_string(path).await {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!("Template {:?} not found, using built-in document", path);
            return None;
        }
        Err(e) => {
            warn!("Failed to read template {:?}: {}", path, e);
            return None;
        }
    };

    match serde_json::from_str::<Value>(&contents) {
        Ok(value) if value.is_object() => {
            debug!("Loaded document template from {:?}", path);
            Some(value)
        }
        Ok(_) => {
            warn!("Template {:?} is not a JSON object, ignoring it", path);
            None
        }
        Err(e) => {
            warn!("Template {:?} is not valid JSON: {}", path, e);
            None
        }
    }
}

/// Resolve a template against the built-in defaults.
///
/// Top-level sections missing from the template are taken from the
/// default document, and a client inbound is added if the template has
/// none. Everything present in the template is kept as-is.
pub fn merge_defaults(template: Option<Value>, listen_port: u16) -> Value {
    let defaults = default_document(listen_port);

    let mut doc = match template {
        Some(Value::Object(map)) => map,
        _ => return defaults,
    };

    if let Value::Object(default_map) = defaults {
        for (key, value) in default_map {
            doc.entry(key).or_insert(value);
        }
    }

    ensure_client_inbound(&mut doc, listen_port);
    Value::Object(doc)
}

fn ensure_client_inbound(doc: &mut Map<String, Value>, listen_port: u16) {
    let inbounds = doc
        .entry("inbounds")
        .or_insert_with(|| Value::Array(Vec::new()));

    if !inbounds.is_array() {
        *inbounds = Value::Array(Vec::new());
    }

    if let Value::Array(list) = inbounds {
        if !list.iter().any(is_client_inbound) {
            list.push(default_inbound(listen_port));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_document_shape() {
        let doc = ConfigDocument::from_value(default_document(8443));
        let value = doc.as_value();

        assert_eq!(value["api"]["tag"], "api");
        assert_eq!(value["inbounds"][0]["port"], 8443);
        assert_eq!(value["inbounds"][0]["streamSettings"]["security"], "reality");
        assert_eq!(value["outbounds"][0]["tag"], "direct");
        assert_eq!(value["outbounds"][1]["protocol"], "blackhole");
        assert!(doc.clients().unwrap().is_empty());
    }

    #[test]
    fn test_merge_without_template_is_default() {
        assert_eq!(merge_defaults(None, 443), default_document(443));
        assert_eq!(merge_defaults(Some(json!([1, 2])), 443), default_document(443));
    }

    #[test]
    fn test_merge_keeps_template_fields() {
        let template = json!({
            "log": {"loglevel": "debug"},
            "inbounds": [
                {"tag": "socks-in", "protocol": "socks", "port": 1080}
            ],
            "policy": {"levels": {"0": {"handshake": 2}}}
        });

        let merged = merge_defaults(Some(template), 443);

        assert_eq!(merged["log"], json!({"loglevel": "debug"}));
        assert_eq!(merged["policy"]["levels"]["0"]["handshake"], 2);
        assert_eq!(merged["api"]["tag"], "api");

        let inbounds = merged["inbounds"].as_array().unwrap();
        assert_eq!(inbounds.len(), 2);
        assert_eq!(inbounds[0]["tag"], "socks-in");
        assert_eq!(inbounds[1]["tag"], INBOUND_TAG);
    }

    #[tokio::test]
    async fn test_load_template_fallbacks() {
        assert!(load_template(None).await.is_none());

        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.json");
        assert!(load_template(Some(&missing)).await.is_none());

        let broken = dir.path().join("broken.json");
        std::fs::write(&broken, "{").unwrap();
        assert!(load_template(Some(&broken)).await.is_none());

        let good = dir.path().join("template.json");
        std::fs::write(&good, r#"{"log": {"loglevel": "info"}}"#).unwrap();
        let loaded = load_template(Some(&good)).await.unwrap();
        assert_eq!(loaded["log"]["loglevel"], "info");
    }
}
