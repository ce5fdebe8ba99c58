use std::path::{Path, PathBuf};

use serde_json::{json, Value};
use tracing::{error, info};
use xpanel_common::{config::engine::CLIENT_FLOW, EngineConfig, RoutingToggles, User};

use super::document::{is_client_inbound, load_template, merge_defaults, ClientEntry, ConfigDocument, RealitySettings};
use crate::credentials::CredentialSet;
use crate::routing::RoutingPolicy;
use crate::store::write_atomic;

/// Derives the engine document from roster, credentials and routing toggles
#[derive(Debug, Clone)]
pub struct ConfigSynthesizer {
    template_path: Option<PathBuf>,
    output_path: PathBuf,
    listen_port: u16,
}

impl ConfigSynthesizer {
    pub fn new(output_path: impl Into<PathBuf>) -> Self {
        Self {
            template_path: None,
            output_path: output_path.into(),
            listen_port: xpanel_common::config::engine::DEFAULT_LISTEN_PORT,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            template_path: config.template_path.clone(),
            output_path: config.config_path.clone(),
            listen_port: config.listen_port,
        }
    }

    pub fn with_template(mut self, path: impl Into<PathBuf>) -> Self {
        self.template_path = Some(path.into());
        self
    }

    pub fn with_listen_port(mut self, port: u16) -> Self {
        self.listen_port = port;
        self
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    pub fn listen_port(&self) -> u16 {
        self.listen_port
    }

    /// Build a fresh document from the template (or the built-in default)
    pub async fn synthesize(
        &self,
        users: &[User],
        credentials: &CredentialSet,
        routing: RoutingToggles,
    ) -> ConfigDocument {
        let template = load_template(self.template_path.as_deref()).await;
        let base = merge_defaults(template, self.listen_port);
        Self::synthesize_from(base, users, credentials, routing)
    }

    /// Fill `base` with the client list, the transport block and the routing
    /// section. Deterministic in its inputs.
    pub fn synthesize_from(
        base: Value,
        users: &[User],
        credentials: &CredentialSet,
        routing: RoutingToggles,
    ) -> ConfigDocument {
        let clients: Vec<ClientEntry> = users
            .iter()
            .filter(|u| u.is_active)
            .map(|u| ClientEntry {
                id: u.connection_id,
                email: u.name.clone(),
                flow: CLIENT_FLOW.to_string(),
            })
            .collect();
        let reality = reality_block(credentials);

        let mut doc = ConfigDocument::from_value(base);
        let value = doc.as_value_mut();

        if let Some(inbounds) = value.get_mut("inbounds").and_then(Value::as_array_mut) {
            for inbound in inbounds.iter_mut().filter(|i| is_client_inbound(i)) {
                apply_clients(inbound, &clients);
                apply_reality(inbound, &reality);
            }
        }

        if let Some(map) = value.as_object_mut() {
            map.insert("routing".to_string(), json!(RoutingPolicy::config(routing)));
        }

        doc
    }

    /// Write the document to the engine's config path.
    ///
    /// Returns `false` on failure; the engine is then running a stale
    /// document and the caller must surface that.
    pub async fn persist(&self, doc: &ConfigDocument) -> bool {
        let json = match doc.to_pretty_json() {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize engine config: {}", e);
                return false;
            }
        };

        match write_atomic(&self.output_path, json.as_bytes()).await {
            Ok(()) => {
                info!("Engine config saved to {:?}", self.output_path);
                true
            }
            Err(e) => {
                error!("Failed to save engine config to {:?}: {}", self.output_path, e);
                false
            }
        }
    }
}

fn reality_block(credentials: &CredentialSet) -> RealitySettings {
    RealitySettings {
        dest: credentials.dest.clone(),
        server_names: credentials.server_names.clone(),
        private_key: credentials.keypair.private_key().to_base64(),
        short_ids: credentials
            .short_ids
            .iter()
            .map(|s| s.as_str().to_string())
            .collect(),
        show: false,
    }
}

fn apply_clients(inbound: &mut Value, clients: &[ClientEntry]) {
    let Some(inbound) = inbound.as_object_mut() else {
        return;
    };

    let settings = inbound
        .entry("settings")
        .or_insert_with(|| json!({"decryption": "none"}));
    if let Some(settings) = settings.as_object_mut() {
        settings.insert("clients".to_string(), json!(clients));
    }
}

/// Replace the transport block of inbounds that use the disguised-TLS transport
fn apply_reality(inbound: &mut Value, reality: &RealitySettings) {
    let Some(stream) = inbound
        .get_mut("streamSettings")
        .and_then(Value::as_object_mut)
    else {
        return;
    };

    let uses_reality = stream.contains_key("realitySettings")
        || stream.get("security").and_then(Value::as_str) == Some("reality");
    if uses_reality {
        stream.insert("realitySettings".to_string(), json!(reality));
    }
}
