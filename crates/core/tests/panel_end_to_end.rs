//! Drives a `Panel` against an on-disk store and a fake engine.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use xpanel_common::{PanelConfig, PanelError, Result};
use xpanel_core::{
    ConfigDocument, CredentialStore, Dialect, EngineControl, FileStore, NewUser, Panel,
    ReloadPath, SeededRandom, SyncStatus, UserUpdate,
};

#[derive(Default)]
struct FakeEngine {
    live_supported: AtomicBool,
    down: AtomicBool,
    live_reloads: AtomicUsize,
    restarts: AtomicUsize,
}

#[async_trait]
impl EngineControl for FakeEngine {
    async fn live_reload(&self, _doc: &ConfigDocument) -> Result<()> {
        if self.down.load(Ordering::SeqCst) || !self.live_supported.load(Ordering::SeqCst) {
            return Err(PanelError::unreachable("management API refused connection"));
        }
        self.live_reloads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn restart(&self) -> Result<()> {
        if self.down.load(Ordering::SeqCst) {
            return Err(PanelError::unreachable("container not found"));
        }
        self.restarts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct Harness {
    panel: Panel,
    engine: Arc<FakeEngine>,
    store: Arc<FileStore>,
    dir: tempfile::TempDir,
}

impl Harness {
    fn new(config: impl FnOnce(PanelConfig) -> PanelConfig) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config = config(
            PanelConfig::new()
                .with_data_dir(dir.path().join("data"))
                .with_engine_config_path(dir.path().join("xray/config.json")),
        );

        let store = Arc::new(FileStore::new(&config.data_dir));
        let engine = Arc::new(FakeEngine::default());
        let panel = Panel::builder(config)
            .rng(Arc::new(SeededRandom::new(2024)))
            .engine_control(engine.clone())
            .build(store.clone());

        Self {
            panel,
            engine,
            store,
            dir,
        }
    }

    fn engine_document(&self) -> Value {
        let raw = std::fs::read_to_string(self.dir.path().join("xray/config.json")).unwrap();
        serde_json::from_str(&raw).unwrap()
    }
}

#[tokio::test]
async fn bootstrap_writes_complete_document() {
    let h = Harness::new(|c| c.with_server_address("203.0.113.10"));

    let boot = h.panel.bootstrap().await.unwrap();
    assert!(matches!(boot.status, SyncStatus::Applied(ReloadPath::Restart)));
    assert_eq!(boot.value.external_address.as_deref(), Some("203.0.113.10"));

    let doc = h.engine_document();
    assert_eq!(doc["inbounds"][0]["protocol"], "vless");
    assert_eq!(doc["inbounds"][0]["settings"]["clients"], serde_json::json!([]));
    assert_eq!(
        doc["inbounds"][0]["streamSettings"]["realitySettings"]["privateKey"],
        boot.value.keypair.private_key().to_base64()
    );
    assert_eq!(doc["outbounds"][0]["tag"], "direct");
    assert_eq!(doc["outbounds"][1]["tag"], "blocked");

    // Credentials are on disk for the next start
    let stored = h.store.load_credentials().await.unwrap().unwrap();
    assert_eq!(stored, boot.value);
}

#[tokio::test]
async fn roster_changes_reach_the_engine() {
    let h = Harness::new(|c| c);
    h.engine.live_supported.store(true, Ordering::SeqCst);
    h.panel.bootstrap().await.unwrap();

    let alice = h.panel.create_user(NewUser::new("alice")).await.unwrap().value;
    let bob = h.panel.create_user(NewUser::new("bob")).await.unwrap().value;

    let clients = h.engine_document()["inbounds"][0]["settings"]["clients"].clone();
    assert_eq!(
        clients,
        serde_json::json!([
            {"id": alice.connection_id.to_string(), "email": "alice", "flow": "xtls-rprx-vision"},
            {"id": bob.connection_id.to_string(), "email": "bob", "flow": "xtls-rprx-vision"}
        ])
    );

    h.panel
        .update_user(
            alice.id,
            UserUpdate {
                is_active: Some(false),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    h.panel.delete_user(bob.id).await.unwrap();

    let clients = h.engine_document()["inbounds"][0]["settings"]["clients"].clone();
    assert_eq!(clients, serde_json::json!([]));
    assert_eq!(h.engine.live_reloads.load(Ordering::SeqCst), 5);
    assert_eq!(h.engine.restarts.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn engine_outage_reports_partial_success() {
    let h = Harness::new(|c| c);
    h.panel.bootstrap().await.unwrap();
    h.engine.down.store(true, Ordering::SeqCst);

    let created = h.panel.create_user(NewUser::new("carol")).await.unwrap();
    assert!(!created.is_applied());
    match created.status {
        SyncStatus::Stale(PanelError::ReloadFailure { live, restart }) => {
            assert!(live.contains("refused"));
            assert!(restart.contains("container not found"));
        }
        other => panic!("expected stale status, got {:?}", other),
    }

    // Stored and written, just not applied
    assert_eq!(h.panel.list_users(None).await.unwrap().len(), 1);
    let clients = h.engine_document()["inbounds"][0]["settings"]["clients"].clone();
    assert_eq!(clients[0]["email"], "carol");

    h.engine.down.store(false, Ordering::SeqCst);
    assert!(h.panel.resync().await.is_applied());
    assert!(h.panel.last_sync().unwrap().applied);
}

#[tokio::test]
async fn rotation_replaces_links_and_document_together() {
    let h = Harness::new(|c| c.with_server_address("vpn.example.net"));
    h.panel.bootstrap().await.unwrap();
    let dave = h.panel.create_user(NewUser::new("dave")).await.unwrap().value;

    let before = h.panel.credentials().await.unwrap();
    let rotated = h.panel.rotate_now().await.unwrap();
    assert!(rotated.is_applied());
    let after = rotated.value;
    assert_ne!(before.public_key(), after.public_key());

    let doc = h.engine_document();
    let reality = &doc["inbounds"][0]["streamSettings"]["realitySettings"];
    assert_eq!(reality["privateKey"], after.keypair.private_key().to_base64());
    let short_ids: Vec<String> = serde_json::from_value(reality["shortIds"].clone()).unwrap();
    assert_eq!(short_ids.len(), after.short_ids.len());

    let links = h.panel.subscription(dave.id, None).await.unwrap();
    let v2rayng = links.get(Dialect::V2rayNg).unwrap();
    assert!(v2rayng.contains(&format!("pbk={}", after.public_key())));
    assert!(v2rayng.contains("@vpn.example.net:443?"));
    assert!(links.warnings.is_empty());
    assert_eq!(links.get(Dialect::Nekoray), Some(v2rayng));
}

#[tokio::test]
async fn credential_edits_survive_restart_of_the_panel() {
    let h = Harness::new(|c| c);
    h.panel.bootstrap().await.unwrap();
    h.panel.set_destination("www.apple.com:443").await.unwrap();
    h.panel
        .set_server_names(vec!["www.apple.com".into(), "images.apple.com".into()])
        .await
        .unwrap();

    let reopened = FileStore::new(h.dir.path().join("data"));
    let stored = reopened.load_credentials().await.unwrap().unwrap();
    assert_eq!(stored.dest, "www.apple.com:443");
    assert_eq!(stored.server_names, ["www.apple.com", "images.apple.com"]);

    let doc = h.engine_document();
    assert_eq!(
        doc["inbounds"][0]["streamSettings"]["realitySettings"]["dest"],
        "www.apple.com:443"
    );
}
