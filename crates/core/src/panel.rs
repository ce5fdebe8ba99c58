//! xpanel control plane
//!
//! The `Panel` ties the stores, the rotator, the synthesizer, the reload
//! controller and the link encoder together. Every operation that changes
//! what the engine must run takes the sync lock, mutates, then rebuilds,
//! persists and applies the engine document before returning.

use crate::credentials::CredentialSet;
use crate::engine::{
    CommandControl, ConfigDocument, ConfigSynthesizer, EngineControl, ReloadController, ReloadPath,
};
use crate::links::{Dialect, EncodedLink, LinkEncoder, SubscriptionLinks};
use crate::presence::{NoPresence, PresenceSource};
use crate::retention::{sweep_engine_logs, SweepReport};
use crate::rng::{OsRandom, RandomSource};
use crate::rotation::{CredentialRotator, RotationOutcome, RotationSettings};
use crate::store::{CredentialStore, PanelStore, UserStore};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use xpanel_common::{
    normalize_name, ConnectionId, DataQuota, PanelConfig, PanelError, Result, RoutingToggles,
    Timestamp, User, UserId,
};

/// Whether a mutation reached the running engine
#[derive(Debug)]
pub enum SyncStatus {
    /// Document persisted and applied through the given path
    Applied(ReloadPath),
    /// The mutation is stored but the engine runs an older document
    Stale(PanelError),
}

impl SyncStatus {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied(_))
    }

    pub fn error(&self) -> Option<&PanelError> {
        match self {
            Self::Applied(_) => None,
            Self::Stale(e) => Some(e),
        }
    }
}

/// Result of a mutation together with its propagation status
#[derive(Debug)]
pub struct Synced<T> {
    pub value: T,
    pub status: SyncStatus,
}

impl<T> Synced<T> {
    pub fn is_applied(&self) -> bool {
        self.status.is_applied()
    }

    pub fn into_value(self) -> T {
        self.value
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Synced<U> {
        Synced {
            value: f(self.value),
            status: self.status,
        }
    }
}

/// Last sync attempt, kept for status reporting
#[derive(Debug, Clone, Serialize)]
pub struct SyncRecord {
    pub at: Timestamp,
    pub applied: bool,
    pub detail: String,
}

/// Outcome of a scheduled rotation check
#[derive(Debug)]
pub enum TickOutcome {
    /// Another sync held the lock; nothing was done
    Skipped,
    Unchanged,
    Rotated(SyncStatus),
}

/// Input for `create_user`
#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub data_limit: DataQuota,
    pub expires_at: Option<Timestamp>,
    pub is_active: bool,
}

impl NewUser {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_limit: DataQuota::UNLIMITED,
            expires_at: None,
            is_active: true,
        }
    }
}

/// Partial update for `update_user`; `None` leaves a field alone
#[derive(Debug, Clone, Default)]
pub struct UserUpdate {
    pub name: Option<String>,
    pub data_limit: Option<DataQuota>,
    /// `Some(None)` clears the expiry
    pub expires_at: Option<Option<Timestamp>>,
    pub is_active: Option<bool>,
}

/// Roster totals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UserStats {
    pub total_users: usize,
    pub active_users: usize,
    pub online_users: usize,
    pub total_data_used: u64,
    pub total_data_limit: u64,
}

/// Builder for [`Panel`]
pub struct PanelBuilder {
    config: PanelConfig,
    rng: Arc<dyn RandomSource>,
    control: Option<Arc<dyn EngineControl>>,
    presence: Arc<dyn PresenceSource>,
}

impl PanelBuilder {
    pub fn rng(mut self, rng: Arc<dyn RandomSource>) -> Self {
        self.rng = rng;
        self
    }

    pub fn engine_control(mut self, control: Arc<dyn EngineControl>) -> Self {
        self.control = Some(control);
        self
    }

    pub fn presence(mut self, presence: Arc<dyn PresenceSource>) -> Self {
        self.presence = presence;
        self
    }

    pub fn build<S>(self, store: Arc<S>) -> Panel
    where
        S: PanelStore + 'static,
    {
        let config = self.config;
        let credential_store: Arc<dyn CredentialStore> = store.clone();
        let users: Arc<dyn UserStore> = store;

        let rotator = CredentialRotator::new(
            credential_store,
            self.rng.clone(),
            RotationSettings::from_config(&config.reality),
        );
        let control: Arc<dyn EngineControl> = match self.control {
            Some(control) => control,
            None => Arc::new(CommandControl::from_config(&config.engine)),
        };
        let encoder = LinkEncoder::new(self.rng.clone(), config.engine.listen_port)
            .with_default_address(config.reality.server_address.clone())
            .with_label_prefix(config.reality.link_label_prefix.clone());

        Panel {
            users,
            rotator,
            synthesizer: ConfigSynthesizer::from_config(&config.engine),
            reload: ReloadController::new(control, config.command_timeout()),
            encoder,
            presence: self.presence,
            rng: self.rng,
            routing: config.routing,
            config,
            sync_lock: Mutex::new(()),
            last_sync: RwLock::new(None),
        }
    }
}

/// Control plane for one engine deployment
pub struct Panel {
    users: Arc<dyn UserStore>,
    rotator: CredentialRotator,
    synthesizer: ConfigSynthesizer,
    reload: ReloadController,
    encoder: LinkEncoder,
    presence: Arc<dyn PresenceSource>,
    rng: Arc<dyn RandomSource>,
    routing: RoutingToggles,
    config: PanelConfig,

    /// Serializes rotation, roster mutation and synthesis
    sync_lock: Mutex<()>,
    last_sync: RwLock<Option<SyncRecord>>,
}

impl Panel {
    pub fn builder(config: PanelConfig) -> PanelBuilder {
        PanelBuilder {
            config,
            rng: Arc::new(OsRandom),
            control: None,
            presence: Arc::new(NoPresence),
        }
    }

    pub fn config(&self) -> &PanelConfig {
        &self.config
    }

    /// Ensure credentials exist and bring the engine document up to date
    pub async fn bootstrap(&self) -> Result<Synced<CredentialSet>> {
        let _guard = self.sync_lock.lock().await;
        info!("Bootstrapping panel state...");

        let mut credentials = self.rotator.current().await?;
        if credentials.external_address.is_none() {
            if let Some(address) = self.config.reality.server_address.clone() {
                info!("Seeding server address {} from configuration", address);
                credentials = self.rotator.set_external_address(Some(address)).await?;
            }
        }

        let status = self.sync_locked().await;
        Ok(Synced {
            value: credentials,
            status,
        })
    }

    // ---- roster ----

    pub async fn create_user(&self, new: NewUser) -> Result<Synced<User>> {
        let name = normalize_name(&new.name)?;

        let _guard = self.sync_lock.lock().await;
        let user = User::new(
            UserId::from_random_bytes(self.random_16()),
            name,
            ConnectionId::from_random_bytes(self.random_16()),
        )
        .with_limit(new.data_limit)
        .with_expiry(new.expires_at)
        .with_active(new.is_active);

        self.users.insert_user(user.clone()).await?;
        info!("Created user '{}' ({})", user.name, user.id);

        let status = self.sync_locked().await;
        Ok(Synced {
            value: user,
            status,
        })
    }

    pub async fn update_user(&self, id: UserId, update: UserUpdate) -> Result<Synced<User>> {
        let name = update.name.as_deref().map(normalize_name).transpose()?;

        let _guard = self.sync_lock.lock().await;
        let mut user = self.require_user(id).await?;

        if let Some(name) = name {
            user.name = name;
        }
        if let Some(limit) = update.data_limit {
            user.data_limit = limit;
        }
        if let Some(expires_at) = update.expires_at {
            user.expires_at = expires_at;
        }
        if let Some(active) = update.is_active {
            user.is_active = active;
        }
        user.updated_at = Timestamp::now();

        self.users.update_user(user.clone()).await?;
        info!("Updated user '{}' ({})", user.name, user.id);

        let status = self.sync_locked().await;
        Ok(Synced {
            value: user,
            status,
        })
    }

    pub async fn delete_user(&self, id: UserId) -> Result<Synced<()>> {
        let _guard = self.sync_lock.lock().await;
        if !self.users.remove_user(id).await? {
            return Err(PanelError::not_found(format!("user {}", id)));
        }
        info!("Deleted user {}", id);

        let status = self.sync_locked().await;
        Ok(Synced { value: (), status })
    }

    /// Zero a user's consumed bytes. Usage is not part of the engine
    /// document, so no resync happens.
    pub async fn reset_user_usage(&self, id: UserId) -> Result<User> {
        let _guard = self.sync_lock.lock().await;
        let mut user = self.require_user(id).await?;
        user.data_used = 0;
        user.updated_at = Timestamp::now();
        self.users.update_user(user.clone()).await?;
        info!("Reset data usage for '{}'", user.name);
        Ok(user)
    }

    /// Users in creation order, optionally filtered by the active flag
    pub async fn list_users(&self, active: Option<bool>) -> Result<Vec<User>> {
        let users = self.users.list_users().await?;
        Ok(match active {
            Some(flag) => users.into_iter().filter(|u| u.is_active == flag).collect(),
            None => users,
        })
    }

    pub async fn get_user(&self, id: UserId) -> Result<User> {
        self.require_user(id).await
    }

    pub async fn find_user(&self, name: &str) -> Result<User> {
        self.users
            .find_user_by_name(name.trim())
            .await?
            .ok_or_else(|| PanelError::not_found(format!("user '{}'", name)))
    }

    pub async fn user_stats(&self) -> Result<UserStats> {
        let users = self.users.list_users().await?;
        let online: HashSet<ConnectionId> = self
            .presence
            .online_connection_ids()
            .await?
            .into_iter()
            .collect();

        Ok(UserStats {
            total_users: users.len(),
            active_users: users.iter().filter(|u| u.is_active).count(),
            online_users: users
                .iter()
                .filter(|u| online.contains(&u.connection_id))
                .count(),
            total_data_used: users
                .iter()
                .fold(0u64, |acc, u| acc.saturating_add(u.data_used)),
            total_data_limit: users
                .iter()
                .fold(0u64, |acc, u| acc.saturating_add(u.data_limit.bytes())),
        })
    }

    // ---- credentials ----

    /// Live credential set, generated on first use
    pub async fn credentials(&self) -> Result<CredentialSet> {
        self.live_credentials().await
    }

    /// Rotate now regardless of the interval
    pub async fn rotate_now(&self) -> Result<Synced<CredentialSet>> {
        let _guard = self.sync_lock.lock().await;
        let credentials = self.rotator.force_rotate().await?;
        let status = self.sync_locked().await;
        Ok(Synced {
            value: credentials,
            status,
        })
    }

    /// Scheduled rotation check. Skips instead of waiting when another
    /// sync is in flight.
    pub async fn rotation_tick(&self) -> Result<TickOutcome> {
        let Ok(_guard) = self.sync_lock.try_lock() else {
            debug!("Sync in progress, skipping rotation check");
            return Ok(TickOutcome::Skipped);
        };

        match self.rotator.rotate_if_due().await? {
            RotationOutcome::Unchanged(_) => Ok(TickOutcome::Unchanged),
            RotationOutcome::Rotated(_) => Ok(TickOutcome::Rotated(self.sync_locked().await)),
        }
    }

    pub async fn set_destination(&self, dest: &str) -> Result<Synced<CredentialSet>> {
        let _guard = self.sync_lock.lock().await;
        let credentials = self.rotator.set_destination(dest).await?;
        info!("Masquerade destination set to {}", credentials.dest);
        let status = self.sync_locked().await;
        Ok(Synced {
            value: credentials,
            status,
        })
    }

    pub async fn set_server_names(&self, names: Vec<String>) -> Result<Synced<CredentialSet>> {
        let _guard = self.sync_lock.lock().await;
        let credentials = self.rotator.set_server_names(names).await?;
        info!("Server names set to {:?}", credentials.server_names);
        let status = self.sync_locked().await;
        Ok(Synced {
            value: credentials,
            status,
        })
    }

    /// Set the public address used in links. Links only; the engine
    /// document does not change.
    pub async fn set_external_address(&self, address: Option<String>) -> Result<CredentialSet> {
        let _guard = self.sync_lock.lock().await;
        let credentials = self.rotator.set_external_address(address).await?;
        info!(
            "Server address set to {}",
            credentials.external_address.as_deref().unwrap_or("<none>")
        );
        Ok(credentials)
    }

    // ---- engine document ----

    /// Rebuild and apply unconditionally
    pub async fn resync(&self) -> SyncStatus {
        let _guard = self.sync_lock.lock().await;
        self.sync_locked().await
    }

    /// Document the engine should be running, without persisting it
    pub async fn render(&self) -> Result<ConfigDocument> {
        let credentials = self.live_credentials().await?;
        let users = self.users.list_users().await?;
        Ok(self
            .synthesizer
            .synthesize(&users, &credentials, self.routing)
            .await)
    }

    pub fn last_sync(&self) -> Option<SyncRecord> {
        self.last_sync.read().clone()
    }

    // ---- links ----

    pub async fn subscription(&self, id: UserId, address: Option<&str>) -> Result<SubscriptionLinks> {
        let user = self.require_user(id).await?;
        let credentials = self.live_credentials().await?;
        Ok(self.encoder.encode_all(&user, &credentials, address))
    }

    pub async fn link(&self, id: UserId, address: Option<&str>, dialect: Dialect) -> Result<EncodedLink> {
        let user = self.require_user(id).await?;
        let credentials = self.live_credentials().await?;
        Ok(self.encoder.encode(&user, &credentials, address, dialect))
    }

    // ---- housekeeping ----

    pub async fn sweep_logs(&self) -> Result<SweepReport> {
        sweep_engine_logs(
            &self.config.logging.engine_log_dir,
            self.config.log_retention(),
            std::time::SystemTime::now(),
        )
        .await
    }

    // ---- internals ----

    async fn require_user(&self, id: UserId) -> Result<User> {
        self.users
            .get_user(id)
            .await?
            .ok_or_else(|| PanelError::not_found(format!("user {}", id)))
    }

    /// Stored credentials. When none exist yet, generate them under the
    /// sync lock and bring the engine document in line before returning.
    async fn live_credentials(&self) -> Result<CredentialSet> {
        if let Some(set) = self.rotator.peek().await? {
            return Ok(set);
        }

        let _guard = self.sync_lock.lock().await;
        if let Some(set) = self.rotator.peek().await? {
            return Ok(set);
        }
        let credentials = self.rotator.current().await?;
        if let SyncStatus::Stale(e) = self.sync_locked().await {
            warn!("First credential set stored but engine is stale: {}", e);
        }
        Ok(credentials)
    }

    fn random_16(&self) -> [u8; 16] {
        let mut bytes = [0u8; 16];
        self.rng.fill_bytes(&mut bytes);
        bytes
    }

    /// Synthesize, persist and apply. Caller must hold `sync_lock`.
    async fn sync_locked(&self) -> SyncStatus {
        let status = match self.try_sync().await {
            Ok(path) => SyncStatus::Applied(path),
            Err(e) => {
                error!("Engine config is stale: {}", e);
                SyncStatus::Stale(e)
            }
        };

        let record = SyncRecord {
            at: Timestamp::now(),
            applied: status.is_applied(),
            detail: match &status {
                SyncStatus::Applied(path) => format!("applied via {}", path),
                SyncStatus::Stale(e) => e.to_string(),
            },
        };
        *self.last_sync.write() = Some(record);

        status
    }

    async fn try_sync(&self) -> Result<ReloadPath> {
        let users = self.users.list_users().await?;
        let credentials = self.rotator.current().await?;
        let doc = self
            .synthesizer
            .synthesize(&users, &credentials, self.routing)
            .await;

        if !self.synthesizer.persist(&doc).await {
            return Err(PanelError::persistence(format!(
                "could not write engine config to {:?}",
                self.synthesizer.output_path()
            )));
        }

        let active = users.iter().filter(|u| u.is_active).count();
        debug!("Engine config rebuilt with {} active clients", active);

        self.reload.apply(&doc).await.map_err(|e| {
            warn!("Engine did not pick up the new config");
            e
        })
    }
}

impl std::fmt::Debug for Panel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Panel")
            .field("rotator", &self.rotator)
            .field("synthesizer", &self.synthesizer)
            .field("routing", &self.routing)
            .finish_non_exhaustive()
    }
}
