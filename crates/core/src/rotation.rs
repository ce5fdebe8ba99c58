//! Credential rotation.
//!
//! The rotator owns the lifecycle of the single live [`CredentialSet`]:
//! lazy creation on first use, interval-driven replacement, forced
//! replacement, and the targeted setters that edit the set without
//! touching the keypair.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use xpanel_common::{PanelError, RealityConfig, Result, Timestamp};

use crate::credentials::CredentialSet;
use crate::rng::RandomSource;
use crate::store::CredentialStore;

/// Externally configured rotation parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationSettings {
    pub interval: Duration,

    /// Destination used when the stored set has none
    pub dest: String,

    /// Server names used when the stored set has none
    pub server_names: Vec<String>,

    /// Server address seeded into a brand-new set
    pub external_address: Option<String>,
}

impl RotationSettings {
    pub fn from_config(config: &RealityConfig) -> Self {
        Self {
            interval: Duration::from_secs(config.rotation_hours.saturating_mul(3600)),
            dest: config.dest.clone(),
            server_names: config.server_names.clone(),
            external_address: config.server_address.clone(),
        }
    }
}

/// Result of a rotation check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RotationOutcome {
    /// A new set was generated and persisted
    Rotated(CredentialSet),
    /// The interval had not elapsed; the stored set is returned as-is
    Unchanged(CredentialSet),
}

impl RotationOutcome {
    pub fn was_rotated(&self) -> bool {
        matches!(self, Self::Rotated(_))
    }

    pub fn credentials(&self) -> &CredentialSet {
        match self {
            Self::Rotated(set) | Self::Unchanged(set) => set,
        }
    }

    pub fn into_credentials(self) -> CredentialSet {
        match self {
            Self::Rotated(set) | Self::Unchanged(set) => set,
        }
    }
}

pub struct CredentialRotator {
    store: Arc<dyn CredentialStore>,
    rng: Arc<dyn RandomSource>,
    settings: RotationSettings,
    write_lock: Mutex<()>,
}

impl CredentialRotator {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        rng: Arc<dyn RandomSource>,
        settings: RotationSettings,
    ) -> Self {
        Self {
            store,
            rng,
            settings,
            write_lock: Mutex::new(()),
        }
    }

    pub fn settings(&self) -> &RotationSettings {
        &self.settings
    }

    /// Stored set without side effects
    pub async fn peek(&self) -> Result<Option<CredentialSet>> {
        self.store.load_credentials().await
    }

    /// The live set, generating one first if none exists yet
    pub async fn current(&self) -> Result<CredentialSet> {
        if let Some(set) = self.store.load_credentials().await? {
            return Ok(set);
        }

        let _guard = self.write_lock.lock().await;
        // Another caller may have created it while we waited
        if let Some(set) = self.store.load_credentials().await? {
            return Ok(set);
        }

        let reason = PanelError::incomplete("no credential set generated yet");
        warn!("{}, generating one", reason);
        self.replace(None, Timestamp::now()).await
    }

    pub async fn rotate_if_due(&self) -> Result<RotationOutcome> {
        self.rotate_if_due_at(Timestamp::now()).await
    }

    /// Rotate when `interval` has elapsed since the last rotation as seen at `now`
    pub async fn rotate_if_due_at(&self, now: Timestamp) -> Result<RotationOutcome> {
        let _guard = self.write_lock.lock().await;

        let existing = self.store.load_credentials().await?;
        match existing {
            Some(set) if !set.is_rotation_due(now, self.settings.interval) => {
                debug!(
                    "Rotation not due ({}h since last rotation)",
                    now.since(set.last_rotated).as_secs() / 3600
                );
                Ok(RotationOutcome::Unchanged(set))
            }
            Some(set) => {
                info!(
                    "Rotation due ({}h since last rotation)",
                    now.since(set.last_rotated).as_secs() / 3600
                );
                self.replace(Some(&set), now).await.map(RotationOutcome::Rotated)
            }
            None => self.replace(None, now).await.map(RotationOutcome::Rotated),
        }
    }

    pub async fn force_rotate(&self) -> Result<CredentialSet> {
        self.force_rotate_at(Timestamp::now()).await
    }

    /// Rotate regardless of the interval
    pub async fn force_rotate_at(&self, now: Timestamp) -> Result<CredentialSet> {
        let _guard = self.write_lock.lock().await;
        let existing = self.store.load_credentials().await?;
        self.replace(existing.as_ref(), now).await
    }

    /// Change the masquerade destination (`host:port`)
    pub async fn set_destination(&self, dest: &str) -> Result<CredentialSet> {
        let dest = validate_destination(dest)?;
        self.edit(|set| set.dest = dest).await
    }

    /// Replace the masquerade server names. Blank entries are dropped.
    pub async fn set_server_names(&self, names: Vec<String>) -> Result<CredentialSet> {
        let names: Vec<String> = names
            .into_iter()
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .collect();
        if names.is_empty() {
            return Err(PanelError::invalid("at least one server name is required"));
        }
        self.edit(|set| set.server_names = names).await
    }

    /// Set or clear the public server address used for links
    pub async fn set_external_address(&self, address: Option<String>) -> Result<CredentialSet> {
        let address = address
            .map(|a| a.trim().to_string())
            .filter(|a| !a.is_empty());
        self.edit(|set| set.external_address = address).await
    }

    /// Apply `change` to the live set and persist it without a new keypair
    async fn edit(&self, change: impl FnOnce(&mut CredentialSet)) -> Result<CredentialSet> {
        let _guard = self.write_lock.lock().await;
        let now = Timestamp::now();

        let mut set = match self.store.load_credentials().await? {
            Some(set) => set,
            None => self.replace(None, now).await?,
        };
        change(&mut set);
        set.updated_at = now;

        self.store.save_credentials(&set).await?;
        Ok(set)
    }

    /// Generate and persist the successor of `previous`.
    ///
    /// Stored destination, server names and address carry over; configured
    /// values fill in whatever the previous set lacks.
    async fn replace(&self, previous: Option<&CredentialSet>, now: Timestamp) -> Result<CredentialSet> {
        let dest = previous
            .map(|p| p.dest.clone())
            .filter(|d| !d.is_empty())
            .unwrap_or_else(|| self.settings.dest.clone());
        let server_names = previous
            .map(|p| p.server_names.clone())
            .filter(|names| !names.is_empty())
            .unwrap_or_else(|| self.settings.server_names.clone());
        let external_address = match previous {
            Some(p) => p.external_address.clone(),
            None => self.settings.external_address.clone(),
        };

        let next = CredentialSet::generate(self.rng.as_ref(), dest, server_names, now)
            .with_external_address(external_address);

        if let Err(e) = self.store.save_credentials(&next).await {
            warn!("Rotation abandoned, keeping previous credentials: {}", e);
            return Err(match e {
                PanelError::PersistenceFailure(_) => e,
                other => PanelError::persistence(other.to_string()),
            });
        }

        info!(
            "Rotated transport credentials: public key {}, {} short ids",
            next.public_key(),
            next.short_ids.len()
        );
        Ok(next)
    }
}

impl std::fmt::Debug for CredentialRotator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialRotator")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

/// Check a `host:port` destination and return it trimmed
pub fn validate_destination(dest: &str) -> Result<String> {
    let dest = dest.trim();
    let (host, port) = dest
        .rsplit_once(':')
        .ok_or_else(|| PanelError::invalid(format!("destination must be host:port, got '{}'", dest)))?;

    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        return Err(PanelError::invalid("destination host is empty"));
    }
    match port.parse::<u16>() {
        Ok(p) if p > 0 => Ok(dest.to_string()),
        _ => Err(PanelError::invalid(format!("invalid destination port '{}'", port))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::SeededRandom;
    use crate::store::MemoryStore;
    use async_trait::async_trait;

    const HOUR: u64 = 3600;

    fn settings() -> RotationSettings {
        RotationSettings {
            interval: Duration::from_secs(24 * HOUR),
            dest: "www.microsoft.com:443".into(),
            server_names: vec!["www.microsoft.com".into(), "www.github.com".into()],
            external_address: None,
        }
    }

    fn rotator(store: Arc<MemoryStore>) -> CredentialRotator {
        CredentialRotator::new(store, Arc::new(SeededRandom::new(21)), settings())
    }

    async fn seeded(last_rotated: Timestamp) -> (Arc<MemoryStore>, CredentialSet) {
        let set = CredentialSet::generate(
            &SeededRandom::new(1),
            "www.microsoft.com:443",
            vec!["www.microsoft.com".into()],
            last_rotated,
        );
        let store = Arc::new(MemoryStore::new().with_credentials(set.clone()));
        (store, set)
    }

    /// Store whose credential writes always fail
    struct FailingStore {
        inner: MemoryStore,
    }

    #[async_trait]
    impl CredentialStore for FailingStore {
        async fn load_credentials(&self) -> Result<Option<CredentialSet>> {
            self.inner.load_credentials().await
        }

        async fn save_credentials(&self, _set: &CredentialSet) -> Result<()> {
            Err(PanelError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "read-only",
            )))
        }
    }

    #[tokio::test]
    async fn test_rotates_after_interval() {
        let now = Timestamp::from_secs(1000 * HOUR);
        let (store, old) = seeded(now.saturating_sub(Duration::from_secs(25 * HOUR))).await;

        let outcome = rotator(store.clone()).rotate_if_due_at(now).await.unwrap();
        assert!(outcome.was_rotated());

        let new = outcome.into_credentials();
        assert_ne!(new.public_key(), old.public_key());
        assert_eq!(new.last_rotated, now);
        assert_eq!(store.load_credentials().await.unwrap(), Some(new));
    }

    #[tokio::test]
    async fn test_within_interval_is_noop() {
        let now = Timestamp::from_secs(1000 * HOUR);
        let (store, old) = seeded(now.saturating_sub(Duration::from_secs(HOUR))).await;
        let rotator = rotator(store.clone());

        let first = rotator.rotate_if_due_at(now).await.unwrap();
        let second = rotator.rotate_if_due_at(now).await.unwrap();
        assert_eq!(first, RotationOutcome::Unchanged(old.clone()));

        let a = serde_json::to_vec(first.credentials()).unwrap();
        let b = serde_json::to_vec(second.credentials()).unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_rotation_keeps_overrides() {
        let now = Timestamp::from_secs(1000 * HOUR);
        let (store, _) = seeded(now).await;
        let rotator = rotator(store);

        rotator.set_destination("www.apple.com:443").await.unwrap();
        rotator
            .set_external_address(Some("203.0.113.7".into()))
            .await
            .unwrap();

        let rotated = rotator.force_rotate().await.unwrap();
        assert_eq!(rotated.dest, "www.apple.com:443");
        assert_eq!(rotated.external_address.as_deref(), Some("203.0.113.7"));
    }

    #[tokio::test]
    async fn test_current_generates_lazily() {
        let store = Arc::new(MemoryStore::new());
        let rotator = rotator(store.clone());

        let set = rotator.current().await.unwrap();
        assert_eq!(set.dest, "www.microsoft.com:443");
        assert_eq!(set.server_names.len(), 2);
        assert_eq!(rotator.current().await.unwrap(), set);
    }

    #[tokio::test]
    async fn test_setters_keep_keypair() {
        let (store, old) = seeded(Timestamp::from_secs(5)).await;
        let rotator = rotator(store);

        let updated = rotator
            .set_server_names(vec![" a.example ".into(), "".into(), "b.example".into()])
            .await
            .unwrap();
        assert_eq!(updated.keypair, old.keypair);
        assert_eq!(updated.short_ids, old.short_ids);
        assert_eq!(updated.last_rotated, old.last_rotated);
        assert_eq!(updated.server_names, ["a.example", "b.example"]);
        assert!(updated.updated_at >= old.updated_at);
    }

    #[tokio::test]
    async fn test_setters_validate() {
        let (store, _) = seeded(Timestamp::from_secs(5)).await;
        let rotator = rotator(store);

        assert!(rotator.set_destination("no-port").await.is_err());
        assert!(rotator.set_destination("host:99999").await.is_err());
        assert!(rotator.set_destination(":443").await.is_err());
        assert!(rotator.set_server_names(vec!["  ".into()]).await.is_err());

        let cleared = rotator.set_external_address(Some("  ".into())).await.unwrap();
        assert!(cleared.external_address.is_none());
    }

    #[tokio::test]
    async fn test_failed_persist_keeps_old_set() {
        let now = Timestamp::from_secs(1000 * HOUR);
        let (_, old) = seeded(now.saturating_sub(Duration::from_secs(48 * HOUR))).await;
        let store = Arc::new(FailingStore {
            inner: MemoryStore::new().with_credentials(old.clone()),
        });
        let rotator = CredentialRotator::new(
            store.clone(),
            Arc::new(SeededRandom::new(4)),
            settings(),
        );

        let err = rotator.rotate_if_due_at(now).await.unwrap_err();
        assert!(matches!(err, PanelError::PersistenceFailure(_)));
        assert_eq!(store.load_credentials().await.unwrap(), Some(old));
    }

    #[test]
    fn test_validate_destination_accepts_ipv6() {
        assert_eq!(
            validate_destination(" [2001:db8::1]:8443 ").unwrap(),
            "[2001:db8::1]:8443"
        );
    }
}
