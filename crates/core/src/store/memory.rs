//! In-memory store.

use async_trait::async_trait;
use parking_lot::RwLock;
use xpanel_common::{Result, User, UserId};

use super::traits::{check_insert, check_update, CredentialStore, UserStore};
use crate::credentials::CredentialSet;

/// Store that keeps everything in process memory.
///
/// Used for tests and ephemeral runs. Writes swap whole records under a
/// lock, so readers always see either the old or the new value.
#[derive(Debug, Default)]
pub struct MemoryStore {
    users: RwLock<Vec<User>>,
    credentials: RwLock<Option<CredentialSet>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with users
    pub fn with_users(users: impl IntoIterator<Item = User>) -> Self {
        Self {
            users: RwLock::new(users.into_iter().collect()),
            credentials: RwLock::new(None),
        }
    }

    pub fn with_credentials(self, set: CredentialSet) -> Self {
        *self.credentials.write() = Some(set);
        self
    }

    pub fn user_count(&self) -> usize {
        self.users.read().len()
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn load_credentials(&self) -> Result<Option<CredentialSet>> {
        Ok(self.credentials.read().clone())
    }

    async fn save_credentials(&self, set: &CredentialSet) -> Result<()> {
        *self.credentials.write() = Some(set.clone());
        Ok(())
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn list_users(&self) -> Result<Vec<User>> {
        Ok(self.users.read().clone())
    }

    async fn get_user(&self, id: UserId) -> Result<Option<User>> {
        Ok(self.users.read().iter().find(|u| u.id == id).cloned())
    }

    async fn find_user_by_name(&self, name: &str) -> Result<Option<User>> {
        Ok(self.users.read().iter().find(|u| u.name == name).cloned())
    }

    async fn insert_user(&self, user: User) -> Result<()> {
        let mut users = self.users.write();
        check_insert(&users, &user)?;
        users.push(user);
        Ok(())
    }

    async fn update_user(&self, user: User) -> Result<()> {
        let mut users = self.users.write();
        let index = check_update(&users, &user)?;
        users[index] = user;
        Ok(())
    }

    async fn remove_user(&self, id: UserId) -> Result<bool> {
        let mut users = self.users.write();
        let before = users.len();
        users.retain(|u| u.id != id);
        Ok(users.len() != before)
    }
}

impl From<Vec<User>> for MemoryStore {
    fn from(users: Vec<User>) -> Self {
        Self::with_users(users)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::SeededRandom;
    use xpanel_common::{ConnectionId, PanelError, Timestamp};

    fn user(seed: u8, name: &str) -> User {
        User::new(
            UserId::from_random_bytes([seed; 16]),
            name,
            ConnectionId::from_random_bytes([seed.wrapping_add(100); 16]),
        )
    }

    #[tokio::test]
    async fn test_insert_and_list_keeps_order() {
        let store = MemoryStore::new();
        store.insert_user(user(1, "alice")).await.unwrap();
        store.insert_user(user(2, "bob")).await.unwrap();
        store.insert_user(user(3, "carol")).await.unwrap();

        let names: Vec<_> = store
            .list_users()
            .await
            .unwrap()
            .into_iter()
            .map(|u| u.name)
            .collect();
        assert_eq!(names, ["alice", "bob", "carol"]);
    }

    #[tokio::test]
    async fn test_duplicate_name_conflicts() {
        let store = MemoryStore::new();
        store.insert_user(user(1, "alice")).await.unwrap();

        let err = store.insert_user(user(2, "alice")).await.unwrap_err();
        assert!(matches!(err, PanelError::Conflict(_)));
        assert_eq!(store.user_count(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_connection_id_conflicts() {
        let store = MemoryStore::new();
        let first = user(1, "alice");
        let mut second = user(2, "bob");
        second.connection_id = first.connection_id;

        store.insert_user(first).await.unwrap();
        let err = store.insert_user(second).await.unwrap_err();
        assert!(matches!(err, PanelError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_update_cannot_change_connection_id() {
        let store = MemoryStore::new();
        let original = user(1, "alice");
        store.insert_user(original.clone()).await.unwrap();

        let mut changed = original.clone();
        changed.connection_id = ConnectionId::from_random_bytes([9; 16]);
        let err = store.update_user(changed).await.unwrap_err();
        assert!(matches!(err, PanelError::Conflict(_)));

        let mut renamed = original;
        renamed.name = "alicia".into();
        store.update_user(renamed).await.unwrap();
        assert!(store.find_user_by_name("alicia").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_update_missing_is_not_found() {
        let store = MemoryStore::new();
        let err = store.update_user(user(1, "ghost")).await.unwrap_err();
        assert!(matches!(err, PanelError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_remove() {
        let store = MemoryStore::new();
        let alice = user(1, "alice");
        store.insert_user(alice.clone()).await.unwrap();

        assert!(store.remove_user(alice.id).await.unwrap());
        assert!(!store.remove_user(alice.id).await.unwrap());
        assert!(store.get_user(alice.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_credentials_replace_whole_record() {
        let store = MemoryStore::new();
        assert!(store.load_credentials().await.unwrap().is_none());

        let rng = SeededRandom::new(5);
        let first = CredentialSet::generate(
            &rng,
            "a.example:443",
            vec!["a.example".into()],
            Timestamp::from_secs(1),
        );
        let second = CredentialSet::generate(
            &rng,
            "b.example:443",
            vec!["b.example".into()],
            Timestamp::from_secs(2),
        );

        store.save_credentials(&first).await.unwrap();
        store.save_credentials(&second).await.unwrap();
        assert_eq!(store.load_credentials().await.unwrap(), Some(second));
    }
}
