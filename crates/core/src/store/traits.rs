//! Store traits.

use std::sync::Arc;

use async_trait::async_trait;
use xpanel_common::{Result, User, UserId};

use crate::credentials::CredentialSet;

/// Persisted record of the current credential set.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Load the current set, `None` before the first rotation
    async fn load_credentials(&self) -> Result<Option<CredentialSet>>;

    /// Replace the stored set as a single write
    async fn save_credentials(&self, set: &CredentialSet) -> Result<()>;
}

/// Persisted user roster.
///
/// `list_users` returns users in creation order so downstream documents
/// are stable.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn list_users(&self) -> Result<Vec<User>>;

    async fn get_user(&self, id: UserId) -> Result<Option<User>>;

    async fn find_user_by_name(&self, name: &str) -> Result<Option<User>>;

    /// Insert a new user. Fails with `Conflict` on a duplicate name or
    /// connection id.
    async fn insert_user(&self, user: User) -> Result<()>;

    /// Replace an existing user. Fails with `NotFound` if absent and with
    /// `Conflict` if the connection id would change.
    async fn update_user(&self, user: User) -> Result<()>;

    /// Remove a user, returning whether it existed
    async fn remove_user(&self, id: UserId) -> Result<bool>;
}

/// Everything the panel persists.
pub trait PanelStore: CredentialStore + UserStore {}

impl<T: CredentialStore + UserStore + ?Sized> PanelStore for T {}

#[async_trait]
impl<S: CredentialStore + ?Sized> CredentialStore for Arc<S> {
    async fn load_credentials(&self) -> Result<Option<CredentialSet>> {
        (**self).load_credentials().await
    }

    async fn save_credentials(&self, set: &CredentialSet) -> Result<()> {
        (**self).save_credentials(set).await
    }
}

#[async_trait]
impl<S: UserStore + ?Sized> UserStore for Arc<S> {
    async fn list_users(&self) -> Result<Vec<User>> {
        (**self).list_users().await
    }

    async fn get_user(&self, id: UserId) -> Result<Option<User>> {
        (**self).get_user(id).await
    }

    async fn find_user_by_name(&self, name: &str) -> Result<Option<User>> {
        (**self).find_user_by_name(name).await
    }

    async fn insert_user(&self, user: User) -> Result<()> {
        (**self).insert_user(user).await
    }

    async fn update_user(&self, user: User) -> Result<()> {
        (**self).update_user(user).await
    }

    async fn remove_user(&self, id: UserId) -> Result<bool> {
        (**self).remove_user(id).await
    }
}

/// Shared roster checks used by every store implementation
pub(crate) fn check_insert(users: &[User], user: &User) -> Result<()> {
    if users.iter().any(|u| u.name == user.name) {
        return Err(xpanel_common::PanelError::conflict(format!(
            "user name '{}' already exists",
            user.name
        )));
    }
    if users.iter().any(|u| u.connection_id == user.connection_id) {
        return Err(xpanel_common::PanelError::conflict(format!(
            "connection id {} already issued",
            user.connection_id
        )));
    }
    if users.iter().any(|u| u.id == user.id) {
        return Err(xpanel_common::PanelError::conflict(format!(
            "user id {} already exists",
            user.id
        )));
    }
    Ok(())
}

pub(crate) fn check_update(users: &[User], user: &User) -> Result<usize> {
    let index = users
        .iter()
        .position(|u| u.id == user.id)
        .ok_or_else(|| xpanel_common::PanelError::not_found(format!("user {}", user.id)))?;

    if users[index].connection_id != user.connection_id {
        return Err(xpanel_common::PanelError::conflict(
            "connection id is immutable once issued",
        ));
    }
    if users
        .iter()
        .any(|u| u.id != user.id && u.name == user.name)
    {
        return Err(xpanel_common::PanelError::conflict(format!(
            "user name '{}' already exists",
            user.name
        )));
    }
    Ok(index)
}
