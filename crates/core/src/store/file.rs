//! JSON-on-disk store.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::Mutex;
use xpanel_common::{PanelError, Result, User, UserId};

use super::traits::{check_insert, check_update, CredentialStore, UserStore};
use crate::credentials::CredentialSet;

const USERS_FILE: &str = "users.json";
const CREDENTIALS_FILE: &str = "credentials.json";

/// Store keeping the roster and the credential set as JSON files in a
/// data directory.
///
/// Every write goes to a sibling temp file which is then renamed over the
/// target, so a reader never sees a half-written record.
#[derive(Debug)]
pub struct FileStore {
    data_dir: PathBuf,
    write_lock: Mutex<()>,
}

impl FileStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn users_path(&self) -> PathBuf {
        self.data_dir.join(USERS_FILE)
    }

    fn credentials_path(&self) -> PathBuf {
        self.data_dir.join(CREDENTIALS_FILE)
    }

    async fn read_users(&self) -> Result<Vec<User>> {
        Ok(read_json(&self.users_path()).await?.unwrap_or_default())
    }

    async fn write_users(&self, users: &[User]) -> Result<()> {
        write_json(&self.users_path(), &users).await
    }
}

#[async_trait]
impl CredentialStore for FileStore {
    async fn load_credentials(&self) -> Result<Option<CredentialSet>> {
        read_json(&self.credentials_path()).await
    }

    async fn save_credentials(&self, set: &CredentialSet) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        write_json(&self.credentials_path(), set).await
    }
}

#[async_trait]
impl UserStore for FileStore {
    async fn list_users(&self) -> Result<Vec<User>> {
        self.read_users().await
    }

    async fn get_user(&self, id: UserId) -> Result<Option<User>> {
        Ok(self.read_users().await?.into_iter().find(|u| u.id == id))
    }

    async fn find_user_by_name(&self, name: &str) -> Result<Option<User>> {
        Ok(self.read_users().await?.into_iter().find(|u| u.name == name))
    }

    async fn insert_user(&self, user: User) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut users = self.read_users().await?;
        check_insert(&users, &user)?;
        users.push(user);
        self.write_users(&users).await
    }

    async fn update_user(&self, user: User) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut users = self.read_users().await?;
        let index = check_update(&users, &user)?;
        users[index] = user;
        self.write_users(&users).await
    }

    async fn remove_user(&self, id: UserId) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let mut users = self.read_users().await?;
        let before = users.len();
        users.retain(|u| u.id != id);
        if users.len() == before {
            return Ok(false);
        }
        self.write_users(&users).await?;
        Ok(true)
    }
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let contents = match tokio::fs::read_to_string(path).await {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let value = serde_json::from_str(&contents)
        .map_err(|e| PanelError::serialization(format!("{}: {}", path.display(), e)))?;
    Ok(Some(value))
}

async fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_vec_pretty(value)?;
    write_atomic(path, &json)
        .await
        .map_err(|e| PanelError::persistence(format!("{}: {}", path.display(), e)))
}

/// Write `bytes` to `path` through a temp file and a rename.
///
/// Parent directories are created as needed. On failure the previous
/// contents of `path` are left untouched.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }

    let mut tmp_name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    {
        use tokio::io::AsyncWriteExt;

        let mut file = tokio::fs::File::create(&tmp_path).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
    }

    if let Err(e) = tokio::fs::rename(&tmp_path, path).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(e);
    }
    Ok(())
}
