/// API request and response types

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use xpanel_common::{Timestamp, User};
use xpanel_core::{CredentialSet, Dialect, ReloadPath, SyncRecord, Synced, UserStats};

/// A user record as the API shows it
#[derive(Debug, Serialize, Deserialize)]
pub struct UserResponse {
    pub id: String,
    pub name: String,
    /// Connection identifier carried in links and the engine document
    pub uuid: String,
    /// Cumulative bytes consumed
    pub data_used: u64,
    /// Byte quota, 0 for unlimited
    pub data_limit: u64,
    /// Bytes left, absent when unlimited
    pub data_remaining: Option<u64>,
    /// Expiry as Unix seconds
    pub expires_at: Option<u64>,
    pub is_active: bool,
    pub is_expired: bool,
    pub created_at: u64,
    pub updated_at: u64,
}

impl UserResponse {
    pub fn from_user(user: &User, now: Timestamp) -> Self {
        Self {
            id: user.id.to_string(),
            name: user.name.clone(),
            uuid: user.connection_id.to_string(),
            data_used: user.data_used,
            data_limit: user.data_limit.bytes(),
            data_remaining: user.data_limit.remaining(user.data_used),
            expires_at: user.expires_at.map(|t| t.as_secs()),
            is_active: user.is_active,
            is_expired: user.is_expired(now),
            created_at: user.created_at.as_secs(),
            updated_at: user.updated_at.as_secs(),
        }
    }
}

/// User list response
#[derive(Debug, Serialize, Deserialize)]
pub struct UserListResponse {
    pub users: Vec<UserResponse>,
    pub total: usize,
}

/// Result of a mutation that triggers a resync
#[derive(Debug, Serialize)]
pub struct MutationResponse<T> {
    pub data: T,
    /// Whether the running engine picked up the change
    pub synced: bool,
    /// How the change was applied
    pub reload_path: Option<ReloadPath>,
    /// Why the engine is stale, if it is
    pub sync_error: Option<String>,
}

impl<T> MutationResponse<T> {
    pub fn from_synced<U>(synced: Synced<U>, f: impl FnOnce(U) -> T) -> Self {
        let (reload_path, sync_error) = match &synced.status {
            xpanel_core::SyncStatus::Applied(path) => (Some(*path), None),
            xpanel_core::SyncStatus::Stale(e) => (None, Some(e.to_string())),
        };
        Self {
            synced: synced.is_applied(),
            data: f(synced.value),
            reload_path,
            sync_error,
        }
    }
}

/// Public view of the live credentials. The private key never leaves the panel.
#[derive(Debug, Serialize, Deserialize)]
pub struct CredentialView {
    pub public_key: String,
    pub short_ids: Vec<String>,
    pub server_names: Vec<String>,
    pub dest: String,
    pub external_address: Option<String>,
    pub last_rotated: u64,
    /// Earliest time the scheduler will rotate again
    pub next_rotation: u64,
}

impl CredentialView {
    pub fn new(set: &CredentialSet, rotation_interval: std::time::Duration) -> Self {
        Self {
            public_key: set.public_key().to_string(),
            short_ids: set.short_ids.iter().map(|s| s.to_string()).collect(),
            server_names: set.server_names.clone(),
            dest: set.dest.clone(),
            external_address: set.external_address.clone(),
            last_rotated: set.last_rotated.as_secs(),
            next_rotation: set
                .last_rotated
                .as_secs()
                .saturating_add(rotation_interval.as_secs()),
        }
    }
}

/// Subscription links for one user
#[derive(Debug, Serialize)]
pub struct SubscriptionResponse {
    pub user_id: String,
    pub name: String,
    pub links: BTreeMap<Dialect, String>,
    /// Non-fatal problems, e.g. the placeholder server address
    pub warnings: Vec<String>,
}

/// Panel status
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub version: &'static str,
    pub last_sync: Option<SyncRecord>,
    pub users: UserStats,
}

/// Error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error message
    pub error: String,
    /// HTTP status code
    pub code: u16,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, code: u16) -> Self {
        Self {
            error: error.into(),
            code,
        }
    }
}

/// User creation request
#[derive(Debug, Serialize, Deserialize)]
pub struct CreateUserRequest {
    pub name: String,
    /// Byte quota, 0 for unlimited
    #[serde(default)]
    pub data_limit: u64,
    /// Expiry as Unix seconds
    #[serde(default)]
    pub expires_at: Option<u64>,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

/// Partial user update. Absent fields are left untouched; `clear_expiry`
/// removes an existing expiry.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct UpdateUserRequest {
    pub name: Option<String>,
    pub data_limit: Option<u64>,
    pub expires_at: Option<u64>,
    #[serde(default)]
    pub clear_expiry: bool,
    pub is_active: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DestinationRequest {
    pub dest: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ServerNamesRequest {
    pub server_names: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AddressRequest {
    /// Null clears the stored address
    pub address: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListUsersQuery {
    pub active: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SubscriptionQuery {
    pub address: Option<String>,
}
