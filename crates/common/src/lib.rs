pub mod config;
pub mod error;
pub mod types;

pub use config::{
    ApiConfig, ConfigError, EngineConfig, LoggingConfig, PanelConfig, RealityConfig,
    RoutingToggles, SchedulerConfig,
};
pub use error::{PanelError, Result};
pub use types::{DataQuota, Timestamp};

use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use thiserror::Error;
use uuid::Uuid;

pub const CONNECTION_ID_LEN: usize = 16;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("invalid connection id: {0}")]
    InvalidConnectionId(String),
    #[error("invalid user id: {0}")]
    InvalidUserId(String),
    #[error("user name must not be empty")]
    EmptyName,
}

/// Per-user token the engine uses to attribute traffic to an account.
///
/// Issued once at user creation and never rewritten afterwards.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Build a v4 identifier from 16 bytes of caller-supplied randomness
    pub fn from_random_bytes(bytes: [u8; CONNECTION_ID_LEN]) -> Self {
        Self(uuid::Builder::from_random_bytes(bytes).into_uuid())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    pub fn parse(s: &str) -> Result<Self, DomainError> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|err| DomainError::InvalidConnectionId(err.to_string()))
    }
}

impl fmt::Debug for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConnectionId({})", self.0.hyphenated())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for ConnectionId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Administrative key of a user record (distinct from the connection id)
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(Uuid);

impl UserId {
    pub fn from_random_bytes(bytes: [u8; 16]) -> Self {
        Self(uuid::Builder::from_random_bytes(bytes).into_uuid())
    }

    pub fn parse(s: &str) -> Result<Self, DomainError> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|err| DomainError::InvalidUserId(err.to_string()))
    }
}

impl fmt::Debug for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UserId({})", self.0.hyphenated())
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for UserId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// A proxy account as the panel stores it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    /// Display name, also used as the engine's per-client `email` label
    pub name: String,
    pub connection_id: ConnectionId,
    /// Cumulative bytes consumed
    #[serde(default)]
    pub data_used: u64,
    #[serde(default)]
    pub data_limit: DataQuota,
    #[serde(default)]
    pub expires_at: Option<Timestamp>,
    pub is_active: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl User {
    pub fn new(id: UserId, name: impl Into<String>, connection_id: ConnectionId) -> Self {
        let now = Timestamp::now();
        Self {
            id,
            name: name.into(),
            connection_id,
            data_used: 0,
            data_limit: DataQuota::UNLIMITED,
            expires_at: None,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_limit(mut self, limit: DataQuota) -> Self {
        self.data_limit = limit;
        self
    }

    pub fn with_expiry(mut self, expires_at: Option<Timestamp>) -> Self {
        self.expires_at = expires_at;
        self
    }

    pub fn with_active(mut self, is_active: bool) -> Self {
        self.is_active = is_active;
        self
    }

    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.expires_at.map(|at| at <= now).unwrap_or(false)
    }

    pub fn is_over_quota(&self) -> bool {
        self.data_limit.is_exceeded(self.data_used)
    }
}

/// Validate and normalise an administrator-supplied user name
pub fn normalize_name(name: &str) -> Result<String, DomainError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(DomainError::EmptyName);
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_id_parses_hyphenated() {
        let raw = "11111111-1111-4111-8111-111111111111";
        let id = ConnectionId::parse(raw).expect("should parse valid uuid");
        assert_eq!(id.to_string(), raw);
    }

    #[test]
    fn connection_id_rejects_garbage() {
        let err = ConnectionId::from_str("not-a-uuid").unwrap_err();
        assert!(matches!(err, DomainError::InvalidConnectionId(_)));
    }

    #[test]
    fn connection_id_from_bytes_is_v4() {
        let id = ConnectionId::from_random_bytes([7u8; CONNECTION_ID_LEN]);
        assert_eq!(id.as_uuid().get_version_num(), 4);
    }

    #[test]
    fn connection_id_serializes_as_plain_string() {
        let id = ConnectionId::parse("11111111-1111-4111-8111-111111111111").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"11111111-1111-4111-8111-111111111111\"");
    }

    #[test]
    fn user_expiry_and_quota() {
        let user = User::new(
            UserId::from_random_bytes([1u8; 16]),
            "alice",
            ConnectionId::from_random_bytes([2u8; 16]),
        )
        .with_limit(DataQuota::new(100))
        .with_expiry(Some(Timestamp::from_secs(1_000)));

        assert!(user.is_expired(Timestamp::from_secs(1_000)));
        assert!(!user.is_expired(Timestamp::from_secs(999)));
        assert!(!user.is_over_quota());
    }

    #[test]
    fn normalize_name_trims_and_rejects_empty() {
        assert_eq!(normalize_name("  bob ").unwrap(), "bob");
        assert_eq!(normalize_name("   ").unwrap_err(), DomainError::EmptyName);
    }
}
