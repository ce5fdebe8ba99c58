//! Live presence of connected users.

use async_trait::async_trait;
use xpanel_common::{ConnectionId, Result};

/// Reports which connection ids currently hold a live session
#[async_trait]
pub trait PresenceSource: Send + Sync {
    async fn online_connection_ids(&self) -> Result<Vec<ConnectionId>>;
}

/// Presence source for deployments without a stats client.
///
/// Always reports nobody online. Cumulative traffic is not a stand-in for
/// presence.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPresence;

#[async_trait]
impl PresenceSource for NoPresence {
    async fn online_connection_ids(&self) -> Result<Vec<ConnectionId>> {
        Ok(Vec::new())
    }
}

/// Fixed set of online ids
#[derive(Debug, Default, Clone)]
pub struct StaticPresence(pub Vec<ConnectionId>);

#[async_trait]
impl PresenceSource for StaticPresence {
    async fn online_connection_ids(&self) -> Result<Vec<ConnectionId>> {
        Ok(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_no_presence_is_empty() {
        assert!(NoPresence.online_connection_ids().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_static_presence() {
        let id = ConnectionId::from_random_bytes([3; 16]);
        let source = StaticPresence(vec![id]);
        assert_eq!(source.online_connection_ids().await.unwrap(), vec![id]);
    }
}
