use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Byte quota for an account. Zero means unlimited.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DataQuota(pub u64);

impl DataQuota {
    pub const UNLIMITED: DataQuota = DataQuota(0);

    pub fn new(bytes: u64) -> Self {
        Self(bytes)
    }

    pub fn from_gb(gb: u64) -> Self {
        Self(gb.saturating_mul(1024 * 1024 * 1024))
    }

    pub fn bytes(&self) -> u64 {
        self.0
    }

    pub fn is_unlimited(&self) -> bool {
        self.0 == 0
    }

    pub fn is_exceeded(&self, used: u64) -> bool {
        !self.is_unlimited() && used >= self.0
    }

    /// Bytes left before the quota trips, `None` when unlimited
    pub fn remaining(&self, used: u64) -> Option<u64> {
        if self.is_unlimited() {
            None
        } else {
            Some(self.0.saturating_sub(used))
        }
    }
}

impl std::fmt::Display for DataQuota {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_unlimited() {
            write!(f, "unlimited")
        } else {
            write!(f, "{} B", self.0)
        }
    }
}

/// Timestamp in Unix epoch seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(pub u64);

impl Timestamp {
    pub fn now() -> Self {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Self(secs)
    }

    pub fn from_secs(secs: u64) -> Self {
        Self(secs)
    }

    pub fn as_secs(&self) -> u64 {
        self.0
    }

    pub fn elapsed(&self) -> Duration {
        Self::now().since(*self)
    }

    /// Time from `earlier` to `self`, zero if `earlier` is in the future
    pub fn since(&self, earlier: Timestamp) -> Duration {
        Duration::from_secs(self.0.saturating_sub(earlier.0))
    }

    pub fn saturating_sub(&self, d: Duration) -> Timestamp {
        Timestamp(self.0.saturating_sub(d.as_secs()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quota_unlimited() {
        let quota = DataQuota::UNLIMITED;
        assert!(quota.is_unlimited());
        assert!(!quota.is_exceeded(u64::MAX));
        assert_eq!(quota.remaining(10), None);
    }

    #[test]
    fn test_quota_limits() {
        let quota = DataQuota::new(100);
        assert!(!quota.is_exceeded(99));
        assert!(quota.is_exceeded(100));
        assert_eq!(quota.remaining(40), Some(60));
        assert_eq!(quota.remaining(400), Some(0));
        assert_eq!(DataQuota::from_gb(1).bytes(), 1024 * 1024 * 1024);
    }

    #[test]
    fn test_timestamp() {
        let ts1 = Timestamp::now();
        let ts2 = Timestamp::from_secs(ts1.as_secs() - 10);
        let elapsed = ts2.elapsed();
        assert!(elapsed.as_secs() >= 10);
    }

    #[test]
    fn test_timestamp_since_saturates() {
        let early = Timestamp::from_secs(100);
        let late = Timestamp::from_secs(160);
        assert_eq!(late.since(early), Duration::from_secs(60));
        assert_eq!(early.since(late), Duration::ZERO);
        assert_eq!(late.saturating_sub(Duration::from_secs(500)), Timestamp(0));
    }
}
