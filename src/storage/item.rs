//! Stored values and their expiry timestamps.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time as Unix seconds.
///
/// A clock set before the epoch reads as `0`.
#[inline]
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// A stored value with an optional absolute expiry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    /// The value stored under the key
    pub value: String,
    /// Unix second after which the item is expired (None = never expires)
    pub expires_at: Option<i64>,
}

impl Item {
    /// Creates an item that never expires.
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            expires_at: None,
        }
    }

    /// Creates an item expiring at the given Unix second.
    pub fn expiring_at(value: impl Into<String>, expires_at: i64) -> Self {
        Self {
            value: value.into(),
            expires_at: Some(expires_at),
        }
    }

    /// An item is live while `now <= expires_at`.
    #[inline]
    pub fn is_expired(&self, now: i64) -> bool {
        self.expires_at.is_some_and(|exp| now > exp)
    }

    /// Seconds left before expiry, clamped at zero. `None` if the item never expires.
    pub fn remaining_secs(&self, now: i64) -> Option<u64> {
        self.expires_at
            .map(|exp| exp.saturating_sub(now).max(0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_expiry_is_always_live() {
        let item = Item::new("v");
        assert!(!item.is_expired(i64::MAX));
        assert_eq!(item.remaining_secs(0), None);
    }

    #[test]
    fn test_expiry_boundary() {
        let item = Item::expiring_at("v", 100);
        assert!(!item.is_expired(99));
        // Still live during the expiry second itself
        assert!(!item.is_expired(100));
        assert!(item.is_expired(101));
    }

    #[test]
    fn test_remaining_secs() {
        let item = Item::expiring_at("v", 100);
        assert_eq!(item.remaining_secs(90), Some(10));
        assert_eq!(item.remaining_secs(100), Some(0));
        assert_eq!(item.remaining_secs(150), Some(0));
    }

    #[test]
    fn test_unix_now_is_recent() {
        // 2020-01-01T00:00:00Z
        assert!(unix_now() > 1_577_836_800);
    }
}
