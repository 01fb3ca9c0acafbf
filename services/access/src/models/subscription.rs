//! Subscription state as supplied by the membership store

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Membership status of a credential holder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Expired,
    Inactive,
}

impl SubscriptionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Expired => "expired",
            SubscriptionStatus::Inactive => "inactive",
        }
    }
}

impl FromStr for SubscriptionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(SubscriptionStatus::Active),
            "expired" => Ok(SubscriptionStatus::Expired),
            "inactive" => Ok(SubscriptionStatus::Inactive),
            other => Err(format!("unknown subscription status: {}", other)),
        }
    }
}

/// Read-only view of a user's subscription
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub status: SubscriptionStatus,
    pub valid_until: DateTime<Utc>,
}

impl Subscription {
    /// Whether the subscription admits entry at `now`
    pub fn permits_access(&self, now: DateTime<Utc>) -> bool {
        self.status == SubscriptionStatus::Active && self.valid_until >= now
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_permits_access() {
        let now = Utc::now();
        let active = Subscription {
            status: SubscriptionStatus::Active,
            valid_until: now,
        };
        assert!(active.permits_access(now));
        assert!(!active.permits_access(now + Duration::milliseconds(1)));

        let expired = Subscription {
            status: SubscriptionStatus::Expired,
            valid_until: now + Duration::days(365),
        };
        assert!(!expired.permits_access(now));
    }

    #[test]
    fn test_status_round_trips_through_text() {
        for status in [
            SubscriptionStatus::Active,
            SubscriptionStatus::Expired,
            SubscriptionStatus::Inactive,
        ] {
            assert_eq!(status.as_str().parse::<SubscriptionStatus>(), Ok(status));
        }
        assert!("paused".parse::<SubscriptionStatus>().is_err());
    }
}
