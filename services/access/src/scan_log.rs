//! Scan log ports
//!
//! The log is append-only and is the single source of truth for both the
//! replay check and the session state. Granted events claim a per-user
//! transition sequence slot and consume their token nonce. Each slot and each
//! nonce can be claimed by one granted event only, which keeps two stations
//! from granting the same transition or the same token concurrently.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::{
    error::StoreError,
    models::{ScanEvent, UserId},
};

/// Result of appending an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Committed,
    /// Another granted event already claimed the transition slot
    Conflict,
    /// Another granted event already consumed the token nonce
    NonceConsumed,
}

/// Read side of the scan log
#[async_trait]
pub trait ScanHistoryStore: Send + Sync {
    /// Most recent event of any outcome for the user
    async fn latest_for(&self, user_id: &UserId) -> Result<Option<ScanEvent>, StoreError>;

    /// Granted event with the highest transition sequence for the user
    async fn latest_granted_for(&self, user_id: &UserId)
    -> Result<Option<ScanEvent>, StoreError>;

    /// Whether a granted scan already consumed `nonce`
    async fn nonce_consumed(&self, user_id: &UserId, nonce: Uuid) -> Result<bool, StoreError>;

    /// Up to `limit` events for the user, newest first
    async fn recent_for(&self, user_id: &UserId, limit: usize)
    -> Result<Vec<ScanEvent>, StoreError>;
}

/// Append side of the scan log
#[async_trait]
pub trait ScanLog: ScanHistoryStore {
    /// Durably append `event`
    ///
    /// Events without a transition sequence always commit. A granted event
    /// commits only if no other granted event for the same user holds its
    /// sequence (`Conflict`) or its nonce (`NonceConsumed`). A taken sequence
    /// is reported first.
    async fn record(&self, event: &ScanEvent) -> Result<RecordOutcome, StoreError>;
}

/// Process-local scan log for tests and single-node development runs
#[derive(Clone, Default)]
pub struct InMemoryScanLog {
    events: Arc<Mutex<Vec<ScanEvent>>>,
}

impl InMemoryScanLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every recorded event in append order
    pub async fn events(&self) -> Vec<ScanEvent> {
        self.events.lock().await.clone()
    }
}

fn belongs_to(event: &ScanEvent, user_id: &UserId) -> bool {
    event.user_id.as_ref() == Some(user_id)
}

fn consumes(events: &[ScanEvent], user_id: &UserId, nonce: Uuid) -> bool {
    events.iter().any(|event| {
        belongs_to(event, user_id) && event.is_granted() && event.token_nonce == Some(nonce)
    })
}

#[async_trait]
impl ScanHistoryStore for InMemoryScanLog {
    async fn latest_for(&self, user_id: &UserId) -> Result<Option<ScanEvent>, StoreError> {
        let events = self.events.lock().await;
        // Later appends win ties on timestamp
        Ok(events
            .iter()
            .enumerate()
            .filter(|(_, event)| belongs_to(event, user_id))
            .max_by_key(|(position, event)| (event.scanned_at, *position))
            .map(|(_, event)| event.clone()))
    }

    async fn latest_granted_for(
        &self,
        user_id: &UserId,
    ) -> Result<Option<ScanEvent>, StoreError> {
        let events = self.events.lock().await;
        Ok(events
            .iter()
            .filter(|event| belongs_to(event, user_id) && event.is_granted())
            .max_by_key(|event| event.transition_seq)
            .cloned())
    }

    async fn nonce_consumed(&self, user_id: &UserId, nonce: Uuid) -> Result<bool, StoreError> {
        let events = self.events.lock().await;
        Ok(consumes(&events, user_id, nonce))
    }

    async fn recent_for(
        &self,
        user_id: &UserId,
        limit: usize,
    ) -> Result<Vec<ScanEvent>, StoreError> {
        let events = self.events.lock().await;
        let mut matching: Vec<(usize, &ScanEvent)> = events
            .iter()
            .enumerate()
            .filter(|(_, event)| belongs_to(event, user_id))
            .collect();
        matching.sort_by(|(pa, a), (pb, b)| (b.scanned_at, pb).cmp(&(a.scanned_at, pa)));
        Ok(matching
            .into_iter()
            .take(limit)
            .map(|(_, event)| event.clone())
            .collect())
    }
}

#[async_trait]
impl ScanLog for InMemoryScanLog {
    async fn record(&self, event: &ScanEvent) -> Result<RecordOutcome, StoreError> {
        let mut events = self.events.lock().await;

        if let (Some(user_id), Some(seq)) = (&event.user_id, event.transition_seq) {
            let taken = events
                .iter()
                .any(|existing| belongs_to(existing, user_id) && existing.transition_seq == Some(seq));
            if taken {
                return Ok(RecordOutcome::Conflict);
            }
            if let Some(nonce) = event.token_nonce {
                if consumes(&events, user_id, nonce) {
                    return Ok(RecordOutcome::NonceConsumed);
                }
            }
        }

        events.push(event.clone());
        Ok(RecordOutcome::Committed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DenialReason, ScanAttempt, ScanType};
    use chrono::{DateTime, TimeDelta, Utc};

    fn user(id: &str) -> UserId {
        UserId::parse(id).unwrap()
    }

    fn attempt(scan_type: ScanType, at: DateTime<Utc>) -> ScanAttempt {
        ScanAttempt {
            scan_type,
            scanned_at: at,
            scanned_by: "op-1".to_string(),
            location: "north-door".to_string(),
        }
    }

    #[tokio::test]
    async fn test_sequence_slot_can_be_claimed_once() {
        let log = InMemoryScanLog::new();
        let now = Utc::now();
        let first = ScanEvent::granted(&attempt(ScanType::Entry, now), user("U1"), Uuid::new_v4(), 1);
        let rival = ScanEvent::granted(&attempt(ScanType::Entry, now), user("U1"), Uuid::new_v4(), 1);
        let other_user =
            ScanEvent::granted(&attempt(ScanType::Entry, now), user("U2"), Uuid::new_v4(), 1);

        assert_eq!(log.record(&first).await.unwrap(), RecordOutcome::Committed);
        assert_eq!(log.record(&rival).await.unwrap(), RecordOutcome::Conflict);
        assert_eq!(log.record(&other_user).await.unwrap(), RecordOutcome::Committed);
        assert_eq!(log.events().await.len(), 2);
    }

    #[tokio::test]
    async fn test_nonce_can_be_granted_once() {
        let log = InMemoryScanLog::new();
        let now = Utc::now();
        let nonce = Uuid::new_v4();
        let entry = ScanEvent::granted(&attempt(ScanType::Entry, now), user("U1"), nonce, 1);
        let exit = ScanEvent::granted(&attempt(ScanType::Exit, now), user("U1"), nonce, 2);
        let slot_and_nonce = ScanEvent::granted(&attempt(ScanType::Entry, now), user("U1"), nonce, 1);

        assert_eq!(log.record(&entry).await.unwrap(), RecordOutcome::Committed);
        assert_eq!(log.record(&exit).await.unwrap(), RecordOutcome::NonceConsumed);
        assert_eq!(log.record(&slot_and_nonce).await.unwrap(), RecordOutcome::Conflict);

        let denied = ScanEvent::denied(
            &attempt(ScanType::Exit, now),
            Some(user("U1")),
            Some(nonce),
            DenialReason::Replayed,
        );
        assert_eq!(log.record(&denied).await.unwrap(), RecordOutcome::Committed);
        assert_eq!(log.events().await.len(), 2);
    }

    #[tokio::test]
    async fn test_denials_always_append() {
        let log = InMemoryScanLog::new();
        let at = Utc::now();
        for _ in 0..3 {
            let denied = ScanEvent::denied(
                &attempt(ScanType::Exit, at),
                None,
                None,
                DenialReason::MalformedOrTampered,
            );
            assert_eq!(log.record(&denied).await.unwrap(), RecordOutcome::Committed);
        }
        assert_eq!(log.events().await.len(), 3);
    }

    #[tokio::test]
    async fn test_latest_queries() {
        let log = InMemoryScanLog::new();
        let u1 = user("U1");
        let t0 = Utc::now();

        let entry = ScanEvent::granted(&attempt(ScanType::Entry, t0), u1.clone(), Uuid::new_v4(), 1);
        let denied = ScanEvent::denied(
            &attempt(ScanType::Entry, t0 + TimeDelta::seconds(5)),
            Some(u1.clone()),
            Some(Uuid::new_v4()),
            DenialReason::WrongScanTypeForState,
        );
        log.record(&entry).await.unwrap();
        log.record(&denied).await.unwrap();

        assert_eq!(log.latest_for(&u1).await.unwrap(), Some(denied.clone()));
        assert_eq!(log.latest_granted_for(&u1).await.unwrap(), Some(entry.clone()));
        assert_eq!(log.latest_for(&user("U9")).await.unwrap(), None);

        let recent = log.recent_for(&u1, 10).await.unwrap();
        assert_eq!(recent, vec![denied, entry]);
        assert_eq!(log.recent_for(&u1, 1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_nonce_consumed_only_by_grants() {
        let log = InMemoryScanLog::new();
        let u1 = user("U1");
        let t0 = Utc::now();
        let granted_nonce = Uuid::new_v4();
        let denied_nonce = Uuid::new_v4();

        log.record(&ScanEvent::granted(
            &attempt(ScanType::Entry, t0),
            u1.clone(),
            granted_nonce,
            1,
        ))
        .await
        .unwrap();
        log.record(&ScanEvent::denied(
            &attempt(ScanType::Entry, t0),
            Some(u1.clone()),
            Some(denied_nonce),
            DenialReason::SubscriptionInactive,
        ))
        .await
        .unwrap();

        assert!(log.nonce_consumed(&u1, granted_nonce).await.unwrap());
        assert!(!log.nonce_consumed(&u1, denied_nonce).await.unwrap());
        assert!(!log.nonce_consumed(&user("U2"), granted_nonce).await.unwrap());
    }
}
