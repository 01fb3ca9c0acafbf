//! Scan pipeline and token issuance
//!
//! `process_scan` is the one entry point scanner stations call. It decodes
//! and validates the token, derives the session state from the log, and
//! commits the decision. A grant exists only once its event is committed:
//! the event claims the next transition slot for the user, and losing that
//! race sends the scan back to re-read the log and decide again.

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use std::{sync::Arc, time::Duration};
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::{
    clock::Clock,
    config::AccessConfig,
    error::{AccessError, AccessResult, StoreError},
    keys::KeyProvider,
    models::{DenialReason, ScanAttempt, ScanEvent, ScanType, UserId},
    scan_log::{RecordOutcome, ScanHistoryStore, ScanLog},
    session::{SessionSnapshot, SessionState, Transition, next_state},
    subscription::SubscriptionStore,
    token::{self, AccessToken, EncodedToken},
    validation::{validate_location, validate_operator_id},
    validator::{TokenValidator, ValidationContext, ValidationResult},
};

/// Why a scan could not be decided
///
/// A failed scan wrote nothing as a grant and can be retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    Timeout,
    StoreUnavailable,
    LogWriteFailed,
    Conflict,
    InvalidRequest,
}

impl FailureReason {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureReason::Timeout => "timeout",
            FailureReason::StoreUnavailable => "store_unavailable",
            FailureReason::LogWriteFailed => "log_write_failed",
            FailureReason::Conflict => "conflict",
            FailureReason::InvalidRequest => "invalid_request",
        }
    }
}

/// Decision returned to the scanner station
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ScanOutcome {
    Granted {
        user_id: UserId,
        new_state: SessionState,
    },
    Denied {
        reason: DenialReason,
    },
    Failed {
        reason: FailureReason,
    },
}

/// A freshly issued credential
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: EncodedToken,
    pub expires_at: DateTime<Utc>,
    pub key_version: u32,
}

/// Storage and time collaborators of [`AccessService`]
pub struct AccessPorts<L> {
    pub keys: Arc<dyn KeyProvider>,
    pub subscriptions: Arc<dyn SubscriptionStore>,
    pub log: Arc<L>,
    pub clock: Arc<dyn Clock>,
}

/// The access token lifecycle: issuance and scan processing
#[derive(Clone)]
pub struct AccessService {
    keys: Arc<dyn KeyProvider>,
    validator: TokenValidator,
    subscriptions: Arc<dyn SubscriptionStore>,
    history: Arc<dyn ScanHistoryStore>,
    log: Arc<dyn ScanLog>,
    clock: Arc<dyn Clock>,
    validity_window: TimeDelta,
    scan_timeout: Duration,
    max_commit_attempts: u32,
}

impl AccessService {
    pub fn new<L: ScanLog + 'static>(config: &AccessConfig, ports: AccessPorts<L>) -> Self {
        let history: Arc<dyn ScanHistoryStore> = ports.log.clone();
        let log: Arc<dyn ScanLog> = ports.log;

        Self {
            validator: TokenValidator::new(ports.keys.clone(), config.clock_skew),
            keys: ports.keys,
            subscriptions: ports.subscriptions,
            history,
            log,
            clock: ports.clock,
            validity_window: config.validity_window,
            scan_timeout: config.scan_timeout,
            max_commit_attempts: config.max_commit_attempts,
        }
    }

    /// Issue a new access token for `user_id` under the current key
    pub async fn generate_token(&self, user_id: &UserId) -> AccessResult<IssuedToken> {
        let key = self.keys.current_key().await;
        let payload = AccessToken::issue(user_id.clone(), self.clock.now(), self.validity_window);
        let token = token::encode(&payload, &key)?;

        info!(
            "Issued access token for {} with key version {}, expires at {}",
            user_id,
            key.version(),
            payload.expires_at
        );

        Ok(IssuedToken {
            token,
            expires_at: payload.expires_at,
            key_version: key.version(),
        })
    }

    /// Decide a scan and record it
    ///
    /// Never panics or errors on hostile input. The scan budget covers the
    /// reads that lead to a decision; running out of it yields
    /// `Failed(timeout)` with nothing written. Once a decision is being
    /// written, the write runs to completion and its result is what gets
    /// reported, so the reported outcome always matches the log.
    pub async fn process_scan(
        &self,
        raw_token: &str,
        scan_type: ScanType,
        operator_id: &str,
        location: &str,
    ) -> ScanOutcome {
        if let Err(e) = validate_operator_id(operator_id).and(validate_location(location)) {
            warn!("Rejected scan request: {}", e);
            return ScanOutcome::Failed {
                reason: FailureReason::InvalidRequest,
            };
        }

        let attempt = ScanAttempt {
            scan_type,
            scanned_at: self.clock.now(),
            scanned_by: operator_id.to_string(),
            location: location.to_string(),
        };
        let deadline = Instant::now() + self.scan_timeout;

        match self.decide(raw_token, &attempt, deadline).await {
            Ok(outcome) => outcome,
            Err(reason) => ScanOutcome::Failed { reason },
        }
    }

    /// Run a read step against the scan budget
    async fn within_budget<T>(
        &self,
        deadline: Instant,
        attempt: &ScanAttempt,
        action: &str,
        step: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, FailureReason> {
        match tokio::time::timeout_at(deadline, step).await {
            Ok(result) => result.map_err(|e| store_failure(action, e)),
            Err(_) => {
                warn!(
                    "Scan at {} by {} exceeded {:?} while trying to {}",
                    attempt.location, attempt.scanned_by, self.scan_timeout, action
                );
                Err(FailureReason::Timeout)
            }
        }
    }

    /// Append `event`, detached from the caller so a dropped request cannot
    /// cut a write off halfway
    async fn commit(&self, event: ScanEvent) -> Result<RecordOutcome, StoreError> {
        let log = self.log.clone();
        tokio::spawn(async move { log.record(&event).await })
            .await
            .map_err(|e| StoreError::Unavailable(format!("scan log writer aborted: {}", e)))?
    }

    async fn decide(
        &self,
        raw_token: &str,
        attempt: &ScanAttempt,
        deadline: Instant,
    ) -> Result<ScanOutcome, FailureReason> {
        let context = ValidationContext {
            now: attempt.scanned_at,
            operator_id: &attempt.scanned_by,
            subscriptions: self.subscriptions.as_ref(),
            history: self.history.as_ref(),
        };

        let validation = self
            .within_budget(
                deadline,
                attempt,
                "validate token",
                self.validator.validate(raw_token, &context),
            )
            .await?;

        let (user_id, payload) = match validation {
            ValidationResult::Valid { user_id, payload } => (user_id, payload),
            ValidationResult::Invalid { reason, payload } => {
                return self.deny(attempt, payload.as_ref(), reason).await;
            }
        };

        for round in 1..=self.max_commit_attempts {
            let latest = self
                .within_budget(
                    deadline,
                    attempt,
                    "read session state",
                    self.history.latest_granted_for(&user_id),
                )
                .await?;
            let snapshot = SessionSnapshot::from_latest_granted(latest.as_ref());

            let new_state = match next_state(&user_id, attempt.scan_type, snapshot.state) {
                Transition::Accepted(new_state) => new_state,
                Transition::Rejected(reason) => {
                    return self.deny(attempt, Some(&payload), reason).await;
                }
            };

            let event =
                ScanEvent::granted(attempt, user_id.clone(), payload.nonce, snapshot.next_seq());
            match self.commit(event).await {
                Ok(RecordOutcome::Committed) => {
                    info!(
                        "Granted {} for {} at {} by {}",
                        attempt.scan_type.as_str(),
                        user_id,
                        attempt.location,
                        attempt.scanned_by
                    );
                    return Ok(ScanOutcome::Granted { user_id, new_state });
                }
                Ok(RecordOutcome::Conflict) => {
                    warn!(
                        "Transition {} for {} was taken concurrently (round {})",
                        snapshot.next_seq(),
                        user_id,
                        round
                    );
                }
                Ok(RecordOutcome::NonceConsumed) => {
                    warn!(
                        "Token for {} was granted at another station while this scan was decided",
                        user_id
                    );
                    return self
                        .deny(attempt, Some(&payload), DenialReason::Replayed)
                        .await;
                }
                Err(e) => {
                    error!("Failed to record granted scan for {}: {}", user_id, e);
                    return Err(FailureReason::LogWriteFailed);
                }
            }
        }

        error!(
            "Gave up on scan for {} after {} conflicting commits",
            user_id, self.max_commit_attempts
        );
        Err(FailureReason::Conflict)
    }

    async fn deny(
        &self,
        attempt: &ScanAttempt,
        payload: Option<&AccessToken>,
        reason: DenialReason,
    ) -> Result<ScanOutcome, FailureReason> {
        let event = ScanEvent::denied(
            attempt,
            payload.map(|p| p.user_id.clone()),
            payload.map(|p| p.nonce),
            reason,
        );

        match self.commit(event).await {
            Ok(_) => {
                warn!(
                    "Denied {} for {} at {}: {}",
                    attempt.scan_type.as_str(),
                    payload.map_or("<unknown>", |p| p.user_id.as_str()),
                    attempt.location,
                    reason
                );
                Ok(ScanOutcome::Denied { reason })
            }
            Err(e) => {
                error!("Failed to record denied scan: {}", e);
                Err(FailureReason::LogWriteFailed)
            }
        }
    }

    /// Current session state of a user, derived from the log
    pub async fn session_state(&self, user_id: &UserId) -> AccessResult<SessionState> {
        let latest = self.history.latest_granted_for(user_id).await?;
        Ok(SessionSnapshot::from_latest_granted(latest.as_ref()).state)
    }

    /// Audit trail of a user, newest first
    pub async fn recent_scans(&self, user_id: &UserId, limit: usize) -> AccessResult<Vec<ScanEvent>> {
        if limit == 0 {
            return Err(AccessError::InvalidInput("limit must be positive".to_string()));
        }
        Ok(self.history.recent_for(user_id, limit).await?)
    }
}

fn store_failure(action: &str, e: StoreError) -> FailureReason {
    error!("Failed to {}: {}", action, e);
    FailureReason::StoreUnavailable
}
