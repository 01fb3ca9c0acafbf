//! Token validation
//!
//! Checks run in a fixed order and stop at the first failure: decode,
//! expiry, issuance skew, replay, subscription. The cheap and
//! attacker-facing checks come before the ones that touch storage.

use chrono::{DateTime, TimeDelta, Utc};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::{
    error::StoreError,
    keys::KeyProvider,
    models::{DenialReason, UserId},
    scan_log::ScanHistoryStore,
    subscription::SubscriptionStore,
    token::{self, AccessToken, DecodeError},
};

/// Everything a validation needs besides the token itself
pub struct ValidationContext<'a> {
    /// The single clock reading every comparison uses
    pub now: DateTime<Utc>,
    /// Station operator, for attribution in logs
    pub operator_id: &'a str,
    pub subscriptions: &'a dyn SubscriptionStore,
    pub history: &'a dyn ScanHistoryStore,
}

/// Outcome of validating a presented token
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationResult {
    Valid {
        user_id: UserId,
        payload: AccessToken,
    },
    Invalid {
        reason: DenialReason,
        /// The payload, when the token got far enough to be decoded
        payload: Option<AccessToken>,
    },
}

impl ValidationResult {
    fn invalid(reason: DenialReason, payload: Option<AccessToken>) -> Self {
        ValidationResult::Invalid { reason, payload }
    }
}

/// Validates scanned tokens against time, replay and subscription rules
#[derive(Clone)]
pub struct TokenValidator {
    keys: Arc<dyn KeyProvider>,
    clock_skew: TimeDelta,
}

impl TokenValidator {
    pub fn new(keys: Arc<dyn KeyProvider>, clock_skew: TimeDelta) -> Self {
        Self { keys, clock_skew }
    }

    /// Open `raw` with the key its version tag names
    pub async fn decode(&self, raw: &str) -> Result<AccessToken, DecodeError> {
        let version = token::peek_version(raw)?;

        let current = self.keys.current_key().await;
        let key = if current.version() == version {
            current
        } else {
            self.keys
                .key_for_version(version)
                .await
                .ok_or(DecodeError::AuthenticationFailed)?
        };

        token::decode(raw, &key)
    }

    /// Validate `raw`
    ///
    /// Returns `Err` only when a store could not be read; every policy
    /// outcome is an `Ok`.
    pub async fn validate(
        &self,
        raw: &str,
        context: &ValidationContext<'_>,
    ) -> Result<ValidationResult, StoreError> {
        let payload = match self.decode(raw).await {
            Ok(payload) => payload,
            Err(e) => {
                warn!(
                    "Rejected undecodable token at station of {}: {}",
                    context.operator_id, e
                );
                return Ok(ValidationResult::invalid(
                    DenialReason::MalformedOrTampered,
                    None,
                ));
            }
        };

        if context.now > payload.expires_at {
            return Ok(ValidationResult::invalid(
                DenialReason::Expired,
                Some(payload),
            ));
        }

        if payload.issued_at > context.now + self.clock_skew {
            warn!(
                "Token for {} issued {} ahead of station clock",
                payload.user_id,
                payload.issued_at - context.now
            );
            return Ok(ValidationResult::invalid(
                DenialReason::NotYetValid,
                Some(payload),
            ));
        }

        if context
            .history
            .nonce_consumed(&payload.user_id, payload.nonce)
            .await?
        {
            return Ok(ValidationResult::invalid(
                DenialReason::Replayed,
                Some(payload),
            ));
        }

        let subscription = context
            .subscriptions
            .get_subscription_status(&payload.user_id)
            .await?;
        if !subscription.is_some_and(|s| s.permits_access(context.now)) {
            return Ok(ValidationResult::invalid(
                DenialReason::SubscriptionInactive,
                Some(payload),
            ));
        }

        debug!("Token for {} is valid", payload.user_id);
        Ok(ValidationResult::Valid {
            user_id: payload.user_id.clone(),
            payload,
        })
    }
}
