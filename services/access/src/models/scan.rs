//! Scan log entries and the vocabulary around them

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use uuid::Uuid;

use super::UserId;

/// Direction of a scan at a station
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanType {
    Entry,
    Exit,
}

impl ScanType {
    pub fn as_str(self) -> &'static str {
        match self {
            ScanType::Entry => "entry",
            ScanType::Exit => "exit",
        }
    }
}

impl FromStr for ScanType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "entry" => Ok(ScanType::Entry),
            "exit" => Ok(ScanType::Exit),
            other => Err(format!("unknown scan type: {}", other)),
        }
    }
}

/// Persisted outcome of a scan attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanResult {
    Granted,
    Denied,
}

impl ScanResult {
    pub fn as_str(self) -> &'static str {
        match self {
            ScanResult::Granted => "granted",
            ScanResult::Denied => "denied",
        }
    }
}

impl FromStr for ScanResult {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "granted" => Ok(ScanResult::Granted),
            "denied" => Ok(ScanResult::Denied),
            other => Err(format!("unknown scan outcome: {}", other)),
        }
    }
}

/// Machine-readable reason attached to a denied scan
///
/// The string forms are shown to operators and stored in the audit log, so
/// they must stay stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialReason {
    MalformedOrTampered,
    Expired,
    NotYetValid,
    Replayed,
    SubscriptionInactive,
    WrongScanTypeForState,
}

impl DenialReason {
    pub fn as_str(self) -> &'static str {
        match self {
            DenialReason::MalformedOrTampered => "malformed_or_tampered",
            DenialReason::Expired => "expired",
            DenialReason::NotYetValid => "not_yet_valid",
            DenialReason::Replayed => "replayed",
            DenialReason::SubscriptionInactive => "subscription_inactive",
            DenialReason::WrongScanTypeForState => "wrong_scan_type_for_state",
        }
    }
}

impl fmt::Display for DenialReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DenialReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "malformed_or_tampered" => Ok(DenialReason::MalformedOrTampered),
            "expired" => Ok(DenialReason::Expired),
            "not_yet_valid" => Ok(DenialReason::NotYetValid),
            "replayed" => Ok(DenialReason::Replayed),
            "subscription_inactive" => Ok(DenialReason::SubscriptionInactive),
            "wrong_scan_type_for_state" => Ok(DenialReason::WrongScanTypeForState),
            other => Err(format!("unknown denial reason: {}", other)),
        }
    }
}

/// One scan attempt, granted or denied
///
/// Events are immutable once recorded; corrections are new events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanEvent {
    pub id: Uuid,
    /// `None` when the token could not be decoded
    pub user_id: Option<UserId>,
    pub scan_type: ScanType,
    pub scanned_at: DateTime<Utc>,
    pub scanned_by: String,
    pub location: String,
    pub outcome: ScanResult,
    pub denial_reason: Option<DenialReason>,
    /// Nonce of the presented token, when it decoded
    pub token_nonce: Option<Uuid>,
    /// Position of a granted event in the user's transition sequence.
    /// Two granted events for one user never share a value.
    pub transition_seq: Option<i64>,
}

/// Attribution shared by every event a single scan produces
#[derive(Debug, Clone)]
pub struct ScanAttempt {
    pub scan_type: ScanType,
    pub scanned_at: DateTime<Utc>,
    pub scanned_by: String,
    pub location: String,
}

impl ScanEvent {
    /// A granted transition claiming slot `transition_seq`
    pub fn granted(
        attempt: &ScanAttempt,
        user_id: UserId,
        token_nonce: Uuid,
        transition_seq: i64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: Some(user_id),
            scan_type: attempt.scan_type,
            scanned_at: attempt.scanned_at,
            scanned_by: attempt.scanned_by.clone(),
            location: attempt.location.clone(),
            outcome: ScanResult::Granted,
            denial_reason: None,
            token_nonce: Some(token_nonce),
            transition_seq: Some(transition_seq),
        }
    }

    /// A denial; `user_id` and `token_nonce` are known only if the token decoded
    pub fn denied(
        attempt: &ScanAttempt,
        user_id: Option<UserId>,
        token_nonce: Option<Uuid>,
        reason: DenialReason,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            scan_type: attempt.scan_type,
            scanned_at: attempt.scanned_at,
            scanned_by: attempt.scanned_by.clone(),
            location: attempt.location.clone(),
            outcome: ScanResult::Denied,
            denial_reason: Some(reason),
            token_nonce,
            transition_seq: None,
        }
    }

    pub fn is_granted(&self) -> bool {
        self.outcome == ScanResult::Granted
    }
}
