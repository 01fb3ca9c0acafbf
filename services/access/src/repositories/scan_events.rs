//! Scan log stored in PostgreSQL
//!
//! Two partial unique indexes over granted rows are the serialization points
//! for grants. `(user_id, transition_seq)`: of two stations racing to claim
//! the same transition, exactly one insert lands. `(user_id, token_nonce)`:
//! a token is granted at most once, whichever transition it was aimed at.

use async_trait::async_trait;
use common::error::DatabaseError;
use sqlx::{PgPool, Row, postgres::PgRow};
use tracing::info;
use uuid::Uuid;

use crate::{
    error::StoreError,
    models::{ScanEvent, UserId},
    scan_log::{RecordOutcome, ScanHistoryStore, ScanLog},
};

const SCHEMA: [&str; 4] = [
    r#"
    CREATE TABLE IF NOT EXISTS scan_events (
        id UUID PRIMARY KEY,
        user_id TEXT,
        scan_type TEXT NOT NULL CHECK (scan_type IN ('entry', 'exit')),
        scanned_at TIMESTAMPTZ NOT NULL,
        scanned_by TEXT NOT NULL,
        location TEXT NOT NULL,
        outcome TEXT NOT NULL CHECK (outcome IN ('granted', 'denied')),
        denial_reason TEXT,
        token_nonce UUID,
        transition_seq BIGINT,
        CHECK ((outcome = 'granted') = (transition_seq IS NOT NULL))
    )
    "#,
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS scan_events_user_transition
        ON scan_events (user_id, transition_seq)
        WHERE transition_seq IS NOT NULL
    "#,
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS scan_events_user_granted_nonce
        ON scan_events (user_id, token_nonce)
        WHERE transition_seq IS NOT NULL
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS scan_events_user_time
        ON scan_events (user_id, scanned_at DESC)
    "#,
];

const EVENT_COLUMNS: &str = "id, user_id, scan_type, scanned_at, scanned_by, location, \
                             outcome, denial_reason, token_nonce, transition_seq";

/// Scan log repository
#[derive(Clone)]
pub struct PgScanLog {
    pool: PgPool,
}

impl PgScanLog {
    /// Create a new scan log repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the table and indexes if they do not exist yet
    pub async fn init_schema(&self) -> Result<(), DatabaseError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(DatabaseError::Schema)?;
        }
        info!("Scan log schema ready");
        Ok(())
    }

    async fn fetch_one_where(
        &self,
        user_id: &UserId,
        condition: &str,
        order: &str,
    ) -> Result<Option<ScanEvent>, StoreError> {
        let sql = format!(
            "SELECT {} FROM scan_events WHERE user_id = $1 {} ORDER BY {} LIMIT 1",
            EVENT_COLUMNS, condition, order
        );
        let row = sqlx::query(&sql)
            .bind(user_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::Query)?;

        row.as_ref().map(event_from_row).transpose()
    }
}

impl PgScanLog {
    /// Tell which granted row blocked `event`'s insert
    ///
    /// Rows are never deleted, so the row that won the conflict is committed
    /// and visible by the time the insert returns.
    async fn classify_rejected_grant(&self, event: &ScanEvent) -> Result<RecordOutcome, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT
                EXISTS (SELECT 1 FROM scan_events
                        WHERE user_id = $1 AND transition_seq = $2) AS slot_taken,
                EXISTS (SELECT 1 FROM scan_events
                        WHERE user_id = $1 AND token_nonce = $3
                          AND transition_seq IS NOT NULL) AS nonce_taken
            "#,
        )
        .bind(event.user_id.as_ref().map(UserId::as_str))
        .bind(event.transition_seq)
        .bind(event.token_nonce)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::Query)?;

        let slot_taken: bool = row.try_get("slot_taken").map_err(DatabaseError::Query)?;
        let nonce_taken: bool = row.try_get("nonce_taken").map_err(DatabaseError::Query)?;
        match (slot_taken, nonce_taken) {
            (true, _) => Ok(RecordOutcome::Conflict),
            (false, true) => Ok(RecordOutcome::NonceConsumed),
            (false, false) => Err(corrupt(format!(
                "insert of scan event {} was rejected without a conflicting grant",
                event.id
            ))),
        }
    }
}

fn corrupt(detail: String) -> StoreError {
    DatabaseError::CorruptRow {
        table: "scan_events",
        detail,
    }
    .into()
}

fn event_from_row(row: &PgRow) -> Result<ScanEvent, StoreError> {
    let scan_type: String = row.try_get("scan_type").map_err(DatabaseError::Query)?;
    let outcome: String = row.try_get("outcome").map_err(DatabaseError::Query)?;
    let denial_reason: Option<String> = row.try_get("denial_reason").map_err(DatabaseError::Query)?;
    let user_id: Option<String> = row.try_get("user_id").map_err(DatabaseError::Query)?;

    Ok(ScanEvent {
        id: row.try_get("id").map_err(DatabaseError::Query)?,
        user_id: user_id.map(UserId::from_trusted),
        scan_type: scan_type.parse().map_err(corrupt)?,
        scanned_at: row.try_get("scanned_at").map_err(DatabaseError::Query)?,
        scanned_by: row.try_get("scanned_by").map_err(DatabaseError::Query)?,
        location: row.try_get("location").map_err(DatabaseError::Query)?,
        outcome: outcome.parse().map_err(corrupt)?,
        denial_reason: denial_reason
            .map(|reason| reason.parse())
            .transpose()
            .map_err(corrupt)?,
        token_nonce: row.try_get("token_nonce").map_err(DatabaseError::Query)?,
        transition_seq: row.try_get("transition_seq").map_err(DatabaseError::Query)?,
    })
}

#[async_trait]
impl ScanHistoryStore for PgScanLog {
    async fn latest_for(&self, user_id: &UserId) -> Result<Option<ScanEvent>, StoreError> {
        self.fetch_one_where(user_id, "", "scanned_at DESC, id DESC")
            .await
    }

    async fn latest_granted_for(
        &self,
        user_id: &UserId,
    ) -> Result<Option<ScanEvent>, StoreError> {
        self.fetch_one_where(
            user_id,
            "AND transition_seq IS NOT NULL",
            "transition_seq DESC",
        )
        .await
    }

    async fn nonce_consumed(&self, user_id: &UserId, nonce: Uuid) -> Result<bool, StoreError> {
        let consumed: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM scan_events
                WHERE user_id = $1
                  AND token_nonce = $2
                  AND transition_seq IS NOT NULL
            )
            "#,
        )
        .bind(user_id.as_str())
        .bind(nonce)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::Query)?;

        Ok(consumed)
    }

    async fn recent_for(
        &self,
        user_id: &UserId,
        limit: usize,
    ) -> Result<Vec<ScanEvent>, StoreError> {
        let sql = format!(
            "SELECT {} FROM scan_events WHERE user_id = $1 \
             ORDER BY scanned_at DESC, id DESC LIMIT $2",
            EVENT_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(user_id.as_str())
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await
            .map_err(DatabaseError::Query)?;

        rows.iter().map(event_from_row).collect()
    }
}

#[async_trait]
impl ScanLog for PgScanLog {
    async fn record(&self, event: &ScanEvent) -> Result<RecordOutcome, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO scan_events
                (id, user_id, scan_type, scanned_at, scanned_by, location,
                 outcome, denial_reason, token_nonce, transition_seq)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(event.id)
        .bind(event.user_id.as_ref().map(UserId::as_str))
        .bind(event.scan_type.as_str())
        .bind(event.scanned_at)
        .bind(&event.scanned_by)
        .bind(&event.location)
        .bind(event.outcome.as_str())
        .bind(event.denial_reason.map(|reason| reason.as_str()))
        .bind(event.token_nonce)
        .bind(event.transition_seq)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::Query)?;

        if result.rows_affected() == 1 {
            return Ok(RecordOutcome::Committed);
        }
        self.classify_rejected_grant(event).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DenialReason, ScanAttempt, ScanType};
    use chrono::Utc;
    use common::database::{DatabaseConfig, init_pool};

    async fn log() -> PgScanLog {
        let pool = init_pool(&DatabaseConfig::from_env().unwrap()).await.unwrap();
        let log = PgScanLog::new(pool);
        log.init_schema().await.unwrap();
        log
    }

    fn attempt(scan_type: ScanType) -> ScanAttempt {
        ScanAttempt {
            scan_type,
            scanned_at: Utc::now(),
            scanned_by: "op-pg".to_string(),
            location: "pg-gate".to_string(),
        }
    }

    #[tokio::test]
    #[ignore = "requires PostgreSQL"]
    async fn test_transition_slot_conflict() {
        let log = log().await;
        let user = UserId::parse(&format!("pg-{}", Uuid::new_v4())).unwrap();

        let first = ScanEvent::granted(&attempt(ScanType::Entry), user.clone(), Uuid::new_v4(), 1);
        let rival = ScanEvent::granted(&attempt(ScanType::Entry), user.clone(), Uuid::new_v4(), 1);
        assert_eq!(log.record(&first).await.unwrap(), RecordOutcome::Committed);
        assert_eq!(log.record(&rival).await.unwrap(), RecordOutcome::Conflict);

        let latest = log.latest_granted_for(&user).await.unwrap().unwrap();
        assert_eq!(latest.id, first.id);
        assert!(
            log.nonce_consumed(&user, first.token_nonce.unwrap())
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    #[ignore = "requires PostgreSQL"]
    async fn test_token_nonce_granted_once() {
        let log = log().await;
        let user = UserId::parse(&format!("pg-{}", Uuid::new_v4())).unwrap();
        let nonce = Uuid::new_v4();

        let entry = ScanEvent::granted(&attempt(ScanType::Entry), user.clone(), nonce, 1);
        let exit = ScanEvent::granted(&attempt(ScanType::Exit), user.clone(), nonce, 2);
        assert_eq!(log.record(&entry).await.unwrap(), RecordOutcome::Committed);
        assert_eq!(log.record(&exit).await.unwrap(), RecordOutcome::NonceConsumed);
        assert_eq!(
            log.latest_granted_for(&user).await.unwrap().map(|e| e.id),
            Some(entry.id)
        );
    }

    #[tokio::test]
    #[ignore = "requires PostgreSQL"]
    async fn test_denials_round_trip() {
        let log = log().await;
        let user = UserId::parse(&format!("pg-{}", Uuid::new_v4())).unwrap();
        let denied = ScanEvent::denied(
            &attempt(ScanType::Exit),
            Some(user.clone()),
            Some(Uuid::new_v4()),
            DenialReason::WrongScanTypeForState,
        );
        assert_eq!(log.record(&denied).await.unwrap(), RecordOutcome::Committed);

        let recent = log.recent_for(&user, 10).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].denial_reason, Some(DenialReason::WrongScanTypeForState));
        assert!(log.latest_granted_for(&user).await.unwrap().is_none());
    }
}
