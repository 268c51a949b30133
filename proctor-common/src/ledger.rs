//! Status ledger: per-interview status plus append-only transition history
//!
//! Single source of truth for "where is interview X" and "what happened to
//! it". Every mutation is one transaction over the interview row and its
//! history table, so concurrent consumers never race a read-modify-write.
//! `COMPLETED` is absorbing: the guarded upsert refuses to move a completed
//! interview anywhere else, while the history entry is still appended.

use crate::types::{InterviewResult, ProcessingStatus};
use crate::{Error, Result};
use chrono::Utc;
use serde::Serialize;
use sqlx::SqlitePool;

/// Optional context attached to a history entry
#[derive(Debug, Clone, Default)]
pub struct HistoryDetails {
    pub message: Option<String>,
    pub error: Option<String>,
    /// Stage-specific fields (source path, extracted prefix, ...)
    pub details: Option<serde_json::Value>,
}

impl HistoryDetails {
    pub fn message(text: impl Into<String>) -> Self {
        Self {
            message: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            error: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// One immutable transition record
#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    pub ts: String,
    pub status: ProcessingStatus,
    pub stage: String,
    pub actor: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempt: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Full interview document: current state plus the audit trail
#[derive(Debug, Clone, Serialize)]
pub struct InterviewDoc {
    pub interview_id: String,
    pub status: ProcessingStatus,
    pub processing_attempts: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
    pub last_updated: String,
    pub history: Vec<HistoryEntry>,
}

/// Ledger handle; cheap to clone, shares the pool
#[derive(Clone)]
pub struct StatusLedger {
    db: SqlitePool,
}

impl StatusLedger {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Point lookup used as the idempotency gate before expensive work.
    pub async fn get_status(&self, interview_id: &str) -> Result<Option<ProcessingStatus>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT status FROM interviews WHERE id = ?")
                .bind(interview_id)
                .fetch_optional(&self.db)
                .await?;

        match row {
            None => Ok(None),
            Some((raw,)) => ProcessingStatus::parse(&raw)
                .map(Some)
                .ok_or_else(|| Error::Internal(format!("unknown status in ledger: {}", raw))),
        }
    }

    /// Atomically set the status and append one history entry (upsert).
    ///
    /// `PROCESSING` and `FAILED` increment `processing_attempts` in the same
    /// statement. A `COMPLETED` interview keeps its status; the requested
    /// transition is still recorded in history so the audit trail stays a
    /// superset of what the queue shows. Returns the effective status.
    pub async fn append_history(
        &self,
        interview_id: &str,
        status: ProcessingStatus,
        stage: &str,
        actor: &str,
        details: HistoryDetails,
    ) -> Result<ProcessingStatus> {
        let now = Utc::now().to_rfc3339();
        let mut tx = self.db.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO interviews (id, status, processing_attempts, last_updated)
            VALUES (?1, ?2, CASE WHEN ?2 IN ('PROCESSING', 'FAILED') THEN 1 ELSE 0 END, ?3)
            ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                processing_attempts = interviews.processing_attempts
                    + CASE WHEN excluded.status IN ('PROCESSING', 'FAILED') THEN 1 ELSE 0 END,
                last_updated = excluded.last_updated
            WHERE interviews.status != 'COMPLETED'
            "#,
        )
        .bind(interview_id)
        .bind(status.as_str())
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        let (effective_raw, attempts): (String, i64) =
            sqlx::query_as("SELECT status, processing_attempts FROM interviews WHERE id = ?")
                .bind(interview_id)
                .fetch_one(&mut *tx)
                .await?;

        let details_json = details
            .details
            .as_ref()
            .map(|v| serde_json::to_string(v))
            .transpose()?;

        sqlx::query(
            r#"
            INSERT INTO interview_history
                (interview_id, ts, status, stage, actor, message, error, attempt, details)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(interview_id)
        .bind(&now)
        .bind(status.as_str())
        .bind(stage)
        .bind(actor)
        .bind(&details.message)
        .bind(&details.error)
        .bind(attempts)
        .bind(&details_json)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        let effective = ProcessingStatus::parse(&effective_raw)
            .ok_or_else(|| Error::Internal(format!("unknown status in ledger: {}", effective_raw)))?;

        tracing::debug!(
            interview_id,
            requested = %status,
            effective = %effective,
            attempts,
            stage,
            "Ledger updated"
        );

        Ok(effective)
    }

    /// Persist the final scoring payload and mark the interview `COMPLETED`.
    ///
    /// Guarded: an already-completed interview is never overwritten. Returns
    /// `false` when the write was absorbed by the guard.
    pub async fn store_result(&self, interview_id: &str, result: &InterviewResult) -> Result<bool> {
        let now = Utc::now().to_rfc3339();
        let results_json = serde_json::to_string(result)?;

        let outcome = sqlx::query(
            r#"
            INSERT INTO interviews (id, status, processing_attempts, results, completed_at, last_updated)
            VALUES (?1, 'COMPLETED', 0, ?2, ?3, ?3)
            ON CONFLICT(id) DO UPDATE SET
                status = 'COMPLETED',
                results = excluded.results,
                completed_at = excluded.completed_at,
                last_updated = excluded.last_updated
            WHERE interviews.status != 'COMPLETED'
            "#,
        )
        .bind(interview_id)
        .bind(&results_json)
        .bind(&now)
        .execute(&self.db)
        .await?;

        let stored = outcome.rows_affected() > 0;
        if stored {
            tracing::info!(interview_id, "Result stored, interview COMPLETED");
        } else {
            tracing::warn!(interview_id, "Result write skipped, interview already COMPLETED");
        }
        Ok(stored)
    }

    /// Full document for the read-only status query.
    pub async fn get_interview(&self, interview_id: &str) -> Result<Option<InterviewDoc>> {
        let row: Option<(String, i64, Option<String>, Option<String>, String)> = sqlx::query_as(
            "SELECT status, processing_attempts, results, completed_at, last_updated
             FROM interviews WHERE id = ?",
        )
        .bind(interview_id)
        .fetch_optional(&self.db)
        .await?;

        let Some((status_raw, attempts, results_raw, completed_at, last_updated)) = row else {
            return Ok(None);
        };

        let status = ProcessingStatus::parse(&status_raw)
            .ok_or_else(|| Error::Internal(format!("unknown status in ledger: {}", status_raw)))?;
        let results = results_raw
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?;

        let rows: Vec<(
            String,
            String,
            String,
            String,
            Option<String>,
            Option<String>,
            Option<i64>,
            Option<String>,
        )> = sqlx::query_as(
            "SELECT ts, status, stage, actor, message, error, attempt, details
             FROM interview_history WHERE interview_id = ? ORDER BY id",
        )
        .bind(interview_id)
        .fetch_all(&self.db)
        .await?;

        let mut history = Vec::with_capacity(rows.len());
        for (ts, raw, stage, actor, message, error, attempt, details_raw) in rows {
            let entry_status = ProcessingStatus::parse(&raw)
                .ok_or_else(|| Error::Internal(format!("unknown status in history: {}", raw)))?;
            let details = details_raw.as_deref().map(serde_json::from_str).transpose()?;
            history.push(HistoryEntry {
                ts,
                status: entry_status,
                stage,
                actor,
                message,
                error,
                attempt,
                details,
            });
        }

        Ok(Some(InterviewDoc {
            interview_id: interview_id.to_string(),
            status,
            processing_attempts: attempts,
            results,
            completed_at,
            last_updated,
            history,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_memory_pool;
    use crate::types::FinalVerdict;

    fn sample_result(id: &str) -> InterviewResult {
        InterviewResult {
            interview_id: id.to_string(),
            final_verdict: FinalVerdict::NoCheatingDetected,
            cheating_segments: 0,
            total_segments: 1,
            processed_at: Utc::now().to_rfc3339(),
            processing_time_seconds: 1.5,
            segments_details: vec![],
        }
    }

    async fn ledger() -> StatusLedger {
        StatusLedger::new(init_memory_pool().await.unwrap())
    }

    #[tokio::test]
    async fn test_upsert_creates_document() {
        let ledger = ledger().await;
        assert_eq!(ledger.get_status("i1").await.unwrap(), None);

        let effective = ledger
            .append_history("i1", ProcessingStatus::Queued, "ingest", "test", HistoryDetails::default())
            .await
            .unwrap();
        assert_eq!(effective, ProcessingStatus::Queued);
        assert_eq!(
            ledger.get_status("i1").await.unwrap(),
            Some(ProcessingStatus::Queued)
        );
    }

    #[tokio::test]
    async fn test_processing_and_failed_count_attempts() {
        let ledger = ledger().await;
        for status in [
            ProcessingStatus::Processing,
            ProcessingStatus::Failed,
            ProcessingStatus::Processing,
        ] {
            ledger
                .append_history("i1", status, "video_conversion", "test", HistoryDetails::default())
                .await
                .unwrap();
        }
        let doc = ledger.get_interview("i1").await.unwrap().unwrap();
        assert_eq!(doc.processing_attempts, 3);
        assert_eq!(doc.history.len(), 3);

        // A non-attempt transition leaves the counter alone
        ledger
            .append_history(
                "i1",
                ProcessingStatus::AudioExtractedQueued,
                "video_conversion",
                "test",
                HistoryDetails::default(),
            )
            .await
            .unwrap();
        let doc = ledger.get_interview("i1").await.unwrap().unwrap();
        assert_eq!(doc.processing_attempts, 3);
    }

    #[tokio::test]
    async fn test_completed_is_absorbing() {
        let ledger = ledger().await;
        ledger.store_result("i1", &sample_result("i1")).await.unwrap();

        let effective = ledger
            .append_history(
                "i1",
                ProcessingStatus::Processing,
                "ml_inference",
                "test",
                HistoryDetails::message("redelivered"),
            )
            .await
            .unwrap();
        assert_eq!(effective, ProcessingStatus::Completed);

        // history still records the attempted transition
        let doc = ledger.get_interview("i1").await.unwrap().unwrap();
        assert_eq!(doc.status, ProcessingStatus::Completed);
        assert_eq!(doc.history.last().unwrap().status, ProcessingStatus::Processing);
        // the absorbed transition did not bump the attempt counter
        assert_eq!(doc.processing_attempts, 0);
    }

    #[tokio::test]
    async fn test_store_result_never_overwrites() {
        let ledger = ledger().await;
        assert!(ledger.store_result("i1", &sample_result("i1")).await.unwrap());

        let mut second = sample_result("i1");
        second.final_verdict = FinalVerdict::CheatingDetected;
        assert!(!ledger.store_result("i1", &second).await.unwrap());

        let doc = ledger.get_interview("i1").await.unwrap().unwrap();
        let stored: InterviewResult =
            serde_json::from_value(doc.results.unwrap()).unwrap();
        assert_eq!(stored.final_verdict, FinalVerdict::NoCheatingDetected);
        assert!(doc.completed_at.is_some());
    }
}
