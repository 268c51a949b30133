//! Inference stage consumer
//!
//! Consumes "audio ready" events: checks the idempotency gate, fetches the
//! labeled segments, embeds them against both references in fixed-size
//! batches, aggregates the verdict and persists the result. The message is
//! acknowledged only after the result write succeeds.
//!
//! Failure classes: missing upstream data (references or too few segments)
//! is a validation failure that retrying cannot fix (discard); transfer and
//! model errors are transient (requeue).

use crate::embedder::{cosine_similarity, read_wav_mono, Embedder};
use crate::scoring::{segment_verdict, VerdictPolicy};
use async_trait::async_trait;
use chrono::Utc;
use proctor_common::config::InferenceSettings;
use proctor_common::ledger::{HistoryDetails, StatusLedger};
use proctor_common::queue::{Delivery, MessageHandler, Outcome};
use proctor_common::retry::retry_transient;
use proctor_common::scratch::ScratchDir;
use proctor_common::storage::{key_file_name, ObjectStore};
use proctor_common::types::{
    AudioReadyMessage, InterviewResult, ProcessingStatus, SegmentScore, SegmentVerdict,
    REFERENCE_NATURAL_FILE, REFERENCE_READING_FILE, SEGMENT_FILE_PREFIX, STAGE_ML_INFERENCE,
};
use proctor_common::Error;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

/// Acting component recorded in history entries
const ACTOR: &str = "proctor-mi";

/// Why inference failed, which decides the retry policy
enum InferenceError {
    /// Upstream data is missing or malformed; retrying cannot help
    Validation(String),
    /// Transfer, storage or model failure; another attempt may succeed
    Transient(Error),
}

impl From<Error> for InferenceError {
    fn from(err: Error) -> Self {
        InferenceError::Transient(err)
    }
}

/// The inference consumer; all collaborators are injected
pub struct InferenceStage {
    ledger: StatusLedger,
    store: Arc<dyn ObjectStore>,
    embedder: Arc<dyn Embedder>,
    settings: InferenceSettings,
    scratch_root: PathBuf,
}

impl InferenceStage {
    pub fn new(
        ledger: StatusLedger,
        store: Arc<dyn ObjectStore>,
        embedder: Arc<dyn Embedder>,
        settings: InferenceSettings,
        scratch_root: PathBuf,
    ) -> Self {
        Self {
            ledger,
            store,
            embedder,
            settings,
            scratch_root,
        }
    }

    async fn process(
        &self,
        interview_id: &str,
        extracted_prefix: &str,
        started: Instant,
    ) -> Result<InterviewResult, InferenceError> {
        let scratch = ScratchDir::create(&self.scratch_root, interview_id)?;
        let budget = self.settings.max_transfer_wait_ms;

        let keys = retry_transient("list extracted audio", budget, || {
            self.store.list(extracted_prefix)
        })
        .await?;
        if keys.is_empty() {
            return Err(InferenceError::Validation(format!(
                "no extracted audio under prefix {}",
                extracted_prefix
            )));
        }

        for key in &keys {
            let local = scratch.path().join(key_file_name(key));
            retry_transient("download segment", budget, || {
                self.store.download(key, &local)
            })
            .await?;
        }
        tracing::info!(interview_id = %interview_id, file_count = keys.len(), "Downloaded extracted audio");

        let ref_natural = scratch.path().join(REFERENCE_NATURAL_FILE);
        let ref_reading = scratch.path().join(REFERENCE_READING_FILE);
        if !ref_natural.is_file() || !ref_reading.is_file() {
            return Err(InferenceError::Validation(format!(
                "missing reference audio files for interview {}",
                interview_id
            )));
        }

        let mut segments: Vec<(u32, PathBuf)> = keys
            .iter()
            .filter_map(|key| {
                let name = key_file_name(key);
                let number = name
                    .strip_prefix(SEGMENT_FILE_PREFIX)?
                    .strip_suffix(".wav")?
                    .parse::<u32>()
                    .ok()?;
                Some((number, scratch.path().join(name)))
            })
            .collect();
        segments.sort_by_key(|(number, _)| *number);

        if segments.len() < self.settings.min_expected_segments {
            return Err(InferenceError::Validation(format!(
                "only {} interview segment(s) present, expected at least {}",
                segments.len(),
                self.settings.min_expected_segments
            )));
        }

        // Embedding is CPU-bound; run the whole scoring pass off the runtime.
        // Segments are loaded one batch at a time to bound resident audio.
        let embedder = Arc::clone(&self.embedder);
        let batch_size = self.settings.embed_batch_size;
        let details = tokio::task::spawn_blocking(
            move || -> Result<Vec<SegmentScore>, Error> {
                let natural_ref = embedder.embed(&read_wav_mono(&ref_natural)?)?;
                let reading_ref = embedder.embed(&read_wav_mono(&ref_reading)?)?;

                let mut details = Vec::with_capacity(segments.len());
                for batch in segments.chunks(batch_size) {
                    let waveforms = batch
                        .iter()
                        .map(|(number, path)| read_wav_mono(path).map(|w| (*number, w)))
                        .collect::<Result<Vec<_>, Error>>()?;

                    for (segment_no, waveform) in waveforms {
                        let embedding = embedder.embed(&waveform)?;
                        let natural_cosine =
                            round4(cosine_similarity(&embedding, &natural_ref));
                        let reading_cosine =
                            round4(cosine_similarity(&embedding, &reading_ref));
                        details.push(SegmentScore {
                            segment_no,
                            natural_cosine,
                            reading_cosine,
                            verdict: segment_verdict(natural_cosine, reading_cosine),
                            processed_at: Utc::now().to_rfc3339(),
                        });
                    }
                }
                Ok(details)
            },
        )
        .await
        .map_err(|e| Error::Internal(format!("scoring task panicked: {}", e)))??;

        let total_segments = details.len() as u32;
        let cheating_segments = details
            .iter()
            .filter(|d| d.verdict == SegmentVerdict::Reading)
            .count() as u32;
        let policy = VerdictPolicy::from_settings(&self.settings);
        let final_verdict = policy.final_verdict(cheating_segments, total_segments);

        Ok(InterviewResult {
            interview_id: interview_id.to_string(),
            final_verdict,
            cheating_segments,
            total_segments,
            processed_at: Utc::now().to_rfc3339(),
            processing_time_seconds: round2(started.elapsed().as_secs_f64()),
            segments_details: details,
        })
    }

    async fn fail(&self, interview_id: &str, error: String, requeue: bool) -> Outcome {
        let recorded = self
            .ledger
            .append_history(
                interview_id,
                ProcessingStatus::Failed,
                STAGE_ML_INFERENCE,
                ACTOR,
                HistoryDetails::error(error.clone())
                    .with_details(json!({ "requeue": requeue })),
            )
            .await;
        if let Err(e) = recorded {
            tracing::error!(interview_id = %interview_id, error = %e, "Failed to record FAILED history entry");
        }
        tracing::warn!(interview_id = %interview_id, error = %error, requeue, "Inference failed");
        if requeue {
            Outcome::Requeue
        } else {
            Outcome::Discard
        }
    }
}

#[async_trait]
impl MessageHandler for InferenceStage {
    type Message = AudioReadyMessage;

    fn name(&self) -> &'static str {
        ACTOR
    }

    async fn handle(&self, message: AudioReadyMessage, delivery: &Delivery) -> Outcome {
        let interview_id = message.interview_id.clone();
        let extracted_prefix = message.extracted_prefix.clone();
        let started = Instant::now();

        tracing::info!(
            interview_id = %interview_id,
            extracted_prefix = %extracted_prefix,
            attempt = delivery.attempts,
            "Received audio ready event"
        );

        // Idempotency gate: a redelivered event for a finished interview
        // must not produce a second result write
        match self.ledger.get_status(&interview_id).await {
            Ok(Some(ProcessingStatus::Completed)) => {
                let recorded = self
                    .ledger
                    .append_history(
                        &interview_id,
                        ProcessingStatus::Completed,
                        STAGE_ML_INFERENCE,
                        ACTOR,
                        HistoryDetails::message("Already completed; skipping inference"),
                    )
                    .await;
                if let Err(e) = recorded {
                    tracing::error!(interview_id = %interview_id, error = %e, "Failed to record skip entry");
                }
                return Outcome::Ack;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!(interview_id = %interview_id, error = %e, "Ledger unavailable");
                return Outcome::Requeue;
            }
        }

        let recorded = self
            .ledger
            .append_history(
                &interview_id,
                ProcessingStatus::Processing,
                STAGE_ML_INFERENCE,
                ACTOR,
                HistoryDetails::message("Started embedding inference")
                    .with_details(json!({ "extracted_prefix": extracted_prefix })),
            )
            .await;
        if let Err(e) = recorded {
            tracing::error!(interview_id = %interview_id, error = %e, "Ledger unavailable");
            return Outcome::Requeue;
        }

        match self.process(&interview_id, &extracted_prefix, started).await {
            Ok(result) => {
                if let Err(e) = self.ledger.store_result(&interview_id, &result).await {
                    return self
                        .fail(&interview_id, format!("storing result failed: {}", e), true)
                        .await;
                }

                // derived artifacts are disposable once the verdict is stored;
                // a cleanup failure never fails the message
                if self.settings.delete_extracted_on_complete {
                    if let Err(e) = self.store.delete_prefix(&extracted_prefix).await {
                        tracing::warn!(interview_id = %interview_id, error = %e, "Extracted audio cleanup failed");
                    }
                }

                let recorded = self
                    .ledger
                    .append_history(
                        &interview_id,
                        ProcessingStatus::Completed,
                        STAGE_ML_INFERENCE,
                        ACTOR,
                        HistoryDetails::message("Inference completed and results stored")
                            .with_details(json!({
                                "final_verdict": result.final_verdict,
                                "total_segments": result.total_segments,
                                "processing_time_seconds": result.processing_time_seconds,
                            })),
                    )
                    .await;
                if let Err(e) = recorded {
                    tracing::error!(interview_id = %interview_id, error = %e, "Failed to record completion entry");
                }

                tracing::info!(
                    interview_id = %interview_id,
                    verdict = ?result.final_verdict,
                    total_segments = result.total_segments,
                    elapsed_s = result.processing_time_seconds,
                    "Interview scored"
                );
                Outcome::Ack
            }
            Err(InferenceError::Validation(msg)) => {
                self.fail(&interview_id, msg, false).await
            }
            Err(InferenceError::Transient(e)) => {
                self.fail(&interview_id, format!("inference failed: {}", e), true)
                    .await
            }
        }
    }
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rounding() {
        assert_eq!(round4(0.123456), 0.1235);
        assert_eq!(round2(12.346), 12.35);
        assert_eq!(round2(3.0), 3.0);
    }
}
