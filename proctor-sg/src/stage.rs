//! Segmentation stage consumer
//!
//! Consumes "video ready" events: fetches the source recording, extracts and
//! resamples its audio track, splits it on silence, labels the spans, uploads
//! them as WAV segments and republishes an "audio ready" event. The source
//! message is acknowledged only after the publish succeeds.
//!
//! Failure classes: fewer than two usable spans means the input has no
//! reference structure and retrying cannot help (discard); everything else
//! is treated as transient (requeue). The operation is re-entrant because
//! scratch files are recreated from the source on every attempt.

use crate::audio::{decode_audio_track, resample_mono, write_wav_mono16, TARGET_SAMPLE_RATE};
use crate::labeling::label_spans;
use crate::silence::SilenceDetector;
use async_trait::async_trait;
use proctor_common::config::SegmentationSettings;
use proctor_common::ledger::{HistoryDetails, StatusLedger};
use proctor_common::queue::{Delivery, MessageHandler, Outcome, QueueClient};
use proctor_common::scratch::ScratchDir;
use proctor_common::storage::{key_file_name, ObjectStore};
use proctor_common::types::{
    AudioReadyMessage, ProcessingStatus, VideoReadyMessage, STAGE_VIDEO_CONVERSION,
};
use proctor_common::Error;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

/// Acting component recorded in history entries
const ACTOR: &str = "proctor-sg";

/// Why segmentation failed, which decides the retry policy
enum SegmentationError {
    /// Too few usable spans; the input has no reference structure
    Insufficient { found: usize },
    /// I/O, decode or ledger failure; another attempt may succeed
    Transient(Error),
}

impl From<Error> for SegmentationError {
    fn from(err: Error) -> Self {
        SegmentationError::Transient(err)
    }
}

struct ExtractedAudio {
    prefix: String,
    file_count: usize,
}

/// The segmentation consumer; all collaborators are injected
pub struct SegmentationStage {
    ledger: StatusLedger,
    queue: QueueClient,
    store: Arc<dyn ObjectStore>,
    settings: SegmentationSettings,
    scratch_root: PathBuf,
    audio_ready_queue: String,
}

impl SegmentationStage {
    pub fn new(
        ledger: StatusLedger,
        queue: QueueClient,
        store: Arc<dyn ObjectStore>,
        settings: SegmentationSettings,
        scratch_root: PathBuf,
        audio_ready_queue: String,
    ) -> Self {
        Self {
            ledger,
            queue,
            store,
            settings,
            scratch_root,
            audio_ready_queue,
        }
    }

    async fn process(
        &self,
        interview_id: &str,
        source_path: &str,
    ) -> Result<ExtractedAudio, SegmentationError> {
        let scratch = ScratchDir::create(&self.scratch_root, interview_id)?;
        let local_source = scratch.path().join(key_file_name(source_path));

        self.store.download(source_path, &local_source).await?;
        self.ledger
            .append_history(
                interview_id,
                ProcessingStatus::VideoDownloaded,
                STAGE_VIDEO_CONVERSION,
                ACTOR,
                HistoryDetails::message("Source video fetched to scratch")
                    .with_details(json!({ "source_path": source_path })),
            )
            .await?;

        // Decode, resample, split and write WAVs off the async runtime
        let settings = self.settings.clone();
        let scratch_dir = scratch.path().to_path_buf();
        let written = tokio::task::spawn_blocking(move || -> Result<Vec<(String, PathBuf)>, Error> {
            let decoded = decode_audio_track(&local_source)?;
            let samples =
                resample_mono(decoded.samples, decoded.sample_rate, TARGET_SAMPLE_RATE)?;

            let detector = SilenceDetector::new()
                .with_threshold_db(settings.silence_threshold_db)
                .map_err(|e| Error::Audio(e.to_string()))?
                .with_min_silence(settings.min_silence_s)
                .map_err(|e| Error::Audio(e.to_string()))?;
            let spans = detector
                .detect_voiced(&samples, TARGET_SAMPLE_RATE as usize)
                .map_err(|e| Error::Audio(e.to_string()))?;

            let planned = label_spans(&spans, settings.min_segment_s);

            let mut written = Vec::with_capacity(planned.len());
            for segment in &planned {
                let start = (segment.start_seconds * TARGET_SAMPLE_RATE as f32) as usize;
                let end = ((segment.end_seconds * TARGET_SAMPLE_RATE as f32) as usize)
                    .min(samples.len());
                let local = scratch_dir.join(&segment.file_name);
                write_wav_mono16(&local, &samples[start.min(end)..end], TARGET_SAMPLE_RATE)?;
                written.push((segment.file_name.clone(), local));
            }
            Ok(written)
        })
        .await
        .map_err(|e| Error::Internal(format!("segmentation task panicked: {}", e)))??;

        if written.len() < 2 {
            return Err(SegmentationError::Insufficient {
                found: written.len(),
            });
        }

        let prefix = format!("{}/{}/", self.settings.audio_root, interview_id);
        for (file_name, local) in &written {
            let remote = format!("{}{}", prefix, file_name);
            self.store.upload(local, &remote).await?;
        }

        tracing::info!(
            interview_id = %interview_id,
            prefix = %prefix,
            file_count = written.len(),
            "Uploaded labeled audio segments"
        );

        Ok(ExtractedAudio {
            prefix,
            file_count: written.len(),
        })
    }

    /// FAILED entry plus the outcome; requeue decides the failure class.
    async fn fail(&self, interview_id: &str, error: String, requeue: bool) -> Outcome {
        let recorded = self
            .ledger
            .append_history(
                interview_id,
                ProcessingStatus::Failed,
                STAGE_VIDEO_CONVERSION,
                ACTOR,
                HistoryDetails::error(error.clone())
                    .with_details(json!({ "requeue": requeue })),
            )
            .await;
        if let Err(e) = recorded {
            tracing::error!(interview_id = %interview_id, error = %e, "Failed to record FAILED history entry");
        }
        tracing::warn!(interview_id = %interview_id, error = %error, requeue, "Segmentation failed");
        if requeue {
            Outcome::Requeue
        } else {
            Outcome::Discard
        }
    }
}

#[async_trait]
impl MessageHandler for SegmentationStage {
    type Message = VideoReadyMessage;

    fn name(&self) -> &'static str {
        ACTOR
    }

    async fn handle(&self, message: VideoReadyMessage, delivery: &Delivery) -> Outcome {
        let interview_id = message.interview_id.clone();
        // keys may arrive with Windows separators from the upload front door
        let source_path = message.source_path.replace('\\', "/");
        let started = Instant::now();

        tracing::info!(
            interview_id = %interview_id,
            source_path = %source_path,
            attempt = delivery.attempts,
            "Received video ready event"
        );

        // Idempotency gate: completed interviews are never reprocessed
        match self.ledger.get_status(&interview_id).await {
            Ok(Some(ProcessingStatus::Completed)) => {
                let recorded = self
                    .ledger
                    .append_history(
                        &interview_id,
                        ProcessingStatus::Completed,
                        STAGE_VIDEO_CONVERSION,
                        ACTOR,
                        HistoryDetails::message("Already completed; skipping segmentation"),
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
                STAGE_VIDEO_CONVERSION,
                ACTOR,
                HistoryDetails::message("Started video to audio conversion")
                    .with_details(json!({ "source_path": source_path })),
            )
            .await;
        if let Err(e) = recorded {
            tracing::error!(interview_id = %interview_id, error = %e, "Ledger unavailable");
            return Outcome::Requeue;
        }

        match self.process(&interview_id, &source_path).await {
            Ok(extracted) => {
                let event = AudioReadyMessage {
                    interview_id: interview_id.clone(),
                    extracted_prefix: extracted.prefix.clone(),
                };
                if let Err(e) = self.queue.publish(&self.audio_ready_queue, &event).await {
                    return self
                        .fail(
                            &interview_id,
                            format!("publishing audio ready event failed: {}", e),
                            true,
                        )
                        .await;
                }

                let recorded = self
                    .ledger
                    .append_history(
                        &interview_id,
                        ProcessingStatus::AudioExtractedQueued,
                        STAGE_VIDEO_CONVERSION,
                        ACTOR,
                        HistoryDetails::message("Video conversion completed and segments uploaded")
                            .with_details(json!({
                                "extracted_prefix": extracted.prefix,
                                "file_count": extracted.file_count,
                                "elapsed_ms": started.elapsed().as_millis() as u64,
                            })),
                    )
                    .await;
                if let Err(e) = recorded {
                    // the hand-off already happened; requeueing now would only
                    // duplicate uploads and the publish
                    tracing::error!(interview_id = %interview_id, error = %e, "Failed to record queued entry");
                }
                Outcome::Ack
            }
            Err(SegmentationError::Insufficient { found }) => {
                self.fail(
                    &interview_id,
                    format!(
                        "conversion produced {} span(s); need both references",
                        found
                    ),
                    false,
                )
                .await
            }
            Err(SegmentationError::Transient(e)) => {
                self.fail(&interview_id, format!("video conversion failed: {}", e), true)
                    .await
            }
        }
    }
}
