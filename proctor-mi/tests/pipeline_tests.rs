//! Inference stage and whole-pipeline integration tests
//!
//! Runs both stage consumers against one temporary database and bucket
//! directory, from the initial "video ready" event to the stored verdict.

mod helpers;

use helpers::audio_generator::{write_interview_wav, Stretch};
use proctor_common::config::{InferenceSettings, QueueSettings, SegmentationSettings};
use proctor_common::ledger::StatusLedger;
use proctor_common::queue::{run_consumer, ConsumeMode, QueueClient};
use proctor_common::storage::{FsObjectStore, ObjectStore};
use proctor_common::types::{
    AudioReadyMessage, FinalVerdict, InterviewResult, ProcessingStatus, SegmentVerdict,
    VideoReadyMessage,
};
use proctor_common::Result;
use proctor_mi::{Embedder, InferenceStage, SpectralEmbedder};
use proctor_sg::SegmentationStage;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

struct Fixture {
    root: tempfile::TempDir,
    ledger: StatusLedger,
    queue: QueueClient,
    store: Arc<FsObjectStore>,
    scratch: PathBuf,
}

async fn fixture() -> Fixture {
    let root = tempfile::tempdir().unwrap();
    let pool = proctor_common::db::init_db_pool(&root.path().join("proctor.db"))
        .await
        .unwrap();
    let ledger = StatusLedger::new(pool.clone());
    let queue = QueueClient::new(pool, QueueSettings::default());
    let store = Arc::new(FsObjectStore::new(root.path().join("bucket")));
    let scratch = root.path().join("scratch");
    std::fs::create_dir_all(&scratch).unwrap();

    Fixture {
        root,
        ledger,
        queue,
        store,
        scratch,
    }
}

impl Fixture {
    fn sg_stage(&self) -> SegmentationStage {
        let store: Arc<dyn ObjectStore> = self.store.clone();
        SegmentationStage::new(
            self.ledger.clone(),
            self.queue.clone(),
            store,
            SegmentationSettings::default(),
            self.scratch.clone(),
            "audio_ready".to_string(),
        )
    }

    fn mi_stage(&self, embedder: Arc<dyn Embedder>) -> InferenceStage {
        let store: Arc<dyn ObjectStore> = self.store.clone();
        InferenceStage::new(
            self.ledger.clone(),
            store,
            embedder,
            InferenceSettings::default(),
            self.scratch.clone(),
        )
    }

    async fn drain_sg(&self) {
        let stage = self.sg_stage();
        let cancel = CancellationToken::new();
        run_consumer(&self.queue, "video_ready", &stage, ConsumeMode::DrainOnce, &cancel)
            .await
            .unwrap();
    }

    async fn drain_mi(&self, embedder: Arc<dyn Embedder>) {
        let stage = self.mi_stage(embedder);
        let cancel = CancellationToken::new();
        run_consumer(&self.queue, "audio_ready", &stage, ConsumeMode::DrainOnce, &cancel)
            .await
            .unwrap();
    }

    async fn stored_result(&self, interview_id: &str) -> InterviewResult {
        let doc = self
            .ledger
            .get_interview(interview_id)
            .await
            .unwrap()
            .unwrap();
        serde_json::from_value(doc.results.expect("results present")).unwrap()
    }

    /// Upload a small labeled segment set directly, bypassing segmentation.
    async fn seed_extracted_audio(&self, interview_id: &str, segment_count: u32) -> String {
        let prefix = format!("extracted_audio/{}/", interview_id);
        let local = self.root.path().join("seed.wav");
        write_interview_wav(&local, &[Stretch::Voiced(1.0)]);

        self.store
            .upload(&local, &format!("{}reference_natural.wav", prefix))
            .await
            .unwrap();
        self.store
            .upload(&local, &format!("{}reference_reading.wav", prefix))
            .await
            .unwrap();
        for n in 1..=segment_count {
            self.store
                .upload(&local, &format!("{}segment_{}.wav", prefix, n))
                .await
                .unwrap();
        }
        prefix
    }
}

/// Embedder double that answers from a fixed script of vectors
struct ScriptedEmbedder {
    vectors: Mutex<Vec<Vec<f32>>>,
}

impl ScriptedEmbedder {
    /// Vectors are consumed in call order: natural reference, reading
    /// reference, then segments.
    fn new(vectors: Vec<Vec<f32>>) -> Self {
        Self {
            vectors: Mutex::new(vectors),
        }
    }
}

impl Embedder for ScriptedEmbedder {
    fn embed(&self, _samples: &[f32]) -> Result<Vec<f32>> {
        let mut vectors = self.vectors.lock().unwrap();
        assert!(!vectors.is_empty(), "scripted embedder ran out of vectors");
        Ok(vectors.remove(0))
    }
}

#[tokio::test]
async fn test_end_to_end_pipeline_completes_interview() {
    let fx = fixture().await;

    // 40+ second source: three >=15 s voiced spans split by >=3 s silences
    let local = fx.root.path().join("i1.wav");
    write_interview_wav(
        &local,
        &[
            Stretch::Voiced(15.0),
            Stretch::Silence(3.0),
            Stretch::Voiced(15.0),
            Stretch::Silence(3.0),
            Stretch::Voiced(15.0),
        ],
    );
    fx.store.upload(&local, "raw/i1.wav").await.unwrap();

    fx.queue
        .publish(
            "video_ready",
            &VideoReadyMessage {
                interview_id: "i1".to_string(),
                source_path: "raw/i1.wav".to_string(),
            },
        )
        .await
        .unwrap();

    fx.drain_sg().await;
    assert_eq!(
        fx.store.list("extracted_audio/i1/").await.unwrap(),
        vec![
            "extracted_audio/i1/reference_natural.wav",
            "extracted_audio/i1/reference_reading.wav",
            "extracted_audio/i1/segment_1.wav",
        ]
    );

    fx.drain_mi(Arc::new(SpectralEmbedder)).await;

    // both queues empty, ledger terminal
    assert_eq!(fx.queue.depth("video_ready").await.unwrap(), 0);
    assert_eq!(fx.queue.depth("audio_ready").await.unwrap(), 0);

    let doc = fx.ledger.get_interview("i1").await.unwrap().unwrap();
    assert_eq!(doc.status, ProcessingStatus::Completed);
    assert!(doc.completed_at.is_some());

    let result = fx.stored_result("i1").await;
    assert_eq!(result.total_segments, 1);
    assert_eq!(result.segments_details.len(), 1);
    assert_eq!(result.segments_details[0].segment_no, 1);
    assert!(result.processing_time_seconds >= 0.0);

    // full audit trail across both stages
    let stages: Vec<&str> = doc.history.iter().map(|h| h.stage.as_str()).collect();
    assert!(stages.contains(&"video_conversion"));
    assert!(stages.contains(&"ml_inference"));
}

#[tokio::test]
async fn test_redelivered_event_after_completion_is_skipped() {
    let fx = fixture().await;
    let prefix = fx.seed_extracted_audio("i2", 1).await;

    let event = AudioReadyMessage {
        interview_id: "i2".to_string(),
        extracted_prefix: prefix,
    };
    fx.queue.publish("audio_ready", &event).await.unwrap();
    fx.drain_mi(Arc::new(SpectralEmbedder)).await;

    let first = fx.stored_result("i2").await;
    let history_len = fx
        .ledger
        .get_interview("i2")
        .await
        .unwrap()
        .unwrap()
        .history
        .len();

    // simulate redelivery after a crash just before the ack
    fx.queue.publish("audio_ready", &event).await.unwrap();
    fx.drain_mi(Arc::new(SpectralEmbedder)).await;

    let doc = fx.ledger.get_interview("i2").await.unwrap().unwrap();
    assert_eq!(doc.status, ProcessingStatus::Completed);

    // exactly one result write: payload identical, including timestamps
    let second = fx.stored_result("i2").await;
    assert_eq!(
        serde_json::to_value(&first).unwrap(),
        serde_json::to_value(&second).unwrap()
    );

    // second invocation contributed only the skip entry
    assert_eq!(doc.history.len(), history_len + 1);
    let skip = doc.history.last().unwrap();
    assert!(skip.message.as_deref().unwrap().contains("skipping"));
    assert_eq!(fx.queue.depth("audio_ready").await.unwrap(), 0);
}

#[tokio::test]
async fn test_missing_upstream_files_are_discarded_not_requeued() {
    let fx = fixture().await;

    fx.queue
        .publish(
            "audio_ready",
            &AudioReadyMessage {
                interview_id: "i3".to_string(),
                extracted_prefix: "extracted_audio/i3/".to_string(),
            },
        )
        .await
        .unwrap();

    fx.drain_mi(Arc::new(SpectralEmbedder)).await;

    // validation failure: gone from the queue after a single delivery
    assert_eq!(fx.queue.depth("audio_ready").await.unwrap(), 0);
    let doc = fx.ledger.get_interview("i3").await.unwrap().unwrap();
    assert_eq!(doc.status, ProcessingStatus::Failed);
    assert!(doc
        .history
        .last()
        .unwrap()
        .error
        .as_deref()
        .unwrap()
        .contains("no extracted audio"));
}

#[tokio::test]
async fn test_missing_references_fail_validation() {
    let fx = fixture().await;
    let prefix = "extracted_audio/i4/".to_string();
    let local = fx.root.path().join("seg.wav");
    write_interview_wav(&local, &[Stretch::Voiced(1.0)]);
    fx.store
        .upload(&local, "extracted_audio/i4/segment_1.wav")
        .await
        .unwrap();

    fx.queue
        .publish(
            "audio_ready",
            &AudioReadyMessage {
                interview_id: "i4".to_string(),
                extracted_prefix: prefix,
            },
        )
        .await
        .unwrap();

    fx.drain_mi(Arc::new(SpectralEmbedder)).await;

    assert_eq!(fx.queue.depth("audio_ready").await.unwrap(), 0);
    let doc = fx.ledger.get_interview("i4").await.unwrap().unwrap();
    assert_eq!(doc.status, ProcessingStatus::Failed);
    assert!(doc
        .history
        .last()
        .unwrap()
        .error
        .as_deref()
        .unwrap()
        .contains("reference"));
}

#[tokio::test]
async fn test_fixed_embeddings_determine_verdict() {
    // natural-leaning segment: cosine to natural ref 1.0, to reading ref ~0
    let fx = fixture().await;
    let prefix = fx.seed_extracted_audio("i5", 1).await;
    fx.queue
        .publish(
            "audio_ready",
            &AudioReadyMessage {
                interview_id: "i5".to_string(),
                extracted_prefix: prefix,
            },
        )
        .await
        .unwrap();

    let embedder = Arc::new(ScriptedEmbedder::new(vec![
        vec![1.0, 0.0], // natural reference
        vec![0.0, 1.0], // reading reference
        vec![1.0, 0.1], // segment: much closer to natural
    ]));
    fx.drain_mi(embedder).await;

    let result = fx.stored_result("i5").await;
    assert_eq!(result.segments_details[0].verdict, SegmentVerdict::Natural);
    assert_eq!(result.final_verdict, FinalVerdict::NoCheatingDetected);
    assert_eq!(result.cheating_segments, 0);

    // swapped similarities flip the verdict
    let fx = fixture().await;
    let prefix = fx.seed_extracted_audio("i6", 1).await;
    fx.queue
        .publish(
            "audio_ready",
            &AudioReadyMessage {
                interview_id: "i6".to_string(),
                extracted_prefix: prefix,
            },
        )
        .await
        .unwrap();

    let embedder = Arc::new(ScriptedEmbedder::new(vec![
        vec![1.0, 0.0],
        vec![0.0, 1.0],
        vec![0.1, 1.0], // segment: much closer to reading
    ]));
    fx.drain_mi(embedder).await;

    let result = fx.stored_result("i6").await;
    assert_eq!(result.segments_details[0].verdict, SegmentVerdict::Reading);
    assert_eq!(result.cheating_segments, 1);
    // 1 of 1 reading exceeds the 20% fraction
    assert_eq!(result.final_verdict, FinalVerdict::CheatingDetected);
}

#[tokio::test]
async fn test_batched_scoring_covers_all_segments_in_order() {
    // 7 segments with batch size 3 exercises a ragged final batch
    let fx = fixture().await;
    let prefix = fx.seed_extracted_audio("i7", 7).await;
    fx.queue
        .publish(
            "audio_ready",
            &AudioReadyMessage {
                interview_id: "i7".to_string(),
                extracted_prefix: prefix,
            },
        )
        .await
        .unwrap();

    fx.drain_mi(Arc::new(SpectralEmbedder)).await;

    let result = fx.stored_result("i7").await;
    assert_eq!(result.total_segments, 7);
    let numbers: Vec<u32> = result
        .segments_details
        .iter()
        .map(|d| d.segment_no)
        .collect();
    assert_eq!(numbers, vec![1, 2, 3, 4, 5, 6, 7]);
}
