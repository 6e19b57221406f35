//! End-to-end orchestration tests over mock collaborators

#![allow(clippy::float_cmp)]

mod common;

use chunkscribe_transcriber::mock::{MockBlobStore, MockTranscoder, Script};
use chunkscribe_transcriber::types::AudioEncoding;
use chunkscribe_transcriber::{JobId, JobKind, JobState, TranscriptionError};
use common::{HarnessBuilder, TestHarness};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

#[tokio::test]
async fn test_long_upload_is_chunked_and_assembled_in_order() {
    let h = HarnessBuilder::new().build();
    let id = JobId::new();
    let path = h.upload(id, 2400.0);
    for (index, text) in ["a", "b", "c"].iter().enumerate() {
        h.provider.transcript_for(TestHarness::chunk_blob(id, index), *text);
    }

    let ticket = h.orchestrator.submit_file(id, path).await.unwrap();
    assert_eq!(ticket.kind, JobKind::Chunked);
    assert_eq!(ticket.estimated_duration_minutes(), 40.0);

    h.wait_terminal(id).await;
    let view = h.orchestrator.status(id).await.unwrap();
    assert_eq!(view.status, JobState::Done);
    assert_eq!(view.progress, 100.0);
    assert_eq!(view.transcript.as_deref(), Some("a b c"));
    assert_eq!(view.error, None);

    let windows = h
        .transcoder
        .requests()
        .iter()
        .filter_map(|request| request.window)
        .map(|window| (window.index, window.start, window.end))
        .collect::<Vec<_>>();
    assert_eq!(
        windows,
        vec![(0, 0.0, 900.0), (1, 900.0, 1800.0), (2, 1800.0, 2400.0)]
    );

    assert_eq!(h.handoff.published(), vec!["a b c".to_string()]);
    assert_eq!(h.orchestrator.latest_transcript().as_deref(), Some("a b c"));
}

#[tokio::test]
async fn test_short_upload_runs_single_pass() {
    let h = HarnessBuilder::new().build();
    let id = JobId::new();
    let path = h.upload(id, 300.0);

    let ticket = h.orchestrator.submit_file(id, path).await.unwrap();
    assert_eq!(ticket.kind, JobKind::Single);

    let job = h.wait_terminal(id).await;
    assert_eq!(job.state, JobState::Done);
    assert!(job.chunks.is_empty());

    let view = h.orchestrator.status(id).await.unwrap();
    assert_eq!(view.progress, 100.0);
    assert_eq!(view.transcript.as_deref(), Some("hello world"));
    assert_eq!(view.error, None);

    let submissions = h.provider.submissions();
    assert_eq!(submissions.len(), 1);
    assert_eq!(submissions[0].0, format!("{id}.flac"));
    assert_eq!(submissions[0].1.encoding, AudioEncoding::Flac);
    assert_eq!(submissions[0].1.diarization_speaker_count, Some(2));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_completion_order_does_not_change_transcript() {
    let h = HarnessBuilder::new().build();
    let id = JobId::new();
    let path = h.upload(id, 2400.0);

    let delays = [80, 40, 0];
    for (index, text) in ["first", "second", "third"].iter().enumerate() {
        let blob = TestHarness::chunk_blob(id, index);
        h.provider.transcript_for(blob.clone(), *text);
        h.provider.delay_for(blob, Duration::from_millis(delays[index]));
    }

    h.orchestrator.submit_file(id, path).await.unwrap();
    let job = h.wait_terminal(id).await;

    assert_eq!(job.state, JobState::Done);
    assert_eq!(job.transcript.as_deref(), Some("first second third"));
}

#[tokio::test]
async fn test_failed_chunk_fails_job_but_keeps_partial_transcript() {
    let h = HarnessBuilder::new().build();
    let id = JobId::new();
    let path = h.upload(id, 2400.0);
    h.provider.transcript_for(TestHarness::chunk_blob(id, 0), "a");
    h.provider.transcript_for(TestHarness::chunk_blob(id, 1), "b");
    h.provider
        .script(TestHarness::chunk_blob(id, 2), Script::Fail("audio too noisy".into()));

    h.orchestrator.submit_file(id, path).await.unwrap();
    let job = h.wait_terminal(id).await;
    assert_eq!(job.state, JobState::Error);

    let view = h.orchestrator.status(id).await.unwrap();
    assert_eq!(view.status, JobState::Error);
    assert_eq!(view.transcript.as_deref(), Some("a b"));
    let error = view.error.unwrap();
    assert!(error.contains("1 chunk(s) failed"), "{error}");
    assert!(error.contains("Chunk 2: Error"), "{error}");
    assert!(error.contains("audio too noisy"), "{error}");

    let counts = view.chunks.unwrap();
    assert_eq!((counts.total, counts.done, counts.failed), (3, 2, 1));
    assert!(h.handoff.published().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_polls_publish_once() {
    let h = HarnessBuilder::new()
        .with_provider_delay(Duration::from_millis(20))
        .build();
    let id = JobId::new();
    let path = h.upload(id, 2400.0);
    h.orchestrator.submit_file(id, path).await.unwrap();

    let stop = Arc::new(AtomicBool::new(false));
    let pollers = (0..8)
        .map(|_| {
            let orchestrator = Arc::clone(&h.orchestrator);
            let stop = Arc::clone(&stop);
            tokio::spawn(async move {
                while !stop.load(Ordering::SeqCst) {
                    let view = orchestrator.status(id).await.unwrap();
                    if view.status == JobState::Done {
                        break;
                    }
                    tokio::time::sleep(Duration::from_millis(1)).await;
                }
            })
        })
        .collect::<Vec<_>>();

    h.wait_terminal(id).await;
    stop.store(true, Ordering::SeqCst);
    for poller in pollers {
        poller.await.unwrap();
    }

    assert_eq!(h.handoff.published().len(), 1);
    let view = h.orchestrator.status(id).await.unwrap();
    assert_eq!(view.status, JobState::Done);
    assert_eq!(h.handoff.published().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_chunk_concurrency_ceiling() {
    let h = HarnessBuilder::new()
        .with_concurrency(5)
        .with_provider_delay(Duration::from_millis(30))
        .build();
    let id = JobId::new();
    let path = h.upload(id, 10_800.0);

    let peak = Arc::new(AtomicUsize::new(0));
    let stop = Arc::new(AtomicBool::new(false));
    let sampler = {
        let store = Arc::clone(h.orchestrator.store());
        let peak = Arc::clone(&peak);
        let stop = Arc::clone(&stop);
        tokio::spawn(async move {
            while !stop.load(Ordering::SeqCst) {
                if let Some(job) = store.snapshot(id) {
                    let active = job.chunks.values().filter(|c| c.state.is_active()).count();
                    peak.fetch_max(active, Ordering::SeqCst);
                }
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
    };

    h.orchestrator.submit_file(id, path).await.unwrap();
    let job = h.wait_terminal(id).await;
    stop.store(true, Ordering::SeqCst);
    sampler.await.unwrap();

    assert_eq!(job.state, JobState::Done);
    assert_eq!(job.chunks.len(), 12);
    assert!(h.provider.max_active() <= 5);
    assert!(peak.load(Ordering::SeqCst) <= 5);
}

#[tokio::test]
async fn test_temporary_files_and_blobs_are_removed() {
    let h = HarnessBuilder::new().build();

    let single = JobId::new();
    let path = h.upload(single, 300.0);
    h.orchestrator.submit_file(single, path).await.unwrap();
    h.wait_terminal(single).await;

    let chunked = JobId::new();
    let path = h.upload(chunked, 2400.0);
    h.provider
        .script(TestHarness::chunk_blob(chunked, 1), Script::Fail("bad chunk".into()));
    h.orchestrator.submit_file(chunked, path).await.unwrap();
    assert_eq!(h.wait_terminal(chunked).await.state, JobState::Error);

    assert!(h.leftover_files().is_empty(), "{:?}", h.leftover_files());
    assert!(h.blob.live().is_empty());
    assert_eq!(h.blob.puts().len(), 4);
    assert_eq!(h.blob.deletes().len(), 4);
}

#[tokio::test]
async fn test_failed_blob_delete_does_not_fail_job() {
    let h = HarnessBuilder::new()
        .with_blob(MockBlobStore::new("autoquiz").failing_deletes())
        .build();
    let id = JobId::new();
    let path = h.upload(id, 2400.0);

    h.orchestrator.submit_file(id, path).await.unwrap();
    let job = h.wait_terminal(id).await;

    assert_eq!(job.state, JobState::Done);
    assert_eq!(job.error, None);
    assert!(h.leftover_files().is_empty());
}

#[tokio::test]
async fn test_unusable_durations_are_rejected() {
    let h = HarnessBuilder::new().build();

    for duration in [0.0, -1.0, f64::NAN, 28_801.0] {
        let id = JobId::new();
        let path = h.upload(id, duration);

        let err = h.orchestrator.submit_file(id, path.clone()).await.unwrap_err();
        assert!(
            matches!(err, TranscriptionError::UnusableInput { .. }),
            "{duration}: {err}"
        );
        assert!(!path.exists());
        assert!(h.orchestrator.store().snapshot(id).is_none());
    }
    assert!(h.orchestrator.store().is_empty());
}

#[tokio::test]
async fn test_routing_boundaries() {
    let h = HarnessBuilder::new().build();

    for (duration, expected) in [
        (1800.0, JobKind::Single),
        (1801.0, JobKind::Chunked),
        (28_800.0, JobKind::Chunked),
    ] {
        let id = JobId::new();
        let path = h.upload(id, duration);
        let ticket = h.orchestrator.submit_file(id, path).await.unwrap();
        assert_eq!(ticket.kind, expected, "{duration}");
        assert_eq!(h.wait_terminal(id).await.state, JobState::Done);
    }
}

#[tokio::test]
async fn test_live_capture_is_converted_to_mp3() {
    let h = HarnessBuilder::new().build();
    let id = JobId::new();
    let path = h.capture(id);

    let ticket = h.orchestrator.submit_capture(id, path).await.unwrap();
    assert_eq!(ticket.kind, JobKind::Single);
    assert_eq!(ticket.estimated_duration_minutes(), 0.0);

    let job = h.wait_terminal(id).await;
    assert_eq!(job.state, JobState::Done);
    assert_eq!(job.transcript.as_deref(), Some("hello world"));

    let requests = h.transcoder.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].encoding, AudioEncoding::Mp3);
    assert!(
        requests[0]
            .output
            .ends_with(format!("{id}_mic_recorded.mp3"))
    );

    let submissions = h.provider.submissions();
    assert_eq!(submissions[0].0, format!("{id}.mp3"));
    assert_eq!(submissions[0].1.encoding, AudioEncoding::Mp3);
    assert!(h.leftover_files().is_empty());
}

#[tokio::test]
async fn test_split_failure_fails_job_and_removes_chunks() {
    let h = HarnessBuilder::new()
        .with_transcoder(MockTranscoder::new().failing_window(1))
        .build();
    let id = JobId::new();
    let path = h.upload(id, 2400.0);

    h.orchestrator.submit_file(id, path).await.unwrap();
    let job = h.wait_terminal(id).await;

    assert_eq!(job.state, JobState::Error);
    assert!(job.chunks.is_empty());
    assert!(job.error.unwrap().contains("cannot cut window 1"));
    assert!(h.provider.submissions().is_empty());
    assert!(h.leftover_files().is_empty(), "{:?}", h.leftover_files());
}

#[tokio::test]
async fn test_unknown_job_is_not_found() {
    let h = HarnessBuilder::new().build();
    let err = h.orchestrator.status(JobId::new()).await.unwrap_err();
    assert!(matches!(err, TranscriptionError::JobNotFound { .. }));
}

#[tokio::test]
async fn test_submit_after_shutdown_is_refused() {
    let h = HarnessBuilder::new().build();
    h.orchestrator.shutdown().await;

    let id = JobId::new();
    let path = h.upload(id, 300.0);
    let err = h.orchestrator.submit_file(id, path.clone()).await.unwrap_err();

    assert!(matches!(err, TranscriptionError::QueueClosed));
    assert!(!path.exists());
    assert_eq!(
        h.orchestrator.store().snapshot(id).map(|job| job.state),
        Some(JobState::Error)
    );
}

#[tokio::test]
async fn test_full_queue_refuses_job_without_blocking() {
    let h = HarnessBuilder::new().with_dispatch(1, 1).build();

    let running = JobId::new();
    h.provider.script(format!("{running}.flac"), Script::Hang);
    let path = h.upload(running, 300.0);
    h.orchestrator.submit_file(running, path).await.unwrap();

    // Wait for the only worker to take it so the queue slot is free again
    tokio::time::timeout(Duration::from_secs(5), async {
        while h.orchestrator.queue_depth() > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    let queued = JobId::new();
    let path = h.upload(queued, 300.0);
    h.orchestrator.submit_file(queued, path).await.unwrap();
    assert_eq!(h.orchestrator.queue_depth(), 1);

    let refused = JobId::new();
    let path = h.upload(refused, 300.0);
    let err = tokio::time::timeout(
        Duration::from_millis(500),
        h.orchestrator.submit_file(refused, path.clone()),
    )
    .await
    .expect("submit waited for queue room")
    .unwrap_err();

    assert!(matches!(err, TranscriptionError::QueueFull { capacity: 1 }), "{err}");
    assert!(!path.exists());
    assert_eq!(
        h.orchestrator.store().snapshot(refused).map(|job| job.state),
        Some(JobState::Error)
    );
    assert_eq!(
        h.orchestrator.store().snapshot(queued).map(|job| job.state),
        Some(JobState::Created)
    );
}
