//! Crash recovery: stale claims and lost deliveries

mod helpers;

use helpers::{candidate, create_test_env, test_engine, Fakes};
use mtag_worker::db::{Channel, Dispatcher};
use mtag_worker::models::{JobState, JobUpdate};
use mtag_worker::workflow::{sweep_stale, SweepReport};
use std::time::Duration;

#[tokio::test]
async fn test_stale_analysis_claim_is_requeued_and_finishes() {
    let env = create_test_env().await;
    let fakes = Fakes::new();
    let engine = test_engine(&env, &fakes, 80);

    let path = "/music/crashed.mp3";
    fakes.recognition.respond(path, vec![candidate(93.0, "T", "A", "rg-1", "B")]);
    let id = engine.producer.create_job(path).await.unwrap();

    // A worker claims the job and dies: the delivery is acked, the claim remains
    let delivery = env.dispatcher.dequeue(Channel::Analysis).await.unwrap().unwrap();
    assert!(env
        .store
        .set_processing(id, JobState::AnalysisPending)
        .await
        .unwrap()
        .is_some());
    env.dispatcher.ack(&delivery).await.unwrap();

    tokio::time::sleep(Duration::from_millis(20)).await;
    let report = sweep_stale(&env.store, env.dispatcher.as_ref(), Duration::from_millis(5))
        .await
        .unwrap();
    assert_eq!(
        report,
        SweepReport {
            recovered: 1,
            redelivered: 0
        }
    );
    assert_eq!(
        env.store.get(id).await.unwrap().unwrap().state,
        JobState::AnalysisPending
    );

    engine.workers.drain().await.unwrap();
    assert_eq!(env.store.get(id).await.unwrap().unwrap().state, JobState::Done);
}

#[tokio::test]
async fn test_stale_processing_claim_returns_to_processing_pending() {
    let env = create_test_env().await;
    let id = env.store.create("/music/a.mp3").await.unwrap();
    let claim = env
        .store
        .set_processing(id, JobState::AnalysisPending)
        .await
        .unwrap()
        .unwrap();
    env.store
        .transition(
            id,
            JobState::AnalysisProcessing,
            JobState::ProcessingPending,
            JobUpdate::new().claimed(claim).confidence(99.0),
        )
        .await
        .unwrap();
    env.store.set_processing(id, JobState::ProcessingPending).await.unwrap();

    tokio::time::sleep(Duration::from_millis(20)).await;
    let report = sweep_stale(&env.store, env.dispatcher.as_ref(), Duration::from_millis(5))
        .await
        .unwrap();

    assert_eq!(report.recovered, 1);
    assert_eq!(
        env.store.get(id).await.unwrap().unwrap().state,
        JobState::ProcessingPending
    );
    let delivery = env.dispatcher.dequeue(Channel::Processing).await.unwrap().unwrap();
    assert_eq!(delivery.job_id, id);
}

#[tokio::test]
async fn test_fresh_claims_are_left_alone() {
    let env = create_test_env().await;
    let id = env.store.create("/music/busy.mp3").await.unwrap();
    env.store.set_processing(id, JobState::AnalysisPending).await.unwrap();

    let report = sweep_stale(&env.store, env.dispatcher.as_ref(), Duration::from_secs(3600))
        .await
        .unwrap();

    assert_eq!(report, SweepReport::default());
    assert_eq!(
        env.store.get(id).await.unwrap().unwrap().state,
        JobState::AnalysisProcessing
    );
}

#[tokio::test]
async fn test_pending_job_without_delivery_is_reenqueued() {
    let env = create_test_env().await;

    // Created without the enqueue, as if the producer died in between
    let orphan = env.store.create("/music/orphan.mp3").await.unwrap();
    let queued = env.store.create("/music/queued.mp3").await.unwrap();
    env.dispatcher.enqueue(Channel::Analysis, queued).await.unwrap();

    tokio::time::sleep(Duration::from_millis(20)).await;
    let report = sweep_stale(&env.store, env.dispatcher.as_ref(), Duration::from_millis(5))
        .await
        .unwrap();

    assert_eq!(report.redelivered, 1);
    assert_eq!(env.dispatcher.pending(Channel::Analysis).await.unwrap(), 2);

    let mut delivered = Vec::new();
    while let Some(delivery) = env.dispatcher.dequeue(Channel::Analysis).await.unwrap() {
        delivered.push(delivery.job_id);
    }
    assert_eq!(delivered, vec![queued, orphan]);
}

#[tokio::test]
async fn test_terminal_jobs_are_never_swept() {
    let env = create_test_env().await;
    let id = env.store.create("/music/failed.mp3").await.unwrap();
    env.dispatcher.enqueue(Channel::Analysis, id).await.unwrap();
    let claim = env
        .store
        .set_processing(id, JobState::AnalysisPending)
        .await
        .unwrap()
        .unwrap();
    env.store
        .transition(
            id,
            JobState::AnalysisProcessing,
            JobState::Failed,
            JobUpdate::new().claimed(claim).error("no match"),
        )
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(20)).await;
    let report = sweep_stale(&env.store, env.dispatcher.as_ref(), Duration::from_millis(5))
        .await
        .unwrap();

    assert_eq!(report, SweepReport::default());
    assert_eq!(env.store.get(id).await.unwrap().unwrap().state, JobState::Failed);
}

#[tokio::test]
async fn test_recovered_claim_cannot_be_finished_by_its_old_owner() {
    let env = create_test_env().await;
    let id = env.store.create("/music/slow.mp3").await.unwrap();
    let claim = env
        .store
        .set_processing(id, JobState::AnalysisPending)
        .await
        .unwrap()
        .unwrap();
    env.store
        .transition(
            id,
            JobState::AnalysisProcessing,
            JobState::ProcessingPending,
            JobUpdate::new().claimed(claim).confidence(95.0),
        )
        .await
        .unwrap();

    // Worker A claims the tag commit and stalls past the staleness threshold
    let slow = env
        .store
        .set_processing(id, JobState::ProcessingPending)
        .await
        .unwrap()
        .unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    let report = sweep_stale(&env.store, env.dispatcher.as_ref(), Duration::from_millis(5))
        .await
        .unwrap();
    assert_eq!(report.recovered, 1);

    // Worker B picks up the redelivered job
    let live = env
        .store
        .set_processing(id, JobState::ProcessingPending)
        .await
        .unwrap()
        .unwrap();
    assert_ne!(live, slow);

    let stale_rows = env
        .store
        .transition(
            id,
            JobState::ProcessingProcessing,
            JobState::Done,
            JobUpdate::new().claimed(slow),
        )
        .await
        .unwrap();
    assert_eq!(stale_rows, 0);

    let live_rows = env
        .store
        .transition(
            id,
            JobState::ProcessingProcessing,
            JobState::Failed,
            JobUpdate::new().claimed(live).error("tag write failure: disk full"),
        )
        .await
        .unwrap();
    assert_eq!(live_rows, 1);

    let job = env.store.get(id).await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Failed);
    assert_eq!(job.claim, live);
}

#[tokio::test]
async fn test_sweep_leaves_a_claim_reissued_after_listing() {
    let env = create_test_env().await;
    let id = env.store.create("/music/busy.mp3").await.unwrap();
    let first = env
        .store
        .set_processing(id, JobState::AnalysisPending)
        .await
        .unwrap()
        .unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    let listed = env
        .store
        .list_stale(chrono::Utc::now())
        .await
        .unwrap();
    assert_eq!(listed[0].claim, first);

    // Recovered and claimed again by someone else before this sweep acts
    env.store
        .transition(
            id,
            JobState::AnalysisProcessing,
            JobState::AnalysisPending,
            JobUpdate::new().claimed(first),
        )
        .await
        .unwrap();
    let second = env
        .store
        .set_processing(id, JobState::AnalysisPending)
        .await
        .unwrap()
        .unwrap();

    let rows = env
        .store
        .transition(
            id,
            JobState::AnalysisProcessing,
            JobState::AnalysisPending,
            JobUpdate::new()
                .claimed(listed[0].claim)
                .updated_before(chrono::Utc::now() + chrono::Duration::seconds(1)),
        )
        .await
        .unwrap();
    assert_eq!(rows, 0);
    assert_eq!(env.store.get(id).await.unwrap().unwrap().claim, second);
}
