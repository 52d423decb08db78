//! Integration tests for the delivery engine.
//!
//! Drives the full queue, worker, client and scheduler pipeline against a
//! mock receiving endpoint, covering retry exhaustion, fatal short-circuit,
//! queue overflow and graceful shutdown.

#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::panic)]

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use anyhow::Result;
use chrono::{DateTime, Utc};
use paynotify_core::{GatewayResponse, PaymentReference};
use paynotify_delivery::{
    DeliveryEngine, DeliveryError, DeliveryJob, DeliveryOutcome, DeliveryPolicy, DeliveryReceipt,
};
use serde_json::{json, Value};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use wiremock::{matchers, Mock, MockServer, ResponseTemplate};

fn policy(url: String) -> DeliveryPolicy {
    DeliveryPolicy {
        url,
        max_attempts: 3,
        initial_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(50),
        worker_count: 2,
        queue_capacity: 16,
        timeout: Duration::from_secs(2),
        max_pending_retries: 16,
        shutdown_timeout: Duration::from_secs(5),
        ..Default::default()
    }
}

fn job(page: &str) -> DeliveryJob {
    DeliveryJob::new(
        PaymentReference::new("merchant-1", page, "rvc-1"),
        GatewayResponse::from_raw(json!({"Brand": "VISA", "Last4": "4242"})),
    )
}

async fn outcome_of(receiver: oneshot::Receiver<DeliveryOutcome>) -> Result<DeliveryOutcome> {
    Ok(tokio::time::timeout(Duration::from_secs(5), receiver).await??)
}

async fn wait_until(mut condition: impl FnMut() -> bool) -> Result<()> {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await?;
    Ok(())
}

#[tokio::test]
async fn successful_delivery_reports_receipt() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let mut engine = DeliveryEngine::new(policy(server.uri()))?;
    engine.start().await?;

    let (job, receiver) = job("page-ok").with_completion_channel();
    engine.handle().submit(job);

    assert_eq!(outcome_of(receiver).await?, Ok(DeliveryReceipt { status_code: 200, attempts: 1 }));

    let stats = engine.stats();
    assert_eq!(stats.delivered, 1);
    assert_eq!(stats.active_workers, 2);

    engine.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn server_errors_exhaust_retry_budget() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
        .expect(3)
        .mount(&server)
        .await;

    let mut engine = DeliveryEngine::new(policy(server.uri()))?;
    engine.start().await?;

    let (job, receiver) = job("page-503").with_completion_channel();
    engine.handle().submit(job);

    assert_eq!(outcome_of(receiver).await?, Err(DeliveryError::RetriesExhausted { attempts: 3 }));

    // Give a stray fourth attempt the chance to show up before counting.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(server.received_requests().await.unwrap().len(), 3);

    let stats = engine.stats();
    assert_eq!(stats.attempts, 3);
    assert_eq!(stats.retries_scheduled, 2);
    assert_eq!(stats.exhausted, 1);

    engine.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn client_error_is_fatal_after_one_attempt() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(404).set_body_string("no such hook"))
        .expect(1)
        .mount(&server)
        .await;

    let mut engine = DeliveryEngine::new(policy(server.uri()))?;
    engine.start().await?;

    let (job, receiver) = job("page-404").with_completion_channel();
    engine.handle().submit(job);

    assert_eq!(
        outcome_of(receiver).await?,
        Err(DeliveryError::Rejected { status_code: 404, body: "no such hook".to_string() })
    );

    let stats = engine.stats();
    assert_eq!(stats.retries_scheduled, 0);
    assert_eq!(stats.failed, 1);

    engine.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn full_queue_fails_fast_without_request() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let capacity = 3;
    let engine = DeliveryEngine::new(DeliveryPolicy {
        queue_capacity: capacity,
        ..policy(server.uri())
    })?;
    let handle = engine.handle();

    let mut queued = Vec::new();
    for n in 0..capacity {
        let (job, receiver) = job(&format!("page-{n}")).with_completion_channel();
        handle.submit(job);
        queued.push(receiver);
    }

    let rejected = Arc::new(AtomicBool::new(false));
    let flag = rejected.clone();
    handle.submit(job("page-overflow").on_complete(move |outcome| {
        if outcome == Err(DeliveryError::QueueFull { capacity: 3 }) {
            flag.store(true, Ordering::SeqCst);
        }
    }));
    assert!(rejected.load(Ordering::SeqCst), "queue-full must be reported before submit returns");
    assert_eq!(handle.stats().queued, capacity);

    engine.shutdown().await?;
    for receiver in queued {
        assert_eq!(outcome_of(receiver).await?, Err(DeliveryError::ShutdownRequested));
    }
    assert!(server.received_requests().await.unwrap().is_empty());
    Ok(())
}

#[tokio::test]
async fn shutdown_waits_for_in_flight_deliveries() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(300)))
        .mount(&server)
        .await;

    let mut engine = DeliveryEngine::new(policy(server.uri()))?;
    engine.start().await?;
    let handle = engine.handle();

    let mut receivers = Vec::new();
    for n in 0..4 {
        let (job, receiver) = job(&format!("page-{n}")).with_completion_channel();
        handle.submit(job);
        receivers.push(receiver);
    }

    wait_until(|| handle.stats().attempts >= 2).await?;
    engine.shutdown().await?;

    // Both workers were mid-delivery; shutdown returned only after they finished
    // and neither picked up another job.
    let mut delivered = 0;
    let mut stopped = 0;
    for receiver in receivers {
        match outcome_of(receiver).await? {
            Ok(receipt) => {
                assert_eq!(receipt.attempts, 1);
                delivered += 1;
            },
            Err(DeliveryError::ShutdownRequested) => stopped += 1,
            Err(other) => panic!("unexpected outcome: {other}"),
        }
    }
    assert_eq!(delivered, 2);
    assert_eq!(stopped, 2);
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
    assert_eq!(handle.stats().active_workers, 0);
    Ok(())
}

#[tokio::test]
async fn shutdown_timeout_must_outlast_attempt_timeout() {
    let result = DeliveryEngine::new(DeliveryPolicy {
        timeout: Duration::from_secs(5),
        shutdown_timeout: Duration::from_millis(200),
        ..policy("http://127.0.0.1:1/webhook".to_string())
    });

    assert!(matches!(result, Err(DeliveryError::ConfigurationError { .. })));
}

#[tokio::test]
async fn dropped_engine_still_reports_queued_jobs() -> Result<()> {
    let engine = DeliveryEngine::new(policy("http://127.0.0.1:1/webhook".to_string()))?;
    let handle = engine.handle();

    let (job, receiver) = job("page-orphaned").with_completion_channel();
    handle.submit(job);
    drop(engine);

    assert_eq!(outcome_of(receiver).await?, Err(DeliveryError::ShutdownRequested));
    Ok(())
}

#[tokio::test]
async fn shutdown_cancels_pending_retries() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let mut engine = DeliveryEngine::new(DeliveryPolicy {
        initial_delay: Duration::from_secs(30),
        max_delay: Duration::from_secs(60),
        ..policy(server.uri())
    })?;
    engine.start().await?;
    let handle = engine.handle();

    let (job, receiver) = job("page-retry").with_completion_channel();
    handle.submit(job);

    wait_until(|| handle.stats().pending_retries == 1).await?;
    tokio::time::timeout(Duration::from_secs(5), engine.shutdown()).await??;

    assert_eq!(outcome_of(receiver).await?, Err(DeliveryError::ShutdownRequested));
    assert_eq!(handle.stats().pending_retries, 0);
    Ok(())
}

#[tokio::test]
async fn submit_after_shutdown_is_rejected() -> Result<()> {
    let engine = DeliveryEngine::new(policy("http://127.0.0.1:9/hook".to_string()))?;
    let handle = engine.handle();
    engine.shutdown().await?;

    let (job, receiver) = job("page-late").with_completion_channel();
    handle.submit(job);

    assert_eq!(outcome_of(receiver).await?, Err(DeliveryError::ShutdownRequested));
    Ok(())
}

#[tokio::test]
async fn cancelled_job_is_not_retried() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(502))
        .expect(1)
        .mount(&server)
        .await;

    let mut engine = DeliveryEngine::new(DeliveryPolicy {
        initial_delay: Duration::from_millis(200),
        max_delay: Duration::from_secs(1),
        ..policy(server.uri())
    })?;
    engine.start().await?;
    let handle = engine.handle();

    let token = CancellationToken::new();
    let (job, receiver) =
        job("page-cancel").with_cancellation(token.clone()).with_completion_channel();
    handle.submit(job);

    wait_until(|| handle.stats().retries_scheduled == 1).await?;
    token.cancel();

    assert_eq!(outcome_of(receiver).await?, Err(DeliveryError::Cancelled));
    engine.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn retry_capacity_bounds_pending_timers() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let mut engine = DeliveryEngine::new(DeliveryPolicy {
        initial_delay: Duration::from_secs(30),
        max_delay: Duration::from_secs(60),
        max_pending_retries: 1,
        ..policy(server.uri())
    })?;
    engine.start().await?;
    let handle = engine.handle();

    let outcomes = Arc::new(Mutex::new(Vec::new()));
    for page in ["page-a", "page-b"] {
        let sink = outcomes.clone();
        handle.submit(job(page).on_complete(move |outcome| sink.lock().unwrap().push(outcome)));
    }

    wait_until(|| outcomes.lock().unwrap().len() == 1).await?;
    assert_eq!(
        outcomes.lock().unwrap()[0],
        Err(DeliveryError::RetryCapacityExceeded { limit: 1 })
    );
    assert_eq!(handle.stats().pending_retries, 1);

    engine.shutdown().await?;
    assert_eq!(outcomes.lock().unwrap()[1], Err(DeliveryError::ShutdownRequested));
    Ok(())
}

#[tokio::test]
async fn retries_carry_fresh_timestamps() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let mut engine = DeliveryEngine::new(DeliveryPolicy {
        initial_delay: Duration::from_millis(50),
        ..policy(server.uri())
    })?;
    engine.start().await?;

    let (job, receiver) = job("page-fresh").with_completion_channel();
    engine.handle().submit(job);

    assert_eq!(outcome_of(receiver).await?, Ok(DeliveryReceipt { status_code: 200, attempts: 2 }));

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);

    let timestamps = requests
        .iter()
        .map(|request| {
            let body: Value = serde_json::from_slice(&request.body).unwrap();
            assert_eq!(body["payment_page_id"], "page-fresh");
            assert_eq!(body["status"], "paid");
            body["timestamp"].as_str().unwrap().parse::<DateTime<Utc>>().unwrap()
        })
        .collect::<Vec<_>>();

    let gap = (timestamps[1] - timestamps[0]).to_std()?;
    assert!(gap >= Duration::from_millis(50), "retry reused a stale timestamp: {gap:?}");

    engine.shutdown().await?;
    Ok(())
}
