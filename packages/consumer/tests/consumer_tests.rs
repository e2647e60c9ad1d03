#![allow(clippy::disallowed_methods)]

mod common;

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use consumer::{
    AckStatus, ConsumerArgs, ConsumerMessage, Dispatcher, JobRunner, consumer_stats,
    start_consumer,
};
use docpipe_core::{JobEvent, JobFailure, JobOutcome, Stage};
use tokio::sync::broadcast;
use transform::XmlToJson;

use common::{Harness, INPUT, OUTPUT, fast_config, harness, wait_for};

fn dispatcher(h: &Harness, max_in_flight: usize) -> Dispatcher {
    let (event_tx, _) = broadcast::channel(64);
    Dispatcher::new(h.broker.clone(), h.runner.clone(), max_in_flight, event_tx)
}

#[tokio::test]
async fn success_deletes_once_and_only_after_persist() -> Result<(), Box<dyn Error>> {
    let h = harness()?;
    h.store.seed("input/a.xml", "<a><b>1</b></a>").await?;
    h.broker.inner.send("input/a.xml");

    let batch = h.broker.take(10).await?;
    let receipt = batch[0].receipt.clone();
    let report = dispatcher(&h, 10).process(batch[0].clone()).await;

    assert_eq!(report.outcome, JobOutcome::success("json-output/input/a.xml.json"));
    assert_eq!(report.ack, AckStatus::Acknowledged);

    let output = h.store.output("json-output/input/a.xml.json").await?;
    let value: serde_json::Value = serde_json::from_slice(&output)?;
    assert_eq!(value, serde_json::json!({"a": {"b": "1"}}));

    assert_eq!(h.log.count("delete:"), 1);
    assert_eq!(
        h.log.entries().last().cloned(),
        Some(format!("delete:{}", receipt.as_str()))
    );
    let put = h.log.position("put:").ok_or("no put")?;
    let delete = h.log.position("delete:").ok_or("no delete")?;
    assert!(put < delete, "delete issued before persist: {:?}", h.log.entries());
    assert!(h.broker.inner.is_empty());
    Ok(())
}

#[tokio::test]
async fn empty_payload_is_deleted_without_touching_storage() -> Result<(), Box<dyn Error>> {
    let h = harness()?;
    h.broker.inner.send("");
    h.broker.inner.send_raw(None);

    let batch = h.broker.take(10).await?;
    let report = dispatcher(&h, 10).dispatch(batch).await;

    assert_eq!(report.reports.len(), 2);
    for job in &report.reports {
        assert_eq!(job.outcome, JobOutcome::from(JobFailure::empty_payload()));
        assert_eq!(job.ack, AckStatus::Acknowledged);
    }
    assert_eq!(h.log.count("get:"), 0);
    assert_eq!(h.log.count("delete:"), 2);
    assert!(h.broker.inner.is_empty());
    Ok(())
}

#[tokio::test]
async fn fetch_error_is_never_deleted() -> Result<(), Box<dyn Error>> {
    let h = harness()?;
    h.store.seed("input/a.xml", "<a/>").await?;
    h.store.fail_get("input/a.xml", 1);
    h.broker.inner.send("input/a.xml");

    let batch = h.broker.take(10).await?;
    let report = dispatcher(&h, 10).process(batch[0].clone()).await;

    let failure = report.outcome.failure().ok_or("expected failure")?;
    assert_eq!(failure.stage, Stage::Fetch);
    assert!(failure.cause.contains("connection reset"));
    assert_eq!(report.ack, AckStatus::Redeliver);
    assert_eq!(h.log.count("delete:"), 0);
    assert_eq!(h.log.count("put:"), 0);
    assert_eq!(h.broker.inner.len(), 1);
    Ok(())
}

#[tokio::test]
async fn failing_stage_is_reported() -> Result<(), Box<dyn Error>> {
    let h = harness()?;
    h.store.seed("bad.xml", "<a><b></a>").await?;
    h.store.seed("good.xml", "<a/>").await?;
    let d = dispatcher(&h, 10);

    h.broker.inner.send("bad.xml");
    let batch = h.broker.take(1).await?;
    let report = d.process(batch[0].clone()).await;
    let failure = report.outcome.failure().ok_or("expected transform failure")?;
    assert_eq!(failure.stage, Stage::Transform);
    assert!(!failure.retryable);
    assert_eq!(report.ack, AckStatus::Redeliver);

    h.store.fail_puts(true);
    h.broker.inner.send("good.xml");
    let batch = h.broker.take(1).await?;
    let report = d.process(batch[0].clone()).await;
    let failure = report.outcome.failure().ok_or("expected persist failure")?;
    assert_eq!(failure.stage, Stage::Persist);
    assert!(failure.retryable);
    assert_eq!(report.ack, AckStatus::Redeliver);

    assert_eq!(h.log.count("delete:"), 0);
    Ok(())
}

#[tokio::test]
async fn ack_unretryable_deletes_malformed_input_only() -> Result<(), Box<dyn Error>> {
    let h = harness()?;
    h.store.seed("bad.xml", "not xml").await?;
    h.store.seed("flaky.xml", "<a/>").await?;
    h.store.fail_get("flaky.xml", 1);
    h.broker.inner.send("bad.xml");
    h.broker.inner.send("flaky.xml");

    let batch = h.broker.take(10).await?;
    let report = dispatcher(&h, 10)
        .with_ack_unretryable(true)
        .dispatch(batch)
        .await;

    for job in &report.reports {
        let failure = job.outcome.failure().ok_or("expected failure")?;
        match failure.stage {
            Stage::Transform => assert_eq!(job.ack, AckStatus::Acknowledged),
            Stage::Fetch => assert_eq!(job.ack, AckStatus::Redeliver),
            Stage::Persist => return Err("unexpected persist failure".into()),
        }
    }
    assert_eq!(h.log.count("delete:"), 1);
    assert_eq!(h.broker.inner.len(), 1);
    Ok(())
}

#[tokio::test]
async fn failed_delete_is_not_retried() -> Result<(), Box<dyn Error>> {
    let h = harness()?;
    h.store.seed("a.xml", "<a/>").await?;
    h.broker.fail_deletes(true);
    h.broker.inner.send("a.xml");

    let batch = h.broker.take(10).await?;
    let report = dispatcher(&h, 10).process(batch[0].clone()).await;

    assert!(report.outcome.is_success());
    assert!(matches!(report.ack, AckStatus::Failed(_)));
    assert_eq!(h.log.count("delete:"), 1);
    assert_eq!(h.broker.inner.len(), 1);
    Ok(())
}

#[tokio::test]
async fn batch_jobs_are_independent_and_bounded() -> Result<(), Box<dyn Error>> {
    let h = harness()?;
    h.store.set_delay(Duration::from_millis(50));
    for i in 0..10 {
        h.store
            .seed(&format!("input/{i}.xml"), &format!("<doc><n>{i}</n></doc>"))
            .await?;
        h.broker.inner.send(format!("input/{i}.xml"));
    }

    let batch = h.broker.take(10).await?;
    let report = dispatcher(&h, 3).dispatch(batch).await;

    assert_eq!(report.reports.len(), 10);
    assert_eq!(report.panicked, 0);
    assert!(report.reports.iter().all(|r| r.ack == AckStatus::Acknowledged));
    assert!(h.store.peak_concurrency() <= 3, "peak {}", h.store.peak_concurrency());
    assert!(h.store.peak_concurrency() > 1, "jobs ran sequentially");

    for i in 0..10 {
        let output = h.store.output(&format!("json-output/input/{i}.xml.json")).await?;
        let value: serde_json::Value = serde_json::from_slice(&output)?;
        assert_eq!(value, serde_json::json!({"doc": {"n": i.to_string()}}));
    }
    assert!(h.broker.inner.is_empty());
    Ok(())
}

#[tokio::test]
async fn rerunning_a_job_is_idempotent() -> Result<(), Box<dyn Error>> {
    let h = harness()?;
    h.store.seed("input/a.xml", "<a x=\"1\"><b>1</b><b>2</b></a>").await?;
    let runner = JobRunner::new(h.store.clone(), Arc::new(XmlToJson), INPUT, OUTPUT);

    let first = runner.run("input/a.xml").await;
    let first_bytes = h.store.output("json-output/input/a.xml.json").await?;
    let second = runner.run("input/a.xml").await;
    let second_bytes = h.store.output("json-output/input/a.xml.json").await?;

    assert_eq!(first, second);
    assert_eq!(first_bytes, second_bytes);
    assert_eq!(h.log.count("put:json-output/input/a.xml.json"), 2);
    Ok(())
}

#[tokio::test]
async fn payload_is_used_as_the_key_verbatim() -> Result<(), Box<dyn Error>> {
    let h = harness()?;
    h.store.seed("a.xml ", "<a>spaced</a>").await?;
    h.store.seed("a.xml", "<a>plain</a>").await?;
    h.broker.inner.send("a.xml ");

    let batch = h.broker.take(10).await?;
    let report = dispatcher(&h, 10).process(batch[0].clone()).await;

    assert_eq!(report.outcome, JobOutcome::success("json-output/a.xml .json"));
    assert_eq!(report.ack, AckStatus::Acknowledged);
    assert_eq!(h.log.entries()[0], "get:a.xml ");

    let output = h.store.output("json-output/a.xml .json").await?;
    let value: serde_json::Value = serde_json::from_slice(&output)?;
    assert_eq!(value, serde_json::json!({"a": "spaced"}));
    Ok(())
}

#[tokio::test]
async fn consumer_processes_and_acknowledges() -> Result<(), Box<dyn Error>> {
    let h = harness()?;
    h.store.seed("input/a.xml", "<a><b>1</b></a>").await?;
    let id = h.broker.inner.send("input/a.xml");

    let args = ConsumerArgs::new(h.broker.clone(), h.runner.clone(), fast_config());
    let mut events = args.subscribe();
    let (consumer, handle) = start_consumer(args).await?;

    let event = wait_for(&mut events, |e| matches!(e, JobEvent::JobAcknowledged { .. })).await?;
    assert_eq!(event.message_id(), Some(&id));
    wait_for(&mut events, |e| matches!(e, JobEvent::BatchDrained { .. })).await?;

    let stats = consumer_stats(&consumer).await?;
    assert_eq!(stats.succeeded, 1);
    assert_eq!(stats.acknowledged, 1);
    assert_eq!(stats.failed, 0);

    consumer.send_message(ConsumerMessage::Shutdown)?;
    handle.await?;
    assert!(h.broker.inner.is_empty());
    Ok(())
}

#[tokio::test]
async fn failed_job_is_redelivered_after_visibility_lapses() -> Result<(), Box<dyn Error>> {
    let h = harness()?;
    h.store.seed("input/a.xml", "<a><b>1</b></a>").await?;
    h.store.fail_get("input/a.xml", 1);
    h.broker.inner.send("input/a.xml");

    let args = ConsumerArgs::new(h.broker.clone(), h.runner.clone(), fast_config());
    let mut events = args.subscribe();
    let (consumer, handle) = start_consumer(args).await?;

    let failed = wait_for(&mut events, |e| matches!(e, JobEvent::JobFailed { .. })).await?;
    assert!(matches!(
        failed,
        JobEvent::JobFailed {
            stage: Stage::Fetch,
            will_redeliver: true,
            ..
        }
    ));
    wait_for(&mut events, |e| matches!(e, JobEvent::JobAcknowledged { .. })).await?;
    wait_for(&mut events, |e| matches!(e, JobEvent::BatchDrained { .. })).await?;

    let stats = consumer_stats(&consumer).await?;
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.succeeded, 1);
    assert_eq!(stats.acknowledged, 1);
    assert_eq!(h.log.count("get:input/a.xml"), 2);
    assert_eq!(h.log.count("delete:"), 1);

    consumer.send_message(ConsumerMessage::Shutdown)?;
    handle.await?;
    Ok(())
}

#[tokio::test]
async fn poll_errors_back_off_and_recover() -> Result<(), Box<dyn Error>> {
    let h = harness()?;
    h.store.seed("a.xml", "<a/>").await?;
    h.broker.fail_receives(2);
    h.broker.inner.send("a.xml");

    let args = ConsumerArgs::new(h.broker.clone(), h.runner.clone(), fast_config());
    let mut events = args.subscribe();
    let (consumer, handle) = start_consumer(args).await?;

    wait_for(&mut events, |e| matches!(e, JobEvent::JobAcknowledged { .. })).await?;
    wait_for(&mut events, |e| matches!(e, JobEvent::BatchDrained { .. })).await?;
    let stats = consumer_stats(&consumer).await?;
    assert_eq!(stats.poll_errors, 2);
    assert_eq!(stats.acknowledged, 1);

    consumer.send_message(ConsumerMessage::Shutdown)?;
    handle.await?;
    Ok(())
}

#[tokio::test]
async fn shutdown_lets_in_flight_jobs_finish() -> Result<(), Box<dyn Error>> {
    let h = harness()?;
    h.store.seed("slow.xml", "<a/>").await?;
    h.store.set_delay(Duration::from_millis(300));
    h.broker.inner.send("slow.xml");

    let args = ConsumerArgs::new(h.broker.clone(), h.runner.clone(), fast_config());
    let mut events = args.subscribe();
    let (consumer, handle) = start_consumer(args).await?;

    wait_for(&mut events, |e| matches!(e, JobEvent::JobStarted { .. })).await?;
    consumer.send_message(ConsumerMessage::Shutdown)?;
    tokio::time::timeout(Duration::from_secs(5), handle).await??;

    assert!(h.store.output("json-output/slow.xml.json").await.is_ok());
    assert!(h.broker.inner.is_empty());

    // Nothing is received once the consumer has stopped.
    h.broker.inner.send("late.xml");
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.log.count("get:late.xml"), 0);
    Ok(())
}

#[tokio::test]
async fn cancelling_the_token_interrupts_an_idle_poll() -> Result<(), Box<dyn Error>> {
    let h = harness()?;
    let mut config = fast_config();
    config.wait = Duration::from_secs(20);

    let args = ConsumerArgs::new(h.broker.clone(), h.runner.clone(), config);
    let token = args.shutdown.clone();
    let (_consumer, handle) = start_consumer(args).await?;

    tokio::time::sleep(Duration::from_millis(50)).await;
    token.cancel();
    tokio::time::timeout(Duration::from_secs(2), handle).await??;
    Ok(())
}
