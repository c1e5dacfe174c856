use std::time::Duration;

use tempfile::TempDir;

use crawlweave::event_bus::{
    ChannelSink, Event, EventBus, ItemOutcome, JobStage, JsonLinesSink, MemorySink,
};

#[tokio::test]
async fn events_reach_every_sink() {
    let memory = MemorySink::new();
    let (tx, rx) = flume::unbounded();
    let bus = EventBus::with_sinks(vec![
        Box::new(memory.clone()),
        Box::new(ChannelSink::new(tx)),
    ]);
    bus.listen_for_events();

    let emitter = bus.get_emitter();
    emitter
        .emit(Event::job("job-1", JobStage::Started, "starting"))
        .unwrap();
    emitter
        .emit(Event::item(
            "job-1",
            "item-1",
            "corr-1",
            ItemOutcome::Succeeded { attempts: 1 },
            "done",
        ))
        .unwrap();

    let first = rx.recv_async().await.unwrap();
    let second = rx.recv_async().await.unwrap();
    assert_eq!(first.scope_label(), "job");
    assert_eq!(second.scope_label(), "item");
    assert_eq!(second.correlation_id(), Some("corr-1"));

    // Let the memory sink's worker drain before stopping it.
    tokio::time::sleep(Duration::from_millis(50)).await;
    bus.stop_listener().await;
    let captured = memory.snapshot();
    assert_eq!(captured.len(), 2);
}

#[tokio::test]
async fn direct_subscribers_see_events_without_sinks() {
    let bus = EventBus::with_sinks(vec![]);
    bus.listen_for_events();
    let mut stream = bus.subscribe();

    let emitter = bus.get_emitter();
    emitter
        .emit(Event::diagnostic("test", "hello"))
        .unwrap();

    let event = stream.next_timeout(Duration::from_secs(1)).await.unwrap();
    assert_eq!(event.message(), "hello");

    // No event pending: the timeout elapses.
    assert!(
        stream.next_timeout(Duration::from_millis(30)).await.is_none()
    );
}

#[tokio::test]
async fn json_lines_sink_writes_the_normalized_schema() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("events.jsonl");

    let bus = EventBus::with_sinks(vec![Box::new(JsonLinesSink::to_file(&path).unwrap())]);
    bus.listen_for_events();
    bus.get_emitter()
        .emit(Event::checkpoint("job-1", 4, "Active", "checkpoint written"))
        .unwrap();

    // Let the sink worker drain, then stop it to flush.
    tokio::time::sleep(Duration::from_millis(50)).await;
    bus.stop_listener().await;

    let text = std::fs::read_to_string(&path).unwrap();
    let line = text.lines().next().expect("one JSON line");
    let value: serde_json::Value = serde_json::from_str(line).unwrap();
    assert_eq!(value["type"], "checkpoint");
    assert_eq!(value["metadata"]["job_id"], "job-1");
    assert_eq!(value["metadata"]["sequence"], 4);
    assert!(value["timestamp"].as_str().is_some());
}

#[tokio::test]
async fn hub_metrics_expose_capacity_and_drops() {
    let bus = EventBus::with_sinks(vec![]);
    let metrics = bus.metrics();
    assert!(metrics.capacity >= 1);
    assert_eq!(metrics.dropped, 0);
}
