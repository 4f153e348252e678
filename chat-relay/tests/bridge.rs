use std::{
    net::SocketAddr,
    sync::{Arc, Mutex},
};

use anyhow::Result;
use chat_relay::{
    bridge::{BridgeOptions, Broadcast, INBOUND_TOPIC, MessageBridge, OUTBOUND_TOPIC},
    broadcaster::{NoticeQueue, spawn_broadcaster},
    event::{Ack, Connection, InboundEvent},
    notice::Notice,
    presence::PresenceCounter,
};
use serde_json::json;
use tokio::task::JoinHandle;

#[derive(Default)]
struct RecordingSink {
    seen: Mutex<Vec<(String, Notice)>>,
}

impl Broadcast for RecordingSink {
    fn broadcast(&self, topic: &str, notice: &Notice) {
        self.seen
            .lock()
            .expect("sink lock poisoned")
            .push((topic.to_string(), notice.clone()));
    }
}

impl RecordingSink {
    fn notices(&self) -> Vec<Notice> {
        self.seen
            .lock()
            .expect("sink lock poisoned")
            .iter()
            .map(|(_, notice)| notice.clone())
            .collect()
    }
}

/// Bridge wired to a live broadcaster task, both writing into one sink.
struct Harness {
    bridge: Arc<MessageBridge>,
    sink: Arc<RecordingSink>,
    broadcaster: JoinHandle<u64>,
}

impl Harness {
    fn new() -> Self {
        let sink = Arc::new(RecordingSink::default());
        let (queue, pending) = NoticeQueue::new();
        let broadcaster = spawn_broadcaster(pending, Arc::clone(&sink) as Arc<dyn Broadcast>);
        let bridge = Arc::new(MessageBridge::new(
            BridgeOptions::default(),
            Arc::new(PresenceCounter::new()),
            Arc::clone(&sink) as Arc<dyn Broadcast>,
            queue,
        ));
        Self {
            bridge,
            sink,
            broadcaster,
        }
    }

    /// Drops the bridge so the queue closes, then waits for the broadcaster.
    async fn finish(self) -> Result<(Arc<RecordingSink>, u64)> {
        let Harness {
            bridge,
            sink,
            broadcaster,
        } = self;
        drop(bridge);
        let delivered = broadcaster.await?;
        Ok((sink, delivered))
    }
}

fn connection(port: u16) -> Connection {
    Connection::new(u64::from(port), SocketAddr::from(([127, 0, 0, 1], port)))
}

fn publish(port: u16, message: &str) -> InboundEvent {
    InboundEvent::Publish {
        connection: connection(port),
        address: Some(INBOUND_TOPIC.to_string()),
        body: Some(json!(message)),
    }
}

fn register(port: u16) -> InboundEvent {
    InboundEvent::Register {
        connection: connection(port),
        address: Some(OUTBOUND_TOPIC.to_string()),
    }
}

fn disconnect(port: u16) -> InboundEvent {
    InboundEvent::Disconnect {
        connection: connection(port),
    }
}

async fn handle(bridge: &MessageBridge, event: InboundEvent) -> bool {
    let (ack, verdict) = Ack::channel();
    bridge.on_inbound(event, ack);
    verdict.await.unwrap_or(false)
}

#[tokio::test]
async fn presence_and_message_scenario() -> Result<()> {
    let harness = Harness::new();
    let bridge = Arc::clone(&harness.bridge);

    assert!(!handle(&bridge, publish(5000, "")).await);
    assert!(handle(&bridge, publish(5000, &"a".repeat(140))).await);
    assert!(!handle(&bridge, publish(5000, &"a".repeat(141))).await);
    assert!(handle(&bridge, register(5000)).await);
    assert_eq!(bridge.presence().current(), 1);
    assert!(handle(&bridge, disconnect(5000)).await);
    assert_eq!(bridge.presence().current(), 0);
    drop(bridge);

    let (sink, delivered) = harness.finish().await?;
    assert_eq!(delivered, 2, "only presence notices go through the queue");

    let notices = sink.notices();
    assert_eq!(notices.len(), 3);
    let messages: Vec<_> = notices
        .iter()
        .filter_map(|notice| match notice {
            Notice::Publish { message, .. } => Some(message.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(messages, vec!["a".repeat(140)]);

    let presence: Vec<_> = notices
        .into_iter()
        .filter(|notice| !matches!(notice, Notice::Publish { .. }))
        .collect();
    assert_eq!(presence, vec![Notice::register(1), Notice::close(0)]);
    Ok(())
}

#[tokio::test]
async fn register_notices_track_running_count() -> Result<()> {
    let harness = Harness::new();
    let bridge = Arc::clone(&harness.bridge);

    for port in 1..=3 {
        handle(&bridge, register(port)).await;
    }
    handle(&bridge, disconnect(2)).await;
    handle(&bridge, register(4)).await;
    drop(bridge);

    let (sink, _) = harness.finish().await?;
    assert_eq!(
        sink.notices(),
        vec![
            Notice::register(1),
            Notice::register(2),
            Notice::register(3),
            Notice::close(2),
            Notice::register(3),
        ]
    );
    Ok(())
}

#[tokio::test]
async fn every_event_is_acknowledged_once() -> Result<()> {
    let harness = Harness::new();
    let events = vec![
        publish(1, "hello"),
        publish(1, ""),
        InboundEvent::Publish {
            connection: connection(1),
            address: Some("elsewhere".to_string()),
            body: Some(json!("hello")),
        },
        InboundEvent::Publish {
            connection: connection(1),
            address: None,
            body: None,
        },
        register(1),
        InboundEvent::Register {
            connection: connection(1),
            address: Some(INBOUND_TOPIC.to_string()),
        },
        disconnect(1),
    ];
    let expected = events.len();

    let mut verdicts = Vec::new();
    for event in events {
        let (ack, verdict) = Ack::channel();
        harness.bridge.on_inbound(event, ack);
        verdicts.push(verdict);
    }

    let mut acknowledged = 0;
    let mut accepted = Vec::new();
    for verdict in verdicts {
        accepted.push(verdict.await?);
        acknowledged += 1;
    }

    assert_eq!(acknowledged, expected);
    assert_eq!(accepted, vec![true, false, false, false, true, false, true]);
    harness.finish().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_registers_and_disconnects_balance() -> Result<()> {
    let harness = Harness::new();
    let mut tasks = Vec::new();

    for port in 0..100u16 {
        let bridge = Arc::clone(&harness.bridge);
        tasks.push(tokio::spawn(async move { handle(&bridge, register(port)).await }));
        let bridge = Arc::clone(&harness.bridge);
        tasks.push(tokio::spawn(async move { handle(&bridge, disconnect(port)).await }));
    }

    for task in tasks {
        assert!(task.await?);
    }
    assert_eq!(harness.bridge.presence().current(), 0);

    let (sink, delivered) = harness.finish().await?;
    assert_eq!(delivered, 200);

    let notices = sink.notices();
    let registers = notices
        .iter()
        .filter(|notice| matches!(notice, Notice::Register { .. }))
        .count();
    assert_eq!(registers, 100);
    Ok(())
}
