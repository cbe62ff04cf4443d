//! Status channel behaviour against a scripted push transport
//!
//! Runs on a paused clock so connect delays and reconnect backoff elapse
//! instantly once every task is idle.

use async_trait::async_trait;
use bridge_traits::error::{BridgeError, Result as BridgeResult};
use bridge_traits::realtime::{PushConnection, PushTransport};
use core_runtime::config::StatusChannelConfig;
use core_runtime::events::{CoreEvent, EventBus, Receiver, StatusEvent};
use core_status::{StatusChannel, StatusError, StatusSnapshot};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};

const WS_BASE: &str = "wss://annotate.example.com";

enum Frame {
    Text(String),
    Error(String),
}

struct ScriptedConnection {
    frames: mpsc::UnboundedReceiver<Frame>,
    closed: Arc<AtomicUsize>,
}

#[async_trait]
impl PushConnection for ScriptedConnection {
    async fn next_text(&mut self) -> BridgeResult<Option<String>> {
        match self.frames.recv().await {
            Some(Frame::Text(text)) => Ok(Some(text)),
            Some(Frame::Error(reason)) => Err(BridgeError::ConnectionClosed(reason)),
            None => Ok(None),
        }
    }

    async fn close(&mut self) -> BridgeResult<()> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Hands out prepared connections in order, refusing once they run out.
#[derive(Default)]
struct ScriptedTransport {
    pending: Mutex<VecDeque<mpsc::UnboundedReceiver<Frame>>>,
    urls: Mutex<Vec<String>>,
    closed: Arc<AtomicUsize>,
}

impl ScriptedTransport {
    fn accept_next(&self) -> mpsc::UnboundedSender<Frame> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.pending.lock().unwrap().push_back(rx);
        tx
    }

    fn connects(&self) -> usize {
        self.urls.lock().unwrap().len()
    }

    fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PushTransport for ScriptedTransport {
    async fn connect(&self, url: &str) -> BridgeResult<Box<dyn PushConnection>> {
        self.urls.lock().unwrap().push(url.to_string());
        let frames = self
            .pending
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| BridgeError::NotAvailable("connection refused".to_string()))?;
        Ok(Box::new(ScriptedConnection {
            frames,
            closed: Arc::clone(&self.closed),
        }))
    }
}

struct Fixture {
    transport: Arc<ScriptedTransport>,
    channel: StatusChannel,
    events: Receiver<CoreEvent>,
}

fn mount_with(config: StatusChannelConfig, transport: Arc<ScriptedTransport>) -> Fixture {
    let event_bus = EventBus::new(64);
    let events = event_bus.subscribe();
    let channel = StatusChannel::mount(transport.clone(), config, "datasets", "42", event_bus)
        .unwrap();
    Fixture {
        transport,
        channel,
        events,
    }
}

fn mount(transport: Arc<ScriptedTransport>) -> Fixture {
    mount_with(StatusChannelConfig::new(WS_BASE), transport)
}

fn status_events(events: &mut Receiver<CoreEvent>) -> Vec<StatusEvent> {
    let mut collected = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let CoreEvent::Status(event) = event {
            collected.push(event);
        }
    }
    collected
}

async fn wait_until<F>(rx: &mut watch::Receiver<StatusSnapshot>, predicate: F)
where
    F: FnMut(&StatusSnapshot) -> bool,
{
    tokio::time::timeout(Duration::from_secs(120), rx.wait_for(predicate))
        .await
        .expect("timed out waiting for channel state")
        .expect("channel task exited");
}

fn update(status: &str, message: Option<&str>) -> Frame {
    let mut body = serde_json::json!({
        "type": "status_update",
        "dataset_id": "42",
        "status": status,
    });
    if let Some(message) = message {
        body["message"] = serde_json::Value::from(message);
    }
    Frame::Text(body.to_string())
}

#[tokio::test(start_paused = true)]
async fn test_connects_after_delay() {
    let transport = Arc::new(ScriptedTransport::default());
    let _frames = transport.accept_next();
    let mut f = mount(Arc::clone(&transport));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(f.transport.connects(), 0);
    assert!(!f.channel.is_connected());

    let mut rx = f.channel.subscribe();
    wait_until(&mut rx, |s| s.is_connected).await;

    assert_eq!(
        *f.transport.urls.lock().unwrap(),
        vec!["wss://annotate.example.com/ws/datasets/42/".to_string()]
    );
    assert_eq!(f.channel.url(), "wss://annotate.example.com/ws/datasets/42/");
    assert_eq!(
        status_events(&mut f.events),
        vec![StatusEvent::Connected {
            resource_kind: "datasets".to_string(),
            resource_id: "42".to_string()
        }]
    );
}

#[tokio::test(start_paused = true)]
async fn test_status_updates_are_published() {
    let transport = Arc::new(ScriptedTransport::default());
    let frames = transport.accept_next();
    let mut f = mount(Arc::clone(&transport));
    let mut rx = f.channel.subscribe();
    wait_until(&mut rx, |s| s.is_connected).await;

    frames.send(update("processing", Some("3/10"))).unwrap();
    wait_until(&mut rx, |s| s.status == "processing").await;
    assert_eq!(f.channel.message(), "3/10");

    frames.send(update("completed", None)).unwrap();
    wait_until(&mut rx, |s| s.status == "completed").await;
    assert_eq!(
        f.channel.snapshot(),
        StatusSnapshot {
            status: "completed".to_string(),
            message: String::new(),
            is_connected: true,
        }
    );

    let updates: Vec<_> = status_events(&mut f.events)
        .into_iter()
        .filter(|e| matches!(e, StatusEvent::Updated { .. }))
        .collect();
    assert_eq!(
        updates,
        vec![
            StatusEvent::Updated {
                resource_id: "42".to_string(),
                status: "processing".to_string(),
                message: "3/10".to_string(),
            },
            StatusEvent::Updated {
                resource_id: "42".to_string(),
                status: "completed".to_string(),
                message: String::new(),
            },
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_malformed_frames_leave_state_unchanged() {
    let transport = Arc::new(ScriptedTransport::default());
    let frames = transport.accept_next();
    let f = mount(Arc::clone(&transport));
    let mut rx = f.channel.subscribe();
    wait_until(&mut rx, |s| s.is_connected).await;

    frames.send(update("processing", Some("3/10"))).unwrap();
    wait_until(&mut rx, |s| s.status == "processing").await;
    let before = f.channel.snapshot();

    frames.send(Frame::Text("{not json".to_string())).unwrap();
    frames
        .send(Frame::Text(r#"{"type": "status_update"}"#.to_string()))
        .unwrap();
    frames
        .send(Frame::Text(r#"{"type": "heartbeat"}"#.to_string()))
        .unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(f.channel.snapshot(), before);
    assert!(f.channel.is_connected());
    assert_eq!(f.transport.connects(), 1);
    assert!(!frames.is_closed());
}

#[tokio::test(start_paused = true)]
async fn test_reconnects_after_connection_drops() {
    let transport = Arc::new(ScriptedTransport::default());
    let first = transport.accept_next();
    let _second = transport.accept_next();
    let mut f = mount(Arc::clone(&transport));
    let mut rx = f.channel.subscribe();
    wait_until(&mut rx, |s| s.is_connected).await;

    first.send(update("processing", None)).unwrap();
    wait_until(&mut rx, |s| s.status == "processing").await;
    first.send(Frame::Error("reset by peer".to_string())).unwrap();

    wait_until(&mut rx, |s| !s.is_connected).await;
    wait_until(&mut rx, |s| s.is_connected).await;

    assert_eq!(f.transport.connects(), 2);
    assert_eq!(f.channel.status(), "processing");
    let events = status_events(&mut f.events);
    assert!(events.iter().any(|e| matches!(
        e,
        StatusEvent::Disconnected { reason: Some(reason), .. } if reason.contains("reset by peer")
    )));
    assert!(events.contains(&StatusEvent::Reconnecting {
        resource_id: "42".to_string(),
        attempt: 1,
    }));
}

#[tokio::test(start_paused = true)]
async fn test_gives_up_after_max_attempts() {
    let transport = Arc::new(ScriptedTransport::default());
    let frames = transport.accept_next();
    let config = StatusChannelConfig {
        max_reconnect_attempts: 2,
        ..StatusChannelConfig::new(WS_BASE)
    };
    let mut f = mount_with(config, Arc::clone(&transport));
    let mut rx = f.channel.subscribe();
    wait_until(&mut rx, |s| s.is_connected).await;

    drop(frames);
    tokio::time::sleep(Duration::from_secs(60)).await;

    assert_eq!(f.transport.connects(), 3);
    assert!(!f.channel.is_connected());
    let attempts: Vec<u32> = status_events(&mut f.events)
        .into_iter()
        .filter_map(|e| match e {
            StatusEvent::Reconnecting { attempt, .. } => Some(attempt),
            _ => None,
        })
        .collect();
    assert_eq!(attempts, vec![1, 2]);
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_disabled() {
    let transport = Arc::new(ScriptedTransport::default());
    let frames = transport.accept_next();
    let config = StatusChannelConfig {
        max_reconnect_attempts: 0,
        ..StatusChannelConfig::new(WS_BASE)
    };
    let f = mount_with(config, Arc::clone(&transport));
    let mut rx = f.channel.subscribe();
    wait_until(&mut rx, |s| s.is_connected).await;

    drop(frames);
    tokio::time::sleep(Duration::from_secs(60)).await;

    assert_eq!(f.transport.connects(), 1);
    assert!(!f.channel.is_connected());
}

#[tokio::test(start_paused = true)]
async fn test_unmount_closes_connection() {
    let transport = Arc::new(ScriptedTransport::default());
    let frames = transport.accept_next();
    let f = mount(Arc::clone(&transport));
    let mut rx = f.channel.subscribe();
    wait_until(&mut rx, |s| s.is_connected).await;

    f.channel.unmount().await.unwrap();

    assert_eq!(transport.closed(), 1);
    assert!(frames.is_closed());
    assert!(!rx.borrow().is_connected);
}

#[tokio::test(start_paused = true)]
async fn test_unmount_before_connect() {
    let transport = Arc::new(ScriptedTransport::default());
    let _frames = transport.accept_next();
    let f = mount(Arc::clone(&transport));

    f.channel.unmount().await.unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(transport.connects(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_drop_stops_channel() {
    let transport = Arc::new(ScriptedTransport::default());
    let _frames = transport.accept_next();
    let f = mount(Arc::clone(&transport));
    let mut rx = f.channel.subscribe();
    wait_until(&mut rx, |s| s.is_connected).await;

    drop(f.channel);
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(transport.closed(), 1);
}

#[tokio::test]
async fn test_rejects_invalid_resource_ids() {
    let transport: Arc<dyn PushTransport> = Arc::new(ScriptedTransport::default());

    for id in ["", "42/../admin"] {
        let result = StatusChannel::mount(
            Arc::clone(&transport),
            StatusChannelConfig::new(WS_BASE),
            "datasets",
            id,
            EventBus::new(4),
        );
        assert!(matches!(result, Err(StatusError::InvalidResource(_))));
    }
}
