//! Integration tests for the session engine against an in-memory gateway.
//!
//! # Purpose
//!
//! These tests drive [`SessionManager`] through its public API, the way the
//! headless viewer and UI code use it, with [`MockConnector`] standing in for
//! the WebSocket transport.  The test plays the gateway through
//! [`MockGateway`] / [`MockServer`]: it accepts transports, reads what the
//! viewer sent, and answers with `connectionReady`, `liveData`, binary frames,
//! close frames or transport failures.
//!
//! They verify:
//!
//! - Connect de-duplication while a connect is in flight.
//! - The readiness gate: payload requests wait for `connectionReady` and go
//!   out exactly once.
//! - Reconnection: exponential backoff, the retry budget, the health check
//!   and cancellation on disconnect.
//! - Event fan-out: malformed messages, transport errors, unsubscribing from
//!   inside a handler.
//! - A camera feed decoding frames routed by the preceding `liveData`.
//!
//! # Timing
//!
//! Every async test runs with the Tokio clock paused.  When all tasks are
//! idle the runtime jumps straight to the next timer, so backoff delays of
//! several seconds complete instantly and deterministically.
//!
//! ```text
//! attempt:   1      2      3      4      5      6
//! t (s):     0      1      3      7      15     31    (refused every time)
//!            └─1s─┘ └─2s─┘ └─4s─┘ └─8s──┘ └─16s─┘
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{TimeZone, Utc};
use serde_json::{json, Value};

use vms_core::{
    encode_frame, CameraId, CodecId, Endpoint, ObjectDetection, PlaybackControlType,
    PlaybackSpeed, ServerTarget,
};
use vms_viewer::application::{
    CameraFeed, FrameSink, Raster, SessionManager, Subscription, WireMessage,
};
use vms_viewer::domain::{ChannelState, SessionEvent, ViewerConfig, CLOSE_NORMAL};
use vms_viewer::infrastructure::{MockConnector, MockGateway, MockServer, ProbeBackend};

// ── Helpers ───────────────────────────────────────────────────────────────────

fn target() -> ServerTarget {
    ServerTarget::new("172.16.4.20", 5100)
}

fn engine() -> (SessionManager, MockGateway) {
    let (connector, gateway) = MockConnector::new();
    (SessionManager::new(ViewerConfig::default(), connector), gateway)
}

/// Lets every runnable task finish.  With the clock paused this advances
/// virtual time by only a few milliseconds.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

async fn accept(gateway: &mut MockGateway, endpoint: Endpoint) -> MockServer {
    tokio::time::timeout(Duration::from_secs(120), gateway.accept(endpoint))
        .await
        .expect("timed out waiting for a connect")
        .expect("connector dropped")
}

async fn next_json(server: &mut MockServer) -> Value {
    tokio::time::timeout(Duration::from_secs(5), server.recv_json())
        .await
        .expect("timed out waiting for a message")
        .expect("transport closed")
}

/// Accepts the next transport, checks the `connect` envelope and answers
/// with `connectionReady`.
async fn accept_ready(gateway: &mut MockGateway, endpoint: Endpoint) -> MockServer {
    let mut server = accept(gateway, endpoint).await;
    let connect = next_json(&mut server).await;
    assert_eq!(connect["type"], "connect");
    assert_eq!(connect["serverIp"], "172.16.4.20");
    assert_eq!(connect["serverPort"], 5100);
    server.send_ready(42);
    settle().await;
    server
}

fn record_events(session: &SessionManager) -> (Subscription, Arc<Mutex<Vec<SessionEvent>>>) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let subscription = session.subscribe(move |event| sink.lock().unwrap().push(event.clone()));
    (subscription, events)
}

fn errors(events: &Mutex<Vec<SessionEvent>>) -> Vec<String> {
    events
        .lock()
        .unwrap()
        .iter()
        .filter_map(|event| match event {
            SessionEvent::Error { message, .. } => Some(message.clone()),
            _ => None,
        })
        .collect()
}

// ── Connect de-duplication ────────────────────────────────────────────────────

/// Connect calls that arrive while a connect is in flight are dropped, so
/// exactly one transport is opened.
#[tokio::test(start_paused = true)]
async fn test_duplicate_connects_while_connecting_open_one_transport() {
    // Arrange: hold connects in flight so the channel stays Connecting.
    let (session, mut gateway) = engine();
    gateway.hold_connects();

    // Act
    session.connect_video(target());
    session.connect_video(target());
    session.connect_video(target());
    settle().await;

    // Assert
    assert_eq!(session.status(Endpoint::Video), ChannelState::Connecting);
    assert_eq!(gateway.connect_attempts(Endpoint::Video), 1);

    gateway.release_connects();
    let _server = accept_ready(&mut gateway, Endpoint::Video).await;
    assert!(session.is_ready(Endpoint::Video));
    assert_eq!(gateway.connect_attempts(Endpoint::Video), 1);
    assert!(gateway.try_accept(Endpoint::Video).is_none());
}

// ── Readiness gate ────────────────────────────────────────────────────────────

/// A live request made before `connectionReady` is held, then sent exactly
/// once when the channel becomes ready.
#[tokio::test(start_paused = true)]
async fn test_live_request_waits_for_ready_and_is_sent_once() {
    // Arrange
    let (session, mut gateway) = engine();
    session.connect_video(target());
    let mut server = accept(&mut gateway, Endpoint::Video).await;
    assert_eq!(next_json(&mut server).await["type"], "connect");

    // Act: request while open but not ready.
    session.request_live_video(vec![7]);
    settle().await;

    // Assert: nothing beyond the connect envelope yet.
    assert_eq!(session.status(Endpoint::Video), ChannelState::OpenUnready);
    assert!(server.drain().is_empty());

    server.send_ready(1);
    let live = next_json(&mut server).await;
    assert_eq!(live["type"], "liveInfo");
    assert_eq!(live["cameraIds"], json!([7]));
    assert_eq!(live["serverIp"], "172.16.4.20");

    // A second readiness must not replay the request.
    server.send_ready(2);
    settle().await;
    assert!(server.drain_json().is_empty());
}

/// Only the last camera set requested before readiness is sent.
#[tokio::test(start_paused = true)]
async fn test_deferred_live_request_keeps_last_camera_set() {
    let (session, mut gateway) = engine();
    session.connect_video(target());
    let mut server = accept(&mut gateway, Endpoint::Video).await;
    let _connect = next_json(&mut server).await;

    session.request_live_video(vec![1]);
    session.request_live_video(vec![2, 3]);
    settle().await;
    server.send_ready(1);
    settle().await;

    let sent = server.drain_json();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0]["cameraIds"], json!([2, 3]));
}

/// On a ready channel the request goes out immediately.
#[tokio::test(start_paused = true)]
async fn test_live_request_on_ready_channel_is_sent_immediately() {
    let (session, mut gateway) = engine();
    session.connect_video(target());
    let mut server = accept_ready(&mut gateway, Endpoint::Video).await;

    session.request_live_video(vec![11, 12]);

    let live = next_json(&mut server).await;
    assert_eq!(live["type"], "liveInfo");
    assert_eq!(live["cameraIds"], json!([11, 12]));
}

/// Asking for video on a cleanly closed channel reconnects first.
#[tokio::test(start_paused = true)]
async fn test_live_request_on_closed_channel_reconnects_first() {
    // Arrange: a ready channel that the server then closes cleanly.
    let (session, mut gateway) = engine();
    session.connect_video(target());
    let server = accept_ready(&mut gateway, Endpoint::Video).await;
    server.close(CLOSE_NORMAL, "maintenance");
    settle().await;
    assert_eq!(session.status(Endpoint::Video), ChannelState::ClosedClean);

    // Act
    session.request_live_video(vec![5]);

    // Assert
    let mut server = accept_ready(&mut gateway, Endpoint::Video).await;
    let live = next_json(&mut server).await;
    assert_eq!(live["cameraIds"], json!([5]));
    assert_eq!(gateway.connect_attempts(Endpoint::Video), 2);
}

// ── Control channel deferral ──────────────────────────────────────────────────

/// A speed change issued before the control channel exists is sent exactly
/// once on readiness, then forgotten.
#[tokio::test(start_paused = true)]
async fn test_deferred_speed_change_is_sent_once_on_ready() {
    // Arrange: the command arrives before any connect; it must not connect.
    let (session, mut gateway) = engine();
    session.send_playback_control(PlaybackControlType::Speed, Some(PlaybackSpeed::X4));
    settle().await;
    assert_eq!(gateway.connect_attempts(Endpoint::Control), 0);

    // Act
    session.connect_control(target());
    let mut server = accept_ready(&mut gateway, Endpoint::Control).await;

    // Assert
    let sent = server.drain_json();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0]["type"], "playbackControl");
    assert_eq!(sent[0]["controlType"], PlaybackControlType::Speed.wire_code());
    assert_eq!(sent[0]["speed"], PlaybackSpeed::X4.wire_code());

    // The slot is clear: a reconnect and a fresh readiness send nothing.
    server.close(4000, "restart");
    let mut server = accept_ready(&mut gateway, Endpoint::Control).await;
    assert!(server.drain_json().is_empty());
}

/// A speed change issued while the control channel is open but not yet
/// ready waits for `connectionReady` and is sent exactly once.
#[tokio::test(start_paused = true)]
async fn test_speed_change_while_open_unready_waits_for_ready() {
    // Arrange: transport open, gateway has not confirmed the session
    let (session, mut gateway) = engine();
    session.connect_control(target());
    let mut server = accept(&mut gateway, Endpoint::Control).await;
    let _connect = next_json(&mut server).await;
    assert_eq!(session.status(Endpoint::Control), ChannelState::OpenUnready);

    // Act
    session.send_playback_control(PlaybackControlType::Speed, Some(PlaybackSpeed::X4));
    settle().await;
    let before_ready = server.drain_json();
    server.send_ready(1);
    settle().await;

    // Assert
    assert!(before_ready.is_empty());
    let sent = server.drain_json();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0]["type"], "playbackControl");
    assert_eq!(sent[0]["controlType"], 3);
    assert_eq!(sent[0]["speed"], PlaybackSpeed::X4.wire_code());
}

/// The control slot holds one request; the most recent one wins.
#[tokio::test(start_paused = true)]
async fn test_control_slot_is_last_write_wins() {
    let (session, mut gateway) = engine();
    session.connect_control(target());
    let mut server = accept(&mut gateway, Endpoint::Control).await;
    let _connect = next_json(&mut server).await;

    let start = Utc.with_ymd_and_hms(2024, 5, 6, 12, 0, 0).unwrap();
    session.request_playback(vec![3], start, 60);
    session.send_playback_control(PlaybackControlType::Play, None);
    settle().await;
    server.send_ready(1);
    settle().await;

    let sent = server.drain_json();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0]["type"], "playbackControl");
    assert_eq!(sent[0]["controlType"], PlaybackControlType::Play.wire_code());
}

/// A playback request on a closed control channel starts the connect itself.
#[tokio::test(start_paused = true)]
async fn test_playback_request_on_closed_channel_connects() {
    let (session, mut gateway) = engine();
    session.connect_control(target());
    let server = accept_ready(&mut gateway, Endpoint::Control).await;
    server.close(CLOSE_NORMAL, "done");
    settle().await;

    let start = Utc.with_ymd_and_hms(2024, 5, 6, 12, 0, 0).unwrap();
    session.request_playback(vec![4, 5], start, 300);

    let mut server = accept_ready(&mut gateway, Endpoint::Control).await;
    let info = next_json(&mut server).await;
    assert_eq!(info["type"], "playbackInfo");
    assert_eq!(info["cameraIds"], json!([4, 5]));
    assert_eq!(info["startTime"], "2024-05-06T12:00:00.000Z");
    assert_eq!(info["duration"], 300);
}

// ── Reconnection ──────────────────────────────────────────────────────────────

/// A server that keeps refusing sees the first attempt plus five retries,
/// and nothing after that, not even from the health check.
#[tokio::test(start_paused = true)]
async fn test_refused_connects_stop_after_five_retries() {
    // Arrange
    let (session, gateway) = engine();
    let (_sub, events) = record_events(&session);
    gateway.refuse(Endpoint::Video, true);

    // Act: 1 + 2 + 4 + 8 + 16 = 31 s of backoff, then well past several
    // health-check periods.
    session.connect_video(target());
    tokio::time::sleep(Duration::from_secs(40)).await;
    assert_eq!(gateway.connect_attempts(Endpoint::Video), 6);
    tokio::time::sleep(Duration::from_secs(120)).await;

    // Assert
    assert_eq!(gateway.connect_attempts(Endpoint::Video), 6);
    assert_eq!(session.status(Endpoint::Video), ChannelState::ClosedError);
    assert_eq!(errors(&events).len(), 6);
    assert!(errors(&events).iter().all(|m| m == "WebSocket error"));
}

/// Retries follow the exponential schedule.
#[tokio::test(start_paused = true)]
async fn test_retry_delays_double() {
    let (session, gateway) = engine();
    gateway.refuse(Endpoint::Control, true);

    session.connect_control(target());
    settle().await;
    assert_eq!(gateway.connect_attempts(Endpoint::Control), 1);

    // Retry 1 is due at 1 s, retry 2 at 3 s, retry 3 at 7 s.
    tokio::time::sleep(Duration::from_millis(995)).await;
    assert_eq!(gateway.connect_attempts(Endpoint::Control), 2);
    tokio::time::sleep(Duration::from_millis(1_900)).await;
    assert_eq!(gateway.connect_attempts(Endpoint::Control), 2);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(gateway.connect_attempts(Endpoint::Control), 3);
    tokio::time::sleep(Duration::from_secs(4)).await;
    assert_eq!(gateway.connect_attempts(Endpoint::Control), 4);
}

/// An explicit connect after exhaustion starts a fresh retry budget.
#[tokio::test(start_paused = true)]
async fn test_explicit_connect_after_exhaustion_recovers() {
    let (session, mut gateway) = engine();
    gateway.refuse(Endpoint::Video, true);
    session.connect_video(target());
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(gateway.connect_attempts(Endpoint::Video), 6);

    gateway.refuse(Endpoint::Video, false);
    session.connect_video(target());

    let _server = accept_ready(&mut gateway, Endpoint::Video).await;
    assert_eq!(session.status(Endpoint::Video), ChannelState::Ready);
    assert_eq!(gateway.connect_attempts(Endpoint::Video), 7);
}

/// An abnormal close marks the channel errored and reconnects after the
/// base delay.
#[tokio::test(start_paused = true)]
async fn test_abnormal_close_reconnects() {
    // Arrange
    let (session, mut gateway) = engine();
    let (_sub, events) = record_events(&session);
    session.connect_video(target());
    let server = accept_ready(&mut gateway, Endpoint::Video).await;

    // Act
    server.close(1011, "internal error");
    settle().await;

    // Assert
    assert_eq!(session.status(Endpoint::Video), ChannelState::ClosedError);
    assert!(events.lock().unwrap().contains(&SessionEvent::ChannelClosed {
        endpoint: Endpoint::Video,
        code: 1011,
        reason: "internal error".to_string(),
    }));

    let _server = accept_ready(&mut gateway, Endpoint::Video).await;
    assert_eq!(gateway.connect_attempts(Endpoint::Video), 2);
    assert!(session.is_ready(Endpoint::Video));
}

/// A transport that ends without a close frame counts as abnormal.
#[tokio::test(start_paused = true)]
async fn test_dropped_transport_is_abnormal_close() {
    let (session, mut gateway) = engine();
    let (_sub, events) = record_events(&session);
    session.connect_control(target());
    let server = accept_ready(&mut gateway, Endpoint::Control).await;

    drop(server);
    settle().await;

    assert_eq!(session.status(Endpoint::Control), ChannelState::ClosedError);
    let closed = events.lock().unwrap().iter().any(|event| {
        matches!(
            event,
            SessionEvent::ChannelClosed { endpoint: Endpoint::Control, code: 1006, .. }
        )
    });
    assert!(closed);
}

/// A clean server close schedules no retry; the health check revives the
/// channel on its next tick.
#[tokio::test(start_paused = true)]
async fn test_health_check_revives_cleanly_closed_channel() {
    // Arrange
    let (session, mut gateway) = engine();
    session.connect_video(target());
    let server = accept_ready(&mut gateway, Endpoint::Video).await;

    // Act
    server.close(CLOSE_NORMAL, "maintenance");
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(session.status(Endpoint::Video), ChannelState::ClosedClean);
    assert_eq!(gateway.connect_attempts(Endpoint::Video), 1);

    // Assert: the first tick is 15 s after the monitor started.
    tokio::time::sleep(Duration::from_secs(11)).await;
    assert_eq!(gateway.connect_attempts(Endpoint::Video), 2);
    let _server = accept_ready(&mut gateway, Endpoint::Video).await;
    assert!(session.is_ready(Endpoint::Video));
}

// ── Disconnect ────────────────────────────────────────────────────────────────

/// Disconnect closes live channels with code 1000, reports it, and leaves
/// them closed.
#[tokio::test(start_paused = true)]
async fn test_disconnect_closes_live_channels_cleanly() {
    // Arrange
    let (session, mut gateway) = engine();
    let (_sub, events) = record_events(&session);
    session.connect_video(target());
    session.connect_control(target());
    let mut video = accept_ready(&mut gateway, Endpoint::Video).await;
    let mut control = accept_ready(&mut gateway, Endpoint::Control).await;

    // Act
    session.disconnect();
    settle().await;

    // Assert
    for server in [&mut video, &mut control] {
        match server.recv().await {
            Some(WireMessage::Close { code, .. }) => assert_eq!(code, CLOSE_NORMAL),
            other => panic!("expected a close frame, got {other:?}"),
        }
    }
    for endpoint in Endpoint::ALL {
        assert_eq!(session.status(endpoint), ChannelState::ClosedClean);
        assert!(events.lock().unwrap().contains(&SessionEvent::ChannelClosed {
            endpoint,
            code: CLOSE_NORMAL,
            reason: "client disconnect".to_string(),
        }));
    }

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(gateway.connect_attempts(Endpoint::Video), 1);
    assert_eq!(gateway.connect_attempts(Endpoint::Control), 1);
}

/// Disconnect cancels a pending retry and the health check.
#[tokio::test(start_paused = true)]
async fn test_disconnect_cancels_pending_retry() {
    // Arrange: an abnormal close leaves a retry due at 1 s.
    let (session, mut gateway) = engine();
    session.connect_video(target());
    let server = accept_ready(&mut gateway, Endpoint::Video).await;
    drop(server);
    settle().await;

    // Act
    session.disconnect();
    tokio::time::sleep(Duration::from_secs(120)).await;

    // Assert
    assert_eq!(gateway.connect_attempts(Endpoint::Video), 1);
}

/// Requests deferred before a disconnect are forgotten by it.
#[tokio::test(start_paused = true)]
async fn test_disconnect_forgets_deferred_requests() {
    let (session, mut gateway) = engine();
    session.connect_video(target());
    let mut server = accept(&mut gateway, Endpoint::Video).await;
    let _connect = next_json(&mut server).await;
    session.request_live_video(vec![9]);

    session.disconnect();
    session.connect_video(target());
    let mut server = accept_ready(&mut gateway, Endpoint::Video).await;

    assert!(server.drain_json().is_empty());
}

// ── Inbound handling ──────────────────────────────────────────────────────────

/// Unparseable text is dropped without an event or a state change.
#[tokio::test(start_paused = true)]
async fn test_malformed_message_is_ignored() {
    let (session, mut gateway) = engine();
    let (_sub, events) = record_events(&session);
    session.connect_video(target());
    let mut server = accept(&mut gateway, Endpoint::Video).await;
    let _connect = next_json(&mut server).await;

    server.send_text("{not json");
    server.send_json(&json!({"type": "somethingNew", "value": 1}));
    server.send_ready(3);
    settle().await;

    assert!(session.is_ready(Endpoint::Video));
    assert!(errors(&events).is_empty());
    let ready = events.lock().unwrap().contains(&SessionEvent::Ready {
        endpoint: Endpoint::Video,
        client_key: 3,
    });
    assert!(ready);
}

/// A transport failure is published as "WebSocket error"; the next
/// readiness clears it.
#[tokio::test(start_paused = true)]
async fn test_transport_failure_publishes_websocket_error() {
    // Arrange
    let (session, mut gateway) = engine();
    let (_sub, events) = record_events(&session);
    session.connect_video(target());
    let server = accept_ready(&mut gateway, Endpoint::Video).await;

    // Act
    server.fail("connection reset by peer");
    settle().await;

    // Assert
    assert_eq!(errors(&events), vec!["WebSocket error".to_string()]);
    assert_eq!(session.last_error().as_deref(), Some("WebSocket error"));
    assert_eq!(session.status(Endpoint::Video), ChannelState::ClosedError);

    let _server = accept_ready(&mut gateway, Endpoint::Video).await;
    assert_eq!(session.last_error(), None);
}

/// Gateway-reported errors reach subscribers with their message.
#[tokio::test(start_paused = true)]
async fn test_gateway_error_is_forwarded() {
    let (session, mut gateway) = engine();
    let (_sub, events) = record_events(&session);
    session.connect_control(target());
    let server = accept_ready(&mut gateway, Endpoint::Control).await;

    server.send_json(&json!({"type": "error", "message": "camera 3 offline"}));
    settle().await;

    assert_eq!(errors(&events), vec!["camera 3 offline".to_string()]);
    assert_eq!(session.last_error().as_deref(), Some("camera 3 offline"));
    assert!(session.is_ready(Endpoint::Control));
}

/// A handler that unsubscribes itself sees exactly one event, and the other
/// subscribers keep receiving.
#[tokio::test(start_paused = true)]
async fn test_unsubscribe_from_inside_handler() {
    // Arrange
    let (session, mut gateway) = engine();
    let calls = Arc::new(AtomicUsize::new(0));
    let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
    let subscription = {
        let calls = Arc::clone(&calls);
        let slot = Arc::clone(&slot);
        session.subscribe(move |_event| {
            calls.fetch_add(1, Ordering::SeqCst);
            if let Some(mut own) = slot.lock().unwrap().take() {
                own.unsubscribe();
            }
        })
    };
    *slot.lock().unwrap() = Some(subscription);
    let (_other, events) = record_events(&session);

    // Act: opened, ready, and a connection event.
    session.connect_video(target());
    let server = accept_ready(&mut gateway, Endpoint::Video).await;
    server.send_json(&json!({"type": "connection", "connected": true}));
    settle().await;

    // Assert
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(events.lock().unwrap().len(), 3);
}

/// Dropping the last handle shuts the engine down and closes the transport.
#[tokio::test(start_paused = true)]
async fn test_dropping_session_closes_channels() {
    let (session, mut gateway) = engine();
    session.connect_video(target());
    let mut server = accept_ready(&mut gateway, Endpoint::Video).await;

    drop(session);
    settle().await;

    match server.recv().await {
        Some(WireMessage::Close { code, .. }) => assert_eq!(code, CLOSE_NORMAL),
        other => panic!("expected a close frame, got {other:?}"),
    }
}

// ── Camera feed ───────────────────────────────────────────────────────────────

type Presented = Arc<Mutex<Vec<(CameraId, u32, u32, usize)>>>;

struct RecordingSink(Presented);

impl FrameSink for RecordingSink {
    fn present(&mut self, camera_id: CameraId, raster: &Raster, objects: &[ObjectDetection]) {
        self.0
            .lock()
            .unwrap()
            .push((camera_id, raster.width, raster.height, objects.len()));
    }
}

/// SOI, an APP0 stub, SOF0 for 640x480, EOI.
fn tiny_jpeg() -> Vec<u8> {
    vec![
        0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x04, 0x4A, 0x46, 0xFF, 0xC0, 0x00, 0x0B, 0x08, 0x01, 0xE0,
        0x02, 0x80, 0x01, 0x01, 0x11, 0x00, 0xFF, 0xD9,
    ]
}

fn live_data(camera_id: CameraId, objects: Value) -> Value {
    json!({
        "type": "liveData",
        "cameraId": camera_id,
        "timestamp": 1_714_982_400_000_i64,
        "codec": "MJPEG",
        "intraCode": "INTRA",
        "objects": objects,
    })
}

/// End to end: the feed requests its camera on readiness and presents only
/// the frames announced for it.
#[tokio::test(start_paused = true)]
async fn test_camera_feed_presents_frames_announced_for_it() {
    // Arrange
    let (session, mut gateway) = engine();
    let presented: Presented = Arc::default();
    let feed = CameraFeed::attach(
        &session,
        7,
        Box::new(ProbeBackend),
        Box::new(RecordingSink(Arc::clone(&presented))),
    );
    session.connect_video(target());
    let mut server = accept_ready(&mut gateway, Endpoint::Video).await;
    let live = next_json(&mut server).await;
    assert_eq!(live["cameraIds"], json!([7]));
    assert!(feed.is_requested());

    // Act
    let frame = encode_frame(CodecId::Mjpeg, None, &tiny_jpeg());
    let person = json!([{
        "type": "PERSON", "x": 10.0, "y": 20.0, "width": 5.0, "height": 15.0,
        "detectionScore": 0.9
    }]);
    server.send_json(&live_data(7, person));
    server.send_binary(frame.clone());
    // Unannounced frame.
    server.send_binary(frame.clone());
    // Frame for another camera.
    server.send_json(&live_data(8, json!([])));
    server.send_binary(frame);
    settle().await;

    // Assert
    assert_eq!(*presented.lock().unwrap(), vec![(7, 640, 480, 1)]);
    let view = feed.view();
    assert!(view.ready);
    assert_eq!(view.frames_presented, 1);
    assert_eq!(view.objects.len(), 1);
    assert_eq!(view.objects[0].class_label, "PERSON");
}

/// After a reconnect the feed requests its camera again.
#[tokio::test(start_paused = true)]
async fn test_camera_feed_rerequests_after_reconnect() {
    let (session, mut gateway) = engine();
    let feed = CameraFeed::attach(
        &session,
        3,
        Box::new(ProbeBackend),
        Box::new(RecordingSink(Arc::default())),
    );
    session.connect_video(target());
    let mut server = accept_ready(&mut gateway, Endpoint::Video).await;
    assert_eq!(next_json(&mut server).await["cameraIds"], json!([3]));

    server.close(1011, "restart");
    settle().await;
    assert!(!feed.is_requested());
    assert!(!feed.view().ready);

    let mut server = accept_ready(&mut gateway, Endpoint::Video).await;
    assert_eq!(next_json(&mut server).await["cameraIds"], json!([3]));
    assert!(feed.is_requested());
}
