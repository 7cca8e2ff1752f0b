use std::net::SocketAddr;
use std::time::Duration;

use duet_common::protocol::frame::{
    encode_awareness, encode_signal, encode_state_summary, encode_update,
};
use duet_common::protocol::{decode_frame, Frame, SignalEnvelope, SignalKind};
use duet_common::seed::SeedContent;
use duet_relay::bootstrap;
use duet_relay::config::RelayConfig;
use duet_relay::room::RoomId;
use duet_relay::{serve, RelayState};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};
use tokio_tungstenite::{
    connect_async, tungstenite::Message as WsMessage, MaybeTlsStream, WebSocketStream,
};
use yrs::sync::{Awareness, SyncMessage};
use yrs::updates::decoder::Decode;
use yrs::{Doc, GetString, StateVector, Text, Transact, Update};

type ClientSocket = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

const RECV_TIMEOUT: Duration = Duration::from_secs(2);
const SILENCE: Duration = Duration::from_millis(200);

struct TestRelay {
    addr: SocketAddr,
    state: RelayState,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl TestRelay {
    async fn start(heartbeat_interval: Duration) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("test listener should bind");
        let addr = listener.local_addr().expect("listener should expose local address");

        let config = RelayConfig { heartbeat_interval, ..RelayConfig::default() };
        let state = RelayState::new(&config);
        let (shutdown, shutdown_rx) = oneshot::channel::<()>();
        let server_state = state.clone();
        let task = tokio::spawn(async move {
            serve(listener, server_state, &config, async {
                let _ = shutdown_rx.await;
            })
            .await
            .expect("relay server should run");
        });

        Self { addr, state, shutdown: Some(shutdown), task }
    }

    async fn connect(&self, room: &str) -> ClientSocket {
        let (socket, _) = connect_async(format!("ws://{}/{room}", self.addr))
            .await
            .expect("client should connect");
        socket
    }

    /// Connect and consume the state summary and presence snapshot.
    async fn join(&self, room: &str) -> ClientSocket {
        let mut socket = self.connect(room).await;
        assert!(matches!(recv_frame(&mut socket).await, Frame::Sync(SyncMessage::SyncStep1(_))));
        assert!(matches!(recv_frame(&mut socket).await, Frame::Awareness(_)));
        socket
    }

    async fn stop(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        self.task.abort();
    }
}

async fn recv_frame(socket: &mut ClientSocket) -> Frame {
    let deadline = Instant::now() + RECV_TIMEOUT;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let message = timeout(remaining, socket.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("socket closed while waiting for a frame")
            .expect("socket errored while waiting for a frame");
        match message {
            WsMessage::Binary(payload) => {
                return decode_frame(&payload).expect("relay frames should decode")
            }
            WsMessage::Ping(_) | WsMessage::Pong(_) => continue,
            other => panic!("unexpected websocket message: {other:?}"),
        }
    }
}

async fn assert_silent(socket: &mut ClientSocket) {
    let deadline = Instant::now() + SILENCE;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match timeout(remaining, socket.next()).await {
            Err(_) => return,
            Ok(Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_)))) => continue,
            Ok(other) => panic!("expected silence, got {other:?}"),
        }
    }
}

async fn send(socket: &mut ClientSocket, frame: Vec<u8>) {
    socket.send(WsMessage::Binary(frame.into())).await.expect("client should send frame");
}

fn text_update(client_id: u64, content: &str) -> Vec<u8> {
    let doc = Doc::with_client_id(client_id);
    let text = doc.get_or_insert_text("monaco");
    let mut txn = doc.transact_mut();
    text.insert(&mut txn, 0, content);
    txn.encode_update_v1()
}

fn apply(doc: &Doc, update: &[u8]) {
    doc.transact_mut()
        .apply_update(Update::decode_v1(update).expect("update should decode"))
        .expect("update should apply");
}

fn monaco(doc: &Doc) -> String {
    let text = doc.get_or_insert_text("monaco");
    text.get_string(&doc.transact())
}

fn expect_signal(frame: Frame) -> SignalEnvelope {
    match frame {
        Frame::Signal(envelope) => envelope,
        other => panic!("expected a signal, got {other:?}"),
    }
}

#[tokio::test]
async fn edits_reach_live_peers_and_late_joiners() {
    let relay = TestRelay::start(Duration::from_secs(30)).await;
    let mut a = relay.connect("r1").await;
    let Frame::Sync(SyncMessage::SyncStep1(empty_summary)) = recv_frame(&mut a).await else {
        panic!("joiner should first receive a state summary");
    };
    assert_eq!(empty_summary, StateVector::default());
    let Frame::Awareness(empty_snapshot) = recv_frame(&mut a).await else {
        panic!("joiner should then receive a presence snapshot");
    };
    assert!(empty_snapshot.clients.values().all(|entry| &*entry.json == "null"));
    let mut b = relay.join("r1").await;

    send(&mut a, encode_update(text_update(1, "hello"))).await;

    let Frame::Sync(SyncMessage::Update(update)) = recv_frame(&mut b).await else {
        panic!("peer should receive the update");
    };
    let b_doc = Doc::with_client_id(2);
    apply(&b_doc, &update);
    assert_eq!(monaco(&b_doc), "hello");
    assert_silent(&mut a).await;

    let mut c = relay.connect("r1").await;
    let Frame::Sync(SyncMessage::SyncStep1(summary)) = recv_frame(&mut c).await else {
        panic!("late joiner should first receive a state summary");
    };
    assert_eq!(summary.get(&1), 5);
    assert!(matches!(recv_frame(&mut c).await, Frame::Awareness(_)));
    send(&mut c, encode_state_summary(StateVector::default())).await;
    let Frame::Sync(SyncMessage::SyncStep2(delta)) = recv_frame(&mut c).await else {
        panic!("late joiner should receive a delta");
    };
    let c_doc = Doc::with_client_id(3);
    apply(&c_doc, &delta);
    assert_eq!(monaco(&c_doc), "hello");

    let room = relay.state.rooms.get(&RoomId::new("r1")).await.expect("room should exist");
    assert_eq!(room.lock_state().await.replica.text_content(), "hello");

    relay.stop().await;
}

#[tokio::test]
async fn rooms_do_not_leak_into_each_other() {
    let relay = TestRelay::start(Duration::from_secs(30)).await;
    let mut a = relay.join("left").await;
    let mut b = relay.join("right").await;
    let mut default_room = relay.join("").await;

    send(&mut a, encode_update(text_update(1, "private"))).await;
    assert_silent(&mut b).await;
    assert_silent(&mut default_room).await;

    assert!(relay.state.rooms.get(&RoomId::new("default")).await.is_some());
    relay.stop().await;
}

#[tokio::test]
async fn presence_is_cleared_when_its_owner_disconnects() {
    let relay = TestRelay::start(Duration::from_secs(30)).await;
    let mut x = relay.join("r1").await;
    let mut y = relay.join("r1").await;

    let presence = Awareness::new(Doc::with_client_id(10));
    presence.set_local_state(json!({ "user": { "name": "X" } })).expect("state should serialize");
    send(&mut x, encode_awareness(presence.update().expect("update should encode"))).await;

    let Frame::Awareness(seen) = recv_frame(&mut y).await else {
        panic!("peer should receive presence");
    };
    assert!(seen.clients.contains_key(&10));
    assert_silent(&mut x).await;

    x.close(None).await.expect("client should close");

    let Frame::Awareness(removal) = recv_frame(&mut y).await else {
        panic!("peer should receive a presence removal");
    };
    assert_eq!(&*removal.clients[&10].json, "null");

    let mut z = relay.connect("r1").await;
    assert!(matches!(recv_frame(&mut z).await, Frame::Sync(SyncMessage::SyncStep1(_))));
    let Frame::Awareness(snapshot) = recv_frame(&mut z).await else {
        panic!("joiner should receive a presence snapshot");
    };
    assert!(snapshot.clients.get(&10).map_or(true, |entry| &*entry.json == "null"));

    relay.stop().await;
}

#[tokio::test]
async fn addressed_signals_reach_only_their_target() {
    let relay = TestRelay::start(Duration::from_secs(30)).await;
    let mut x = relay.join("call").await;
    let mut y = relay.join("call").await;
    let mut z = relay.join("call").await;

    let announce = SignalEnvelope::new(SignalKind::Join, serde_json::Value::Null);
    send(&mut y, encode_signal(&announce).unwrap()).await;
    let seen_by_x = expect_signal(recv_frame(&mut x).await);
    let seen_by_z = expect_signal(recv_frame(&mut z).await);
    assert_eq!(seen_by_x.kind, SignalKind::Join);
    assert_eq!(seen_by_x.from, seen_by_z.from);
    assert!(!seen_by_x.from.is_empty());
    assert_silent(&mut y).await;

    let y_identity = seen_by_x.from;
    let offer = SignalEnvelope::new(SignalKind::Offer, json!({ "type": "offer", "sdp": "v=0" }))
        .addressed_to(y_identity.clone());
    send(&mut x, encode_signal(&offer).unwrap()).await;

    let received = expect_signal(recv_frame(&mut y).await);
    assert_eq!(received.kind, SignalKind::Offer);
    assert_eq!(received.to.as_deref(), Some(y_identity.as_str()));
    assert_eq!(received.payload["sdp"], "v=0");
    assert_ne!(received.from, y_identity);
    assert_silent(&mut z).await;
    assert_silent(&mut x).await;

    relay.stop().await;
}

#[tokio::test]
async fn bad_frames_are_dropped_without_closing_the_connection() {
    let relay = TestRelay::start(Duration::from_secs(30)).await;
    let mut a = relay.join("r1").await;
    let mut b = relay.join("r1").await;

    a.send(WsMessage::Text("{\"type\":\"hello\"}".into())).await.expect("text should send");
    send(&mut a, vec![2, 0]).await;
    send(&mut a, vec![0, 2, 3, 0xff, 0xff, 0xff]).await;
    send(&mut a, vec![4, 3, b'{', b'x', b'}']).await;
    assert_silent(&mut b).await;

    send(&mut a, encode_update(text_update(1, "still here"))).await;
    assert!(matches!(recv_frame(&mut b).await, Frame::Sync(SyncMessage::Update(_))));

    relay.stop().await;
}

#[tokio::test]
async fn seeding_pushes_content_to_connected_clients() {
    let relay = TestRelay::start(Duration::from_secs(30)).await;
    let mut client = relay.join("interview").await;

    let receipt = bootstrap::seed_room(
        &relay.state.rooms,
        "interview",
        &SeedContent::new("console.log(1)", "js"),
    )
    .await
    .expect("first seed should succeed");
    assert_eq!(receipt.delivered, 1);

    let Frame::Sync(SyncMessage::Update(update)) = recv_frame(&mut client).await else {
        panic!("client should receive the seed update");
    };
    let doc = Doc::new();
    apply(&doc, &update);
    assert_eq!(monaco(&doc), "console.log(1)");

    let second =
        bootstrap::seed_room(&relay.state.rooms, "interview", &SeedContent::new("x", "js")).await;
    assert!(second.is_err());

    relay.stop().await;
}

#[tokio::test]
async fn unresponsive_connection_is_terminated_by_heartbeat() {
    let relay = TestRelay::start(Duration::from_millis(150)).await;
    let mut silent = relay.join("r1").await;
    let mut responsive = relay.join("r1").await;

    let presence = Awareness::new(Doc::with_client_id(10));
    presence.set_local_state(json!({ "user": { "name": "silent" } })).expect("state should serialize");
    send(&mut silent, encode_awareness(presence.update().expect("update should encode"))).await;
    assert!(matches!(recv_frame(&mut responsive).await, Frame::Awareness(_)));

    // Reading drives the client's automatic pong replies.
    let reader = tokio::spawn(async move {
        while let Some(Ok(_)) = responsive.next().await {}
    });

    let room = relay.state.rooms.get(&RoomId::new("r1")).await.expect("room should exist");
    let deadline = Instant::now() + Duration::from_secs(3);
    while room.connection_count().await > 1 {
        assert!(Instant::now() < deadline, "silent connection was never terminated");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(room.connection_count().await, 1);
    assert!(room.lock_state().await.awareness.peers().is_empty());

    loop {
        match timeout(RECV_TIMEOUT, silent.next()).await.expect("socket should close") {
            Some(Ok(WsMessage::Binary(_) | WsMessage::Ping(_) | WsMessage::Pong(_))) => continue,
            _ => break,
        }
    }

    reader.abort();
    relay.stop().await;
}
