//! WebSocket room server tests over a real socket

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use beacon_rag::room::{
    AgentSignal, JobDispatcher, LocalRoom, Room, RoomConnector, RoomEvent, RoomServer,
};
use beacon_rag::voice::audio::samples_to_pcm16;

const WAIT: Duration = Duration::from_secs(5);

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Room server on an ephemeral port, recording every dispatched room
async fn serve() -> (SocketAddr, Arc<Mutex<Vec<LocalRoom>>>) {
    let dispatched = Arc::new(Mutex::new(Vec::new()));
    let record = Arc::clone(&dispatched);
    let dispatcher: JobDispatcher = Arc::new(move |room: LocalRoom| {
        record.lock().unwrap().push(room);
    });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = RoomServer::new(0, dispatcher).router();
    drop(tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    }));
    (addr, dispatched)
}

async fn join(addr: SocketAddr, room: &str, identity: &str, metadata: &str) -> Client {
    let (mut ws, _) = connect_async(format!("ws://{addr}/rooms/{room}")).await.unwrap();
    let hello = format!(r#"{{"type":"join","identity":"{identity}","metadata":{metadata}}}"#);
    ws.send(Message::text(hello)).await.unwrap();
    ws
}

async fn wait_until(what: &str, cond: impl Fn() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {what}"));
}

fn dispatch_count(dispatched: &Mutex<Vec<LocalRoom>>) -> usize {
    dispatched.lock().unwrap().len()
}

fn first_room(dispatched: &Mutex<Vec<LocalRoom>>) -> LocalRoom {
    dispatched.lock().unwrap()[0].clone()
}

#[tokio::test]
async fn first_peer_dispatches_one_job() {
    let (addr, dispatched) = serve().await;

    let _alice = join(addr, "support", "alice", r#"{"ragEnabled":false}"#).await;
    wait_until("dispatch", || dispatch_count(&dispatched) == 1).await;
    let room = first_room(&dispatched);
    assert_eq!(room.name(), "support");

    let _bob = join(addr, "support", "bob", "null").await;
    wait_until("second peer", || room.remote_participants().len() == 2).await;
    assert_eq!(dispatch_count(&dispatched), 1);

    let participants = room.remote_participants();
    assert_eq!(participants[0].identity, "alice");
    assert_eq!(participants[0].metadata.as_deref(), Some(r#"{"ragEnabled":false}"#));
    assert_eq!(participants[1].identity, "bob");
    assert!(participants[1].metadata.is_none());
}

#[tokio::test]
async fn audio_and_data_cross_the_socket() {
    let (addr, dispatched) = serve().await;
    let mut alice = join(addr, "support", "alice", r#""{}""#).await;
    wait_until("dispatch", || dispatch_count(&dispatched) == 1).await;
    let mut agent = first_room(&dispatched).connector().connect().await.unwrap();

    let frame = samples_to_pcm16(&[0.25; 160]);
    alice.send(Message::binary(frame)).await.unwrap();

    let (identity, samples) = tokio::time::timeout(WAIT, async {
        loop {
            match agent.events.recv().await {
                Some(RoomEvent::Audio { identity, samples }) => break (identity, samples),
                Some(_) => {}
                None => panic!("room events ended"),
            }
        }
    })
    .await
    .expect("audio never reached the agent");
    assert_eq!(identity, "alice");
    assert_eq!(samples.len(), 160);
    assert!((samples[0] - 0.25).abs() < 0.001);

    let signal = AgentSignal::AgentText {
        text: "Hello".to_string(),
    };
    agent.room.publish_data(&signal).await.unwrap();

    let text = tokio::time::timeout(WAIT, async {
        loop {
            match alice.next().await {
                Some(Ok(Message::Text(text))) => break text,
                Some(Ok(_)) => {}
                other => panic!("socket ended: {other:?}"),
            }
        }
    })
    .await
    .expect("agent data never reached the peer");
    let received: AgentSignal = serde_json::from_str(text.as_str()).unwrap();
    assert_eq!(received, signal);
}

#[tokio::test]
async fn last_leave_closes_room() {
    let (addr, dispatched) = serve().await;
    let mut alice = join(addr, "support", "alice", "null").await;
    wait_until("dispatch", || dispatch_count(&dispatched) == 1).await;
    let room = first_room(&dispatched);

    alice.close(None).await.unwrap();
    wait_until("room close", || room.is_closed()).await;

    // The name is free again and gets a fresh room and job
    let _bob = join(addr, "support", "bob", "null").await;
    wait_until("second dispatch", || dispatch_count(&dispatched) == 2).await;
    let second = dispatched.lock().unwrap()[1].clone();
    assert!(!second.is_closed());
}

#[tokio::test]
async fn invalid_join_is_refused() {
    let (addr, dispatched) = serve().await;
    let (mut ws, _) = connect_async(format!("ws://{addr}/rooms/support")).await.unwrap();
    ws.send(Message::text("hello")).await.unwrap();

    let ended = tokio::time::timeout(WAIT, async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                Some(Ok(_)) => {}
            }
        }
    })
    .await;
    assert!(ended.is_ok(), "connection was left open");
    assert_eq!(dispatch_count(&dispatched), 0);
}
