//! Hub-side channel tests: a real server with tokio-tungstenite clients
//! exercising admission, eviction, and response correlation end to end.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Map;
use sha2::{Digest, Sha256};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use uuid::Uuid;

use ax_domain::config::{Config, RpcConfig};
use ax_protocol::{ChannelMessage, WIRE_VERSION};

use ax_hub::devices::registry::DeviceRegistry;
use ax_hub::skills::registry::SkillRegistry;
use ax_hub::skills::router::SkillRouter;
use ax_hub::spokes::connections::{ConnectionManager, Connectivity};
use ax_hub::spokes::invoker::RemoteInvoker;
use ax_hub::state::{AppState, Principal};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct Hub {
    addr: SocketAddr,
    state: AppState,
    _dir: tempfile::TempDir,
}

async fn start_hub(principals: Vec<Principal>) -> Hub {
    let dir = tempfile::tempdir().unwrap();
    let devices = Arc::new(DeviceRegistry::load(dir.path()).unwrap());
    let connections = Arc::new(ConnectionManager::new());
    let connectivity: Arc<dyn Connectivity> = connections.clone();
    let invoker = Arc::new(RemoteInvoker::new(
        connectivity.clone(),
        &RpcConfig::default(),
    ));
    let skills = Arc::new(SkillRegistry::new());
    let router = Arc::new(SkillRouter::new(
        devices.clone(),
        skills.clone(),
        connectivity,
        invoker.clone(),
    ));
    let state = AppState {
        config: Arc::new(Config::default()),
        devices,
        connections,
        invoker,
        skills,
        router,
        principals: Arc::new(principals),
        shutdown_tx: Arc::new(tokio::sync::Notify::new()),
    };

    let app = ax_hub::api::router(state.clone()).with_state(state.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    Hub {
        addr,
        state,
        _dir: dir,
    }
}

fn principal(name: &str, token: &str) -> Principal {
    Principal {
        name: name.into(),
        token_hash: Sha256::digest(token.as_bytes()).to_vec(),
    }
}

async fn connect(
    addr: SocketAddr,
    device_id: Uuid,
    token: &str,
) -> Result<Socket, tungstenite::Error> {
    let url = format!("ws://{addr}/v1/devices/ws?device_id={device_id}&token={token}");
    connect_async(url).await.map(|(ws, _)| ws)
}

/// The upgrade handshake succeeding does not mean the socket task has
/// admitted the channel yet; wait for it before routing calls.
async fn wait_admitted(state: &AppState, device_id: Uuid) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !state.connections.is_connected(device_id) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("device was never admitted");
}

async fn recv_frame(socket: &mut Socket) -> Option<Result<Message, tungstenite::Error>> {
    tokio::time::timeout(Duration::from_secs(5), socket.next())
        .await
        .expect("timed out waiting for a frame")
}

async fn recv_channel_message(socket: &mut Socket) -> ChannelMessage {
    loop {
        match recv_frame(socket).await.expect("stream ended").unwrap() {
            Message::Text(text) => return serde_json::from_str(&text).unwrap(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

async fn ping_pong(socket: &mut Socket) {
    let json = serde_json::to_string(&ChannelMessage::Ping).unwrap();
    socket.send(Message::Text(json)).await.unwrap();
    match recv_channel_message(socket).await {
        ChannelMessage::Pong => {}
        other => panic!("expected pong, got {other:?}"),
    }
}

/// Read until the peer closes; a close frame, a clean end of stream, or a
/// reset all count.
async fn expect_closed(socket: &mut Socket) {
    loop {
        match recv_frame(socket).await {
            None | Some(Ok(Message::Close(_))) | Some(Err(_)) => return,
            Some(Ok(_)) => continue,
        }
    }
}

fn assert_handshake_rejected(err: tungstenite::Error, status: u16) {
    match err {
        tungstenite::Error::Http(resp) => assert_eq!(resp.status().as_u16(), status),
        other => panic!("expected an HTTP rejection, got {other}"),
    }
}

#[tokio::test]
async fn admission_rejects_bad_credentials_before_upgrade() {
    let hub = start_hub(vec![principal("alice", "secret"), principal("bob", "hunter2")]).await;
    let (device_id, _) = hub.state.devices.register("alice", "Laptop", None);

    let err = connect(hub.addr, device_id, "wrong").await.unwrap_err();
    assert_handshake_rejected(err, 401);

    let err = connect(hub.addr, Uuid::new_v4(), "secret").await.unwrap_err();
    assert_handshake_rejected(err, 404);

    // Valid token, but the device belongs to another principal.
    let err = connect(hub.addr, device_id, "hunter2").await.unwrap_err();
    assert_handshake_rejected(err, 403);

    let mut socket = connect(hub.addr, device_id, "secret").await.unwrap();
    ping_pong(&mut socket).await;
}

#[tokio::test]
async fn second_connection_evicts_first() {
    let hub = start_hub(vec![principal("alice", "secret")]).await;
    let (device_id, _) = hub.state.devices.register("alice", "Laptop", None);

    let mut first = connect(hub.addr, device_id, "secret").await.unwrap();
    ping_pong(&mut first).await;

    let mut second = connect(hub.addr, device_id, "secret").await.unwrap();
    expect_closed(&mut first).await;
    ping_pong(&mut second).await;
    assert_eq!(hub.state.connections.len(), 1);
}

#[tokio::test]
async fn devices_sharing_a_token_coexist() {
    let hub = start_hub(vec![principal("alice", "secret")]).await;
    let (laptop, _) = hub.state.devices.register("alice", "Laptop", None);
    let (desktop, _) = hub.state.devices.register("alice", "Desktop", None);

    let mut laptop_socket = connect(hub.addr, laptop, "secret").await.unwrap();
    let mut desktop_socket = connect(hub.addr, desktop, "secret").await.unwrap();

    ping_pong(&mut laptop_socket).await;
    ping_pong(&mut desktop_socket).await;
    assert_eq!(hub.state.connections.len(), 2);
}

#[tokio::test]
async fn skill_response_resolves_routed_call() {
    let hub = start_hub(vec![principal("alice", "secret")]).await;
    let (device_id, _) = hub.state.devices.register("alice", "Laptop", None);

    let mut socket = connect(hub.addr, device_id, "secret").await.unwrap();
    wait_admitted(&hub.state, device_id).await;

    let call = {
        let state = hub.state.clone();
        tokio::spawn(async move {
            state
                .router
                .execute("alice", "laptop", "TestSkill", "test", vec![], Map::new())
                .await
        })
    };

    let request_id = match recv_channel_message(&mut socket).await {
        ChannelMessage::SkillRequest {
            request_id,
            skill_name,
            method_name,
            ..
        } => {
            assert_eq!(skill_name, "TestSkill");
            assert_eq!(method_name, "test");
            request_id
        }
        other => panic!("expected skill_request, got {other:?}"),
    };

    let reply = ChannelMessage::SkillResponse {
        v: WIRE_VERSION,
        request_id,
        success: true,
        result: Some(serde_json::json!({ "answer": 42 })),
        error: None,
    };
    socket
        .send(Message::Text(serde_json::to_string(&reply).unwrap()))
        .await
        .unwrap();

    let outcome = call.await.unwrap();
    assert!(outcome.success);
    assert_eq!(outcome.result, serde_json::json!({ "answer": 42 }));
    assert_eq!(hub.state.invoker.pending_count(), 0);
}
