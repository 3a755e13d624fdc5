//! WebSocket endpoint for device control channels.
//!
//! Flow:
//! 1. Device connects to `/v1/devices/ws?device_id=<uuid>&token=<bearer>`
//! 2. The Hub validates the token and the device identity before upgrade
//! 3. The connection is admitted, evicting any prior channel for the id
//! 4. Message loop: device sends `ping`/`skill_response`, Hub sends
//!    `pong`/`skill_request`

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use ax_protocol::ChannelMessage;

use crate::api::auth::resolve_owner;
use crate::spokes::connections::Connection;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub device_id: Uuid,
    pub token: Option<String>,
}

/// GET /v1/devices/ws — upgrade a device control channel.
///
/// Admission is the hard-rejection boundary: a bad token or an unknown
/// device id refuses the upgrade outright instead of producing a
/// structured error payload.
pub async fn device_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
) -> impl IntoResponse {
    let owner = match resolve_owner(&state, query.token.as_deref().unwrap_or("")) {
        Some(o) => o,
        None => {
            return (StatusCode::UNAUTHORIZED, "invalid or missing token").into_response();
        }
    };

    let device = match state.devices.get(query.device_id) {
        Some(d) => d,
        None => {
            return (StatusCode::NOT_FOUND, "unknown device id").into_response();
        }
    };
    if device.owner != owner {
        return (StatusCode::FORBIDDEN, "device belongs to another principal").into_response();
    }

    ws.on_upgrade(move |socket| handle_socket(socket, state, query.device_id))
        .into_response()
}

async fn handle_socket(socket: WebSocket, state: AppState, device_id: Uuid) {
    let (mut ws_sink, mut ws_stream) = socket.split();

    let channel_id = Uuid::new_v4();
    let closer = CancellationToken::new();
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<ChannelMessage>(64);

    state.connections.admit(
        device_id,
        Connection {
            channel_id,
            sink: outbound_tx.clone(),
            connected_at: Utc::now(),
            last_seen: Utc::now(),
            closer: closer.clone(),
        },
    );
    tracing::info!(device_id = %device_id, channel_id = %channel_id, "device channel open");

    // Writer task: forwards outbound channel messages to the WS sink.
    // On eviction it sends a close frame so the replaced device observes
    // an ordinary disconnect, then stops forwarding application traffic.
    let writer_closer = closer.clone();
    let writer = tokio::spawn(async move {
        loop {
            tokio::select! {
                msg = outbound_rx.recv() => {
                    let Some(msg) = msg else { break };
                    if send_channel_message(&mut ws_sink, &msg).await.is_err() {
                        break;
                    }
                }
                () = writer_closer.cancelled() => {
                    let _ = ws_sink.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    });

    // Reader loop: process inbound messages until disconnect or eviction.
    loop {
        let msg = tokio::select! {
            msg = ws_stream.next() => msg,
            () = closer.cancelled() => break,
        };
        let Some(Ok(msg)) = msg else { break };

        match msg {
            Message::Text(text) => match serde_json::from_str::<ChannelMessage>(&text) {
                Ok(channel_msg) => {
                    handle_inbound(&state, device_id, &outbound_tx, channel_msg).await;
                }
                Err(e) => {
                    tracing::debug!(device_id = %device_id, error = %e, "ignoring unparseable message");
                }
            },
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) => {
                // axum answers WS-level pings itself.
                state.connections.touch(device_id);
            }
            _ => {}
        }
    }

    // Cleanup: drop the mapping first so no new call can target this
    // channel, then fail the calls that went over it. Both steps are
    // channel_id-guarded, so a replacement connection and its in-flight
    // calls are untouched.
    state.connections.remove(device_id, channel_id);
    let failed = state.invoker.fail_pending_for_channel(device_id, channel_id);
    writer.abort();
    tracing::info!(
        device_id = %device_id,
        channel_id = %channel_id,
        failed_in_flight = failed,
        "device channel closed"
    );
}

async fn handle_inbound(
    state: &AppState,
    device_id: Uuid,
    outbound: &mpsc::Sender<ChannelMessage>,
    msg: ChannelMessage,
) {
    state.connections.touch(device_id);

    match msg {
        ChannelMessage::Ping => {
            let _ = outbound.send(ChannelMessage::Pong).await;
        }
        ChannelMessage::Pong => {
            // Liveness acknowledged; touch already happened above.
        }
        ChannelMessage::SkillResponse {
            request_id,
            success,
            result,
            error,
            ..
        } => {
            state.invoker.complete(
                &request_id,
                success,
                result.unwrap_or(serde_json::Value::Null),
                error,
            );
        }
        ChannelMessage::SkillRequest { request_id, .. } => {
            tracing::debug!(
                device_id = %device_id,
                request_id = %request_id,
                "devices do not issue skill_request, ignoring"
            );
        }
    }
}

async fn send_channel_message(
    sink: &mut (impl SinkExt<Message> + Unpin),
    msg: &ChannelMessage,
) -> Result<(), ()> {
    let json = serde_json::to_string(msg).map_err(|_| ())?;
    sink.send(Message::Text(json)).await.map_err(|_| ())
}
