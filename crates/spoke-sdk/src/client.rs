//! Core spoke client — registers with the Hub over HTTP, then drives the
//! WebSocket channel: pings, skill heartbeats, and request dispatch via
//! [`SkillSet`].

use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{FutureExt, SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Semaphore};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use ax_protocol::{ChannelMessage, WIRE_VERSION};

use crate::reconnect::ReconnectBackoff;
use crate::skills::SkillSet;
use crate::types::{SkillContext, SpokeSdkError};

/// A fully-configured spoke client ready to register and connect.
///
/// Create via [`SpokeClientBuilder`](crate::builder::SpokeClientBuilder).
pub struct SpokeClient {
    pub(crate) hub_url: String,
    pub(crate) token: Option<String>,
    pub(crate) device_name: String,
    pub(crate) identity_path: Option<PathBuf>,
    pub(crate) ping_interval: Duration,
    pub(crate) heartbeat_interval: Duration,
    pub(crate) reconnect_backoff: ReconnectBackoff,
    pub(crate) max_concurrent_calls: usize,
    pub(crate) http: reqwest::Client,
}

/// Identity file contents (`identity_path`).
#[derive(Debug, Serialize, Deserialize)]
struct StoredIdentity {
    device_id: Uuid,
}

#[derive(Debug, Deserialize)]
struct RegisterDeviceResponse {
    device_id: Uuid,
    display_name: String,
}

#[derive(Debug, Serialize)]
struct RegisterDeviceRequest<'a> {
    device_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    device_id: Option<String>,
}

impl SpokeClient {
    /// Start a new builder.
    pub fn builder() -> crate::builder::SpokeClientBuilder {
        crate::builder::SpokeClientBuilder::new()
    }

    /// Run the spoke.  Registers the device and its skills, connects the
    /// channel, and keeps it alive with pings and skill heartbeats.  On
    /// disconnection, reconnects according to the [`ReconnectBackoff`]
    /// policy.
    ///
    /// Returns only on fatal error, `max_attempts` exhaustion, or when the
    /// `shutdown` token is cancelled.
    pub async fn run(
        self,
        skills: SkillSet,
        shutdown: CancellationToken,
    ) -> Result<(), SpokeSdkError> {
        let mut device_id = self.register_device().await?;
        let registered = self.register_skills(device_id, &skills).await?;
        tracing::info!(
            device_id = %device_id,
            skills = registered,
            "registered with hub"
        );

        // Heartbeat loop: HTTP, independent of the channel's state.
        let mut heartbeat_task = self.spawn_heartbeat(device_id, shutdown.child_token());

        let mut attempt: u32 = 0;
        let result = loop {
            if shutdown.is_cancelled() {
                break Err(SpokeSdkError::Shutdown);
            }

            let session = tokio::select! {
                r = self.run_channel(device_id, &skills) => r,
                _ = shutdown.cancelled() => {
                    tracing::info!(device_id = %device_id, "shutdown requested");
                    break Err(SpokeSdkError::Shutdown);
                }
            };

            match session {
                Ok(()) => {
                    tracing::info!(device_id = %device_id, "channel closed");
                    attempt = 0;
                }
                Err(e) => {
                    tracing::warn!(device_id = %device_id, attempt, error = %e, "channel lost");
                }
            }

            if self.reconnect_backoff.should_give_up(attempt) {
                tracing::error!(device_id = %device_id, attempts = attempt, "reconnect attempts exhausted");
                break Err(SpokeSdkError::ReconnectExhausted(attempt));
            }

            let delay = self.reconnect_backoff.delay_for_attempt(attempt);
            tracing::info!(
                device_id = %device_id,
                delay_ms = delay.as_millis() as u64,
                attempt = attempt + 1,
                "reconnecting"
            );
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.cancelled() => break Err(SpokeSdkError::Shutdown),
            }
            attempt += 1;

            // The hub may have restarted and lost the in-memory skill
            // registry; re-advertise before reconnecting the channel. A
            // 404 means the hub lost the device identity itself, so
            // register from scratch and adopt the freshly minted id.
            match self.register_skills(device_id, &skills).await {
                Ok(_) => {}
                Err(SpokeSdkError::UnknownDevice) => {
                    tracing::warn!(
                        device_id = %device_id,
                        "hub no longer knows this device, registering anew"
                    );
                    match self.register_device().await {
                        Ok(new_id) => {
                            if new_id != device_id {
                                device_id = new_id;
                                heartbeat_task.abort();
                                heartbeat_task =
                                    self.spawn_heartbeat(device_id, shutdown.child_token());
                            }
                            if let Err(e) = self.register_skills(device_id, &skills).await {
                                tracing::warn!(device_id = %device_id, error = %e, "skill re-registration failed");
                            }
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "device re-registration failed");
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(device_id = %device_id, error = %e, "skill re-registration failed");
                }
            }
        };

        heartbeat_task.abort();
        result
    }

    /// Same as [`run`](Self::run), but returns a `JoinHandle` for embedding
    /// in other runtimes.
    pub fn spawn(
        self,
        skills: SkillSet,
        shutdown: CancellationToken,
    ) -> tokio::task::JoinHandle<Result<(), SpokeSdkError>> {
        tokio::spawn(async move { self.run(skills, shutdown).await })
    }

    // ── HTTP registration ────────────────────────────────────────────

    /// Register the device, reusing a persisted id when available.
    async fn register_device(&self) -> Result<Uuid, SpokeSdkError> {
        let stored_id = self.load_identity();
        let request = RegisterDeviceRequest {
            device_name: &self.device_name,
            device_id: stored_id.map(|id| id.to_string()),
        };

        let url = format!("{}/v1/devices/register", self.hub_url);
        let mut req = self.http.post(&url).json(&request);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| SpokeSdkError::Registration(format!("POST {url}: {e}")))?;
        if !resp.status().is_success() {
            return Err(SpokeSdkError::Registration(format!(
                "POST {url}: HTTP {}",
                resp.status()
            )));
        }
        let granted: RegisterDeviceResponse = resp
            .json()
            .await
            .map_err(|e| SpokeSdkError::Registration(format!("decoding registration: {e}")))?;

        if granted.display_name != self.device_name {
            tracing::info!(
                requested = %self.device_name,
                granted = %granted.display_name,
                "hub granted a different display name"
            );
        }
        self.store_identity(granted.device_id);
        Ok(granted.device_id)
    }

    /// Advertise the skill set. Returns the number of registered entries.
    async fn register_skills(
        &self,
        device_id: Uuid,
        skills: &SkillSet,
    ) -> Result<usize, SpokeSdkError> {
        let url = format!(
            "{}/v1/skills/register?device_id={device_id}",
            self.hub_url
        );
        let mut req = self
            .http
            .post(&url)
            .json(&serde_json::json!({ "skills": skills.specs() }));
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| SpokeSdkError::Registration(format!("POST {url}: {e}")))?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            // The hub does not know this device id anymore.
            return Err(SpokeSdkError::UnknownDevice);
        }
        if !resp.status().is_success() {
            return Err(SpokeSdkError::Registration(format!(
                "POST {url}: HTTP {}",
                resp.status()
            )));
        }
        #[derive(Deserialize)]
        struct Registered {
            registered: usize,
        }
        let body: Registered = resp
            .json()
            .await
            .map_err(|e| SpokeSdkError::Registration(format!("decoding registration: {e}")))?;
        Ok(body.registered)
    }

    fn spawn_heartbeat(
        &self,
        device_id: Uuid,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let http = self.http.clone();
        let token = self.token.clone();
        let url = format!(
            "{}/v1/skills/heartbeat?device_id={device_id}",
            self.hub_url
        );
        let interval = self.heartbeat_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = cancel.cancelled() => break,
                }
                let mut req = http.post(&url);
                if let Some(token) = &token {
                    req = req.bearer_auth(token);
                }
                match req.send().await {
                    Ok(resp) if resp.status().is_success() => {
                        tracing::trace!(device_id = %device_id, "heartbeat sent");
                    }
                    Ok(resp) => {
                        tracing::warn!(device_id = %device_id, status = %resp.status(), "heartbeat rejected");
                    }
                    Err(e) => {
                        tracing::debug!(device_id = %device_id, error = %e, "heartbeat failed");
                    }
                }
            }
        })
    }

    // ── Channel ──────────────────────────────────────────────────────

    /// Drive a single channel session for an already-registered device:
    /// connect, ping, dispatch skill requests.  Returns `Ok(())` when the
    /// Hub closes the channel.  [`run`](Self::run) wraps this with
    /// registration and the reconnect policy.
    pub async fn run_channel(
        &self,
        device_id: Uuid,
        skills: &SkillSet,
    ) -> Result<(), anyhow::Error> {
        let url = self.channel_url(device_id);
        tracing::info!(device_id = %device_id, "connecting channel");

        let (ws, _response) = tokio_tungstenite::connect_async(&url).await?;
        let (mut sink, mut stream) = ws.split();

        let (outbound_tx, mut outbound_rx) = mpsc::channel::<ChannelMessage>(64);
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent_calls));
        let inflight_cancel = CancellationToken::new();

        // Ping task: keeps the hub's last_seen fresh.
        let ping_tx = outbound_tx.clone();
        let ping_interval = self.ping_interval;
        let ping_task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(ping_interval);
            loop {
                ticker.tick().await;
                if ping_tx.send(ChannelMessage::Ping).await.is_err() {
                    break;
                }
            }
        });

        // Writer task: serializes outbound messages to the socket.
        let writer_task = tokio::spawn(async move {
            while let Some(msg) = outbound_rx.recv().await {
                let json = match serde_json::to_string(&msg) {
                    Ok(j) => j,
                    Err(e) => {
                        tracing::error!(error = %e, "failed to serialize outbound message");
                        continue;
                    }
                };
                if sink.send(Message::Text(json)).await.is_err() {
                    break;
                }
            }
        });

        // Reader loop: dispatch inbound messages.
        while let Some(Ok(msg)) = stream.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<ChannelMessage>(&text) {
                    Ok(channel_msg) => {
                        self.handle_inbound(
                            channel_msg,
                            skills,
                            &outbound_tx,
                            &semaphore,
                            &inflight_cancel,
                        );
                    }
                    Err(e) => {
                        tracing::debug!(error = %e, "ignoring unparseable message");
                    }
                },
                Message::Close(_) => {
                    tracing::info!(device_id = %device_id, "hub closed the channel");
                    break;
                }
                _ => {}
            }
        }

        // Cleanup: cancel in-flight skill calls, stop ping/writer.
        inflight_cancel.cancel();
        ping_task.abort();
        writer_task.abort();

        Ok(())
    }

    fn handle_inbound(
        &self,
        msg: ChannelMessage,
        skills: &SkillSet,
        outbound_tx: &mpsc::Sender<ChannelMessage>,
        semaphore: &Arc<Semaphore>,
        inflight_cancel: &CancellationToken,
    ) {
        match msg {
            ChannelMessage::SkillRequest {
                request_id,
                skill_name,
                method_name,
                args,
                kwargs,
                ..
            } => {
                tracing::debug!(
                    request_id = %request_id,
                    skill = %skill_name,
                    method = %method_name,
                    "received skill_request"
                );

                let handler = skills.get(&skill_name, &method_name);
                let tx = outbound_tx.clone();
                let sem = semaphore.clone();
                let cancel = inflight_cancel.child_token();

                tokio::spawn(async move {
                    let _permit = sem.acquire().await;

                    let response = match handler {
                        Some(handler) => {
                            let ctx = SkillContext {
                                request_id: request_id.clone(),
                                skill_name: skill_name.clone(),
                                method_name: method_name.clone(),
                                cancel,
                            };
                            // catch_unwind: a panicking handler still
                            // produces a skill_response.
                            let call =
                                AssertUnwindSafe(handler.call(ctx, args, kwargs))
                                    .catch_unwind()
                                    .await;
                            match call {
                                Ok(Ok(result)) => ChannelMessage::SkillResponse {
                                    v: WIRE_VERSION,
                                    request_id,
                                    success: true,
                                    result: Some(result),
                                    error: None,
                                },
                                Ok(Err(e)) => ChannelMessage::SkillResponse {
                                    v: WIRE_VERSION,
                                    request_id,
                                    success: false,
                                    result: None,
                                    error: Some(e.to_string()),
                                },
                                Err(_panic) => {
                                    tracing::error!(
                                        skill = %skill_name,
                                        method = %method_name,
                                        "skill handler panicked"
                                    );
                                    ChannelMessage::SkillResponse {
                                        v: WIRE_VERSION,
                                        request_id,
                                        success: false,
                                        result: None,
                                        error: Some("skill handler panicked".into()),
                                    }
                                }
                            }
                        }
                        None => {
                            tracing::warn!(
                                skill = %skill_name,
                                method = %method_name,
                                "no handler registered"
                            );
                            ChannelMessage::SkillResponse {
                                v: WIRE_VERSION,
                                request_id,
                                success: false,
                                result: None,
                                error: Some(format!(
                                    "unknown skill: {skill_name}.{method_name}"
                                )),
                            }
                        }
                    };

                    let _ = tx.send(response).await;
                });
            }
            ChannelMessage::Ping => {
                let tx = outbound_tx.clone();
                tokio::spawn(async move {
                    let _ = tx.send(ChannelMessage::Pong).await;
                });
            }
            ChannelMessage::Pong => {
                tracing::trace!("received pong");
            }
            ChannelMessage::SkillResponse { request_id, .. } => {
                tracing::debug!(request_id = %request_id, "hub does not issue skill_response, ignoring");
            }
        }
    }

    /// Build the channel URL from the hub base URL and credentials.
    pub(crate) fn channel_url(&self, device_id: Uuid) -> String {
        let base = if let Some(rest) = self.hub_url.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = self.hub_url.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            self.hub_url.clone()
        };

        match &self.token {
            Some(token) => format!("{base}/v1/devices/ws?device_id={device_id}&token={token}"),
            None => format!("{base}/v1/devices/ws?device_id={device_id}"),
        }
    }

    // ── Identity persistence ─────────────────────────────────────────

    fn load_identity(&self) -> Option<Uuid> {
        let path = self.identity_path.as_ref()?;
        let raw = std::fs::read_to_string(path).ok()?;
        match serde_json::from_str::<StoredIdentity>(&raw) {
            Ok(stored) => Some(stored.device_id),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "unreadable identity file, re-registering");
                None
            }
        }
    }

    fn store_identity(&self, device_id: Uuid) {
        let Some(path) = &self.identity_path else {
            return;
        };
        let json = match serde_json::to_string_pretty(&StoredIdentity { device_id }) {
            Ok(j) => j,
            Err(_) => return,
        };
        if let Err(e) = std::fs::write(path, json) {
            tracing::warn!(path = %path.display(), error = %e, "failed to persist identity");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::SpokeClientBuilder;

    fn test_client() -> SpokeClient {
        SpokeClientBuilder::new()
            .hub_url("http://localhost:7410")
            .token("secret")
            .device_name("Test Spoke")
            .build()
            .unwrap()
    }

    #[test]
    fn channel_url_swaps_scheme_and_carries_credentials() {
        let client = test_client();
        let id = Uuid::nil();
        assert_eq!(
            client.channel_url(id),
            format!("ws://localhost:7410/v1/devices/ws?device_id={id}&token=secret")
        );
    }

    #[test]
    fn channel_url_without_token() {
        let client = SpokeClientBuilder::new()
            .hub_url("https://hub.example.com/")
            .device_name("Test Spoke")
            .build()
            .unwrap();
        let id = Uuid::nil();
        assert_eq!(
            client.channel_url(id),
            format!("wss://hub.example.com/v1/devices/ws?device_id={id}")
        );
    }

    #[test]
    fn identity_roundtrips_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.json");
        let client = SpokeClientBuilder::new()
            .hub_url("http://localhost:7410")
            .device_name("Test Spoke")
            .identity_path(&path)
            .build()
            .unwrap();

        assert!(client.load_identity().is_none());
        let id = Uuid::new_v4();
        client.store_identity(id);
        assert_eq!(client.load_identity(), Some(id));
    }

    #[test]
    fn corrupt_identity_file_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.json");
        std::fs::write(&path, "not json").unwrap();
        let client = SpokeClientBuilder::new()
            .hub_url("http://localhost:7410")
            .device_name("Test Spoke")
            .identity_path(&path)
            .build()
            .unwrap();
        assert!(client.load_identity().is_none());
    }

    #[test]
    fn builder_rejects_blank_device_name() {
        let err = SpokeClientBuilder::new()
            .hub_url("http://localhost:7410")
            .device_name("   ")
            .build();
        assert!(matches!(err, Err(SpokeSdkError::Config(_))));
    }

    /// Tiny HTTP server answering every request with one canned response.
    async fn http_stub(status_line: &str, body: &str) -> std::net::SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let response = format!(
            "HTTP/1.1 {status_line}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
            body.len()
        );
        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    break;
                };
                let response = response.clone();
                tokio::spawn(async move {
                    use tokio::io::{AsyncReadExt, AsyncWriteExt};
                    let mut buf = [0u8; 4096];
                    let _ = stream.read(&mut buf).await;
                    let _ = stream.write_all(response.as_bytes()).await;
                });
            }
        });
        addr
    }

    #[tokio::test]
    async fn skill_registration_404_reports_unknown_device() {
        let addr = http_stub("404 Not Found", r#"{"error":"unknown device id"}"#).await;
        let client = SpokeClientBuilder::new()
            .hub_url(format!("http://{addr}"))
            .device_name("Test Spoke")
            .build()
            .unwrap();

        let err = client
            .register_skills(Uuid::new_v4(), &crate::skills::SkillSet::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SpokeSdkError::UnknownDevice));
    }

    #[tokio::test]
    async fn stale_stored_identity_adopts_freshly_minted_id() {
        // A hub that lost its state answers every registration with a new
        // identity regardless of the id the spoke presents.
        let fresh = Uuid::new_v4();
        let body = format!(
            r#"{{"device_id":"{fresh}","display_name":"Test Spoke","normalized_name":"test_spoke"}}"#
        );
        let addr = http_stub("200 OK", &body).await;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.json");
        let stale = Uuid::new_v4();
        std::fs::write(&path, format!(r#"{{"device_id":"{stale}"}}"#)).unwrap();

        let client = SpokeClientBuilder::new()
            .hub_url(format!("http://{addr}"))
            .device_name("Test Spoke")
            .identity_path(&path)
            .build()
            .unwrap();

        let granted = client.register_device().await.unwrap();
        assert_eq!(granted, fresh);
        assert_ne!(granted, stale);
        // The fresh id is persisted for the next session.
        assert_eq!(client.load_identity(), Some(fresh));
    }
}
