//! Remote skill invocation: sends a `skill_request` over a device's live
//! channel and correlates the asynchronous `skill_response` back to the
//! waiting caller, with a deadline.
//!
//! Correlation is solely by `request_id`. Each outstanding call owns a
//! oneshot slot; a given request id is resolved exactly once, whether by a
//! response, a timeout, or loss of the owning connection.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::oneshot;
use uuid::Uuid;

use ax_domain::config::RpcConfig;
use ax_protocol::{ChannelMessage, WIRE_VERSION};

use super::connections::Connectivity;

/// Structured result of a remote call. Connectivity and timeout failures
/// surface here as `success: false`, never as transport errors.
#[derive(Debug, Clone, Serialize)]
pub struct CallOutcome {
    pub success: bool,
    pub result: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CallOutcome {
    fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            result: Value::Null,
            error: Some(error.into()),
        }
    }
}

struct PendingCall {
    device_id: Uuid,
    /// Channel the request actually went out on; stamped after a
    /// successful send, `None` while the send is still in flight. A
    /// device can be re-admitted on a new channel while older calls are
    /// pending, so disconnect cleanup must discriminate by channel.
    channel_id: Option<Uuid>,
    tx: oneshot::Sender<(bool, Value, Option<String>)>,
}

pub struct RemoteInvoker {
    connectivity: Arc<dyn Connectivity>,
    /// request_id → pending slot + owning device.
    pending: Mutex<HashMap<String, PendingCall>>,
    timeout: Duration,
    max_pending_per_device: usize,
    max_pending_global: usize,
}

impl RemoteInvoker {
    pub fn new(connectivity: Arc<dyn Connectivity>, rpc: &RpcConfig) -> Self {
        Self {
            connectivity,
            pending: Mutex::new(HashMap::new()),
            timeout: Duration::from_secs(rpc.timeout_sec),
            max_pending_per_device: rpc.max_pending_per_device,
            max_pending_global: rpc.max_pending_global,
        }
    }

    /// Send a skill call to `device_id` and wait for the correlated
    /// response or the deadline, whichever comes first.
    pub async fn call(
        &self,
        device_id: Uuid,
        skill_name: &str,
        method_name: &str,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    ) -> CallOutcome {
        let request_id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();

        // Cap check and slot reservation under one lock acquisition, so
        // concurrent callers cannot race past the limits.
        {
            let mut pending = self.pending.lock();
            if self.max_pending_global > 0 && pending.len() >= self.max_pending_global {
                return CallOutcome::failure(format!(
                    "global pending limit reached ({} calls in flight)",
                    pending.len()
                ));
            }
            if self.max_pending_per_device > 0 {
                let device_count = pending
                    .values()
                    .filter(|pc| pc.device_id == device_id)
                    .count();
                if device_count >= self.max_pending_per_device {
                    return CallOutcome::failure(format!(
                        "per-device pending limit reached ({device_count} calls in flight for device {device_id})"
                    ));
                }
            }
            let prev = pending.insert(
                request_id.clone(),
                PendingCall {
                    device_id,
                    channel_id: None,
                    tx,
                },
            );
            // UUID v4 guarantees freshness, but assert the invariant anyway.
            debug_assert!(prev.is_none(), "request_id collision: {request_id}");
        }

        let message = ChannelMessage::SkillRequest {
            v: WIRE_VERSION,
            request_id: request_id.clone(),
            skill_name: skill_name.to_string(),
            method_name: method_name.to_string(),
            args,
            kwargs,
        };

        match self.connectivity.send(device_id, message).await {
            Some(channel_id) => {
                // Stamp the owning channel. The entry may already be gone
                // if the device answered before we got the lock back.
                if let Some(pc) = self.pending.lock().get_mut(&request_id) {
                    pc.channel_id = Some(channel_id);
                }
            }
            None => {
                self.pending.lock().remove(&request_id);
                return CallOutcome::failure(format!("device {device_id} not connected"));
            }
        }

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok((success, result, error))) => CallOutcome {
                success,
                result,
                error,
            },
            Ok(Err(_)) => {
                // Slot dropped without a send: owning connection went away.
                CallOutcome::failure(format!(
                    "device {device_id} disconnected before responding"
                ))
            }
            Err(_) => {
                self.pending.lock().remove(&request_id);
                CallOutcome::failure(format!(
                    "skill call to device {device_id} timed out after {}s",
                    self.timeout.as_secs()
                ))
            }
        }
    }

    /// Resolve a pending call from an inbound `skill_response`. A response
    /// with an unknown or expired request id is logged and dropped.
    pub fn complete(
        &self,
        request_id: &str,
        success: bool,
        result: Value,
        error: Option<String>,
    ) {
        if let Some(pending) = self.pending.lock().remove(request_id) {
            let _ = pending.tx.send((success, result, error));
        } else {
            tracing::warn!(
                request_id = %request_id,
                "skill_response for unknown request, dropping"
            );
        }
    }

    /// Resolve every pending call that went over the given channel with a
    /// connectivity-lost error instead of letting them wait out their
    /// deadlines. Called on channel disconnect. Matching is by channel,
    /// not just device: calls already in flight on a replacement channel
    /// for the same device are left alone. Returns the number failed.
    pub fn fail_pending_for_channel(&self, device_id: Uuid, channel_id: Uuid) -> usize {
        let mut pending = self.pending.lock();
        let stale: Vec<String> = pending
            .iter()
            .filter(|(_, pc)| {
                pc.device_id == device_id && pc.channel_id == Some(channel_id)
            })
            .map(|(id, _)| id.clone())
            .collect();

        let count = stale.len();
        for request_id in stale {
            if let Some(pc) = pending.remove(&request_id) {
                let _ = pc.tx.send((
                    false,
                    Value::Null,
                    Some(format!("device {device_id} disconnected")),
                ));
            }
        }

        if count > 0 {
            tracing::warn!(
                device_id = %device_id,
                channel_id = %channel_id,
                failed_calls = count,
                "failed in-flight skill calls for lost channel"
            );
        }
        count
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}
