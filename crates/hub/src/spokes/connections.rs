//! Live control-channel tracking: at most one connection per device.
//!
//! The map is read-mostly: `is_connected`/`send` run on every search and
//! call, while admission and removal happen only on connect/disconnect.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use ax_protocol::ChannelMessage;

/// Outbound half of a device's channel: messages pushed here are forwarded
/// to the WebSocket by the connection's writer task.
pub type ChannelSink = mpsc::Sender<ChannelMessage>;

/// One live control channel.
pub struct Connection {
    /// Distinguishes this channel instance from any replacement for the
    /// same device, so a stale disconnect cannot clobber a newer channel.
    pub channel_id: Uuid,
    pub sink: ChannelSink,
    pub connected_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    /// Cancelled on eviction; the socket task closes the WebSocket.
    pub closer: CancellationToken,
}

/// Capability surface the routing layers need from connection state.
/// Narrow on purpose so tests can substitute a double.
#[async_trait::async_trait]
pub trait Connectivity: Send + Sync {
    fn is_connected(&self, device_id: Uuid) -> bool;
    fn connected_devices(&self) -> HashSet<Uuid>;
    /// Returns the id of the channel that accepted the message, or `None`
    /// when the device has no live channel or the channel's sink is gone.
    /// Callers that track in-flight work key it by this id, so a later
    /// channel loss only affects the messages that went over it.
    async fn send(&self, device_id: Uuid, message: ChannelMessage) -> Option<Uuid>;
}

/// Thread-safe map of device id → live connection.
#[derive(Default)]
pub struct ConnectionManager {
    connections: RwLock<HashMap<Uuid, Connection>>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit a new channel for `device_id`, atomically replacing and
    /// evicting any existing one. The evicted channel's closer is
    /// cancelled; its remote end observes an ordinary close.
    pub fn admit(&self, device_id: Uuid, connection: Connection) {
        let channel_id = connection.channel_id;
        let evicted = self.connections.write().insert(device_id, connection);
        if let Some(old) = evicted {
            old.closer.cancel();
            tracing::info!(
                device_id = %device_id,
                evicted_channel = %old.channel_id,
                new_channel = %channel_id,
                "previous channel evicted"
            );
        } else {
            tracing::info!(device_id = %device_id, channel_id = %channel_id, "channel admitted");
        }
    }

    /// Remove the mapping, but only if `channel_id` still matches the
    /// stored connection. A disconnect notification from an evicted channel
    /// arriving late is a no-op.
    pub fn remove(&self, device_id: Uuid, channel_id: Uuid) {
        let mut connections = self.connections.write();
        if connections
            .get(&device_id)
            .is_some_and(|c| c.channel_id == channel_id)
        {
            connections.remove(&device_id);
            tracing::info!(device_id = %device_id, channel_id = %channel_id, "channel removed");
        }
    }

    /// Refresh the liveness timestamp (called on any inbound message).
    pub fn touch(&self, device_id: Uuid) {
        if let Some(conn) = self.connections.write().get_mut(&device_id) {
            conn.last_seen = Utc::now();
        }
    }

    pub fn sink_for(&self, device_id: Uuid) -> Option<ChannelSink> {
        self.connections
            .read()
            .get(&device_id)
            .map(|c| c.sink.clone())
    }

    pub fn len(&self) -> usize {
        self.connections.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.read().is_empty()
    }

    /// Close and drop connections with no inbound traffic for longer than
    /// `timeout_secs`.
    pub fn prune_idle(&self, timeout_secs: i64) {
        let now = Utc::now();
        let mut connections = self.connections.write();
        let before = connections.len();
        connections.retain(|device_id, conn| {
            let age = now.signed_duration_since(conn.last_seen).num_seconds();
            if age < timeout_secs {
                return true;
            }
            conn.closer.cancel();
            tracing::info!(device_id = %device_id, idle_secs = age, "idle channel closed");
            false
        });
        let pruned = before - connections.len();
        if pruned > 0 {
            tracing::info!(pruned, remaining = connections.len(), "pruned idle channels");
        }
    }
}

#[async_trait::async_trait]
impl Connectivity for ConnectionManager {
    fn is_connected(&self, device_id: Uuid) -> bool {
        self.connections.read().contains_key(&device_id)
    }

    fn connected_devices(&self) -> HashSet<Uuid> {
        self.connections.read().keys().copied().collect()
    }

    async fn send(&self, device_id: Uuid, message: ChannelMessage) -> Option<Uuid> {
        // Clone the sink under the read lock, await outside it.
        let (channel_id, sink) = {
            let connections = self.connections.read();
            let conn = connections.get(&device_id)?;
            (conn.channel_id, conn.sink.clone())
        };
        sink.send(message).await.ok()?;
        Some(channel_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_connection() -> (Connection, mpsc::Receiver<ChannelMessage>, CancellationToken) {
        let (tx, rx) = mpsc::channel(4);
        let closer = CancellationToken::new();
        let conn = Connection {
            channel_id: Uuid::new_v4(),
            sink: tx,
            connected_at: Utc::now(),
            last_seen: Utc::now(),
            closer: closer.clone(),
        };
        (conn, rx, closer)
    }

    #[test]
    fn admit_replaces_and_evicts_same_device() {
        let mgr = ConnectionManager::new();
        let device = Uuid::new_v4();

        let (first, _rx1, first_closer) = make_connection();
        mgr.admit(device, first);
        assert!(mgr.is_connected(device));
        assert!(!first_closer.is_cancelled());

        let (second, _rx2, second_closer) = make_connection();
        let second_id = second.channel_id;
        mgr.admit(device, second);

        // Exactly one current connection: the second. The first was closed.
        assert_eq!(mgr.len(), 1);
        assert!(first_closer.is_cancelled());
        assert!(!second_closer.is_cancelled());
        let stored = mgr.connections.read();
        assert_eq!(stored.get(&device).unwrap().channel_id, second_id);
    }

    #[test]
    fn distinct_devices_coexist() {
        let mgr = ConnectionManager::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        let (conn_a, _rx_a, closer_a) = make_connection();
        let (conn_b, _rx_b, closer_b) = make_connection();
        mgr.admit(a, conn_a);
        mgr.admit(b, conn_b);

        assert!(mgr.is_connected(a));
        assert!(mgr.is_connected(b));
        assert!(!closer_a.is_cancelled());
        assert!(!closer_b.is_cancelled());
        assert_eq!(mgr.connected_devices().len(), 2);
    }

    #[test]
    fn stale_remove_cannot_clobber_replacement() {
        let mgr = ConnectionManager::new();
        let device = Uuid::new_v4();

        let (first, _rx1, _) = make_connection();
        let first_id = first.channel_id;
        mgr.admit(device, first);

        let (second, _rx2, _) = make_connection();
        mgr.admit(device, second);

        // Late disconnect from the evicted channel: no-op.
        mgr.remove(device, first_id);
        assert!(mgr.is_connected(device));
    }

    #[test]
    fn matching_remove_deletes_mapping() {
        let mgr = ConnectionManager::new();
        let device = Uuid::new_v4();
        let (conn, _rx, _) = make_connection();
        let channel_id = conn.channel_id;
        mgr.admit(device, conn);

        mgr.remove(device, channel_id);
        assert!(!mgr.is_connected(device));
        assert!(mgr.is_empty());
    }

    #[tokio::test]
    async fn send_reaches_live_sink_and_fails_without_one() {
        let mgr = ConnectionManager::new();
        let device = Uuid::new_v4();

        assert!(mgr.send(device, ChannelMessage::Ping).await.is_none());

        let (conn, mut rx, _) = make_connection();
        let channel_id = conn.channel_id;
        mgr.admit(device, conn);
        assert_eq!(
            mgr.send(device, ChannelMessage::Ping).await,
            Some(channel_id)
        );
        assert!(matches!(rx.recv().await, Some(ChannelMessage::Ping)));
    }

    #[test]
    fn prune_idle_closes_stale_connections() {
        let mgr = ConnectionManager::new();
        let device = Uuid::new_v4();
        let (mut conn, _rx, closer) = make_connection();
        conn.last_seen = Utc::now() - chrono::Duration::seconds(600);
        mgr.admit(device, conn);

        mgr.prune_idle(120);
        assert!(!mgr.is_connected(device));
        assert!(closer.is_cancelled());
    }
}
