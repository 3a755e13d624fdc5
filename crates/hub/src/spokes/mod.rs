pub mod connections;
pub mod invoker;
pub mod ws;

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::HashSet;

    use ax_protocol::ChannelMessage;
    use parking_lot::Mutex;
    use uuid::Uuid;

    use super::connections::Connectivity;

    /// Test double for [`Connectivity`]: a fixed connected set plus a log of
    /// sent messages, with an optional hard send failure. All sends report
    /// the single `channel_id`; tests simulating an eviction swap it.
    #[derive(Default)]
    pub struct FakeConnectivity {
        pub channel_id: Mutex<Uuid>,
        pub connected: Mutex<HashSet<Uuid>>,
        pub sent: Mutex<Vec<(Uuid, ChannelMessage)>>,
        pub fail_sends: bool,
    }

    impl FakeConnectivity {
        pub fn with_connected(ids: &[Uuid]) -> Self {
            Self {
                connected: Mutex::new(ids.iter().copied().collect()),
                ..Self::default()
            }
        }
    }

    #[async_trait::async_trait]
    impl Connectivity for FakeConnectivity {
        fn is_connected(&self, device_id: Uuid) -> bool {
            self.connected.lock().contains(&device_id)
        }

        fn connected_devices(&self) -> HashSet<Uuid> {
            self.connected.lock().clone()
        }

        async fn send(&self, device_id: Uuid, message: ChannelMessage) -> Option<Uuid> {
            if self.fail_sends || !self.is_connected(device_id) {
                return None;
            }
            self.sent.lock().push((device_id, message));
            Some(*self.channel_id.lock())
        }
    }
}
