//! In-process fan-out bus for real-time events.
//!
//! One broadcast channel carries every event; each WebSocket connection runs
//! a forwarding task over its own receiver. The channel capacity (256)
//! bounds each receiver's backlog: a connection that falls that far behind
//! is disconnected by its socket loop rather than silently skipped forward.

use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::broadcast;

use crate::events::Event;

/// Outbound buffer per connection before the slow client is dropped.
pub const CLIENT_BUFFER: usize = 256;

pub struct Hub {
    tx: broadcast::Sender<String>,
    clients: AtomicUsize,
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

impl Hub {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(CLIENT_BUFFER);
        Self {
            tx,
            clients: AtomicUsize::new(0),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }

    /// Serialize and broadcast an event to all connected clients. Returns
    /// silently when nobody is listening.
    pub fn broadcast(&self, event: &Event) {
        match serde_json::to_string(event) {
            Ok(json) => {
                let _ = self.tx.send(json);
            }
            Err(e) => {
                eprintln!("[hub] failed to serialize event: {}", e);
            }
        }
    }

    pub fn client_connected(&self) -> usize {
        self.clients.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn client_disconnected(&self) -> usize {
        self.clients.fetch_sub(1, Ordering::SeqCst).saturating_sub(1)
    }

    pub fn client_count(&self) -> usize {
        self.clients.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::QueueStat;

    #[tokio::test]
    async fn broadcast_delivers_to_all_subscribers() {
        let hub = Hub::new();
        let mut rx1 = hub.subscribe();
        let mut rx2 = hub.subscribe();

        hub.broadcast(&Event::AgentQueue {
            project_id: 1,
            queues: vec![QueueStat::idle(1, "qa_tester")],
        });

        let received1 = rx1.recv().await.unwrap();
        let received2 = rx2.recv().await.unwrap();
        assert!(received1.contains("agent.queue"));
        assert_eq!(received1, received2);
    }

    #[tokio::test]
    async fn broadcast_without_receivers_does_not_panic() {
        let hub = Hub::new();
        hub.broadcast(&Event::AgentQueue {
            project_id: 1,
            queues: vec![],
        });
    }

    #[tokio::test]
    async fn subscribers_see_events_in_send_order() {
        let hub = Hub::new();
        let mut rx = hub.subscribe();
        for project_id in 0..10 {
            hub.broadcast(&Event::AgentQueue {
                project_id,
                queues: vec![],
            });
        }
        for project_id in 0..10 {
            let raw = rx.recv().await.unwrap();
            let parsed: serde_json::Value = serde_json::from_str(&raw).unwrap();
            assert_eq!(parsed["payload"]["projectId"], project_id);
        }
    }

    #[tokio::test]
    async fn slow_subscriber_observes_lag() {
        let hub = Hub::new();
        let mut rx = hub.subscribe();
        for project_id in 0..(CLIENT_BUFFER as i64 + 10) {
            hub.broadcast(&Event::AgentQueue {
                project_id,
                queues: vec![],
            });
        }
        match rx.recv().await {
            Err(broadcast::error::RecvError::Lagged(_)) => {}
            other => panic!("expected lag, got {:?}", other),
        }
    }

    #[test]
    fn client_counting() {
        let hub = Hub::new();
        assert_eq!(hub.client_count(), 0);
        assert_eq!(hub.client_connected(), 1);
        assert_eq!(hub.client_connected(), 2);
        assert_eq!(hub.client_disconnected(), 1);
        assert_eq!(hub.client_count(), 1);
    }
}
