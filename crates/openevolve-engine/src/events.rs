use serde::Serialize;
use std::collections::HashMap;
use tokio::sync::broadcast;

/// Events emitted by a run, in iteration order. Progress events are
/// published after the corresponding database insertion.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EvolutionEvent {
    Progress {
        iteration: u64,
        best_score: Option<f64>,
        metrics: HashMap<String, f64>,
        best_program_id: Option<String>,
    },
    Status {
        status: String,
        iteration: u64,
        total_iterations: u64,
        best_score: Option<f64>,
    },
    Complete {
        best_program_id: Option<String>,
        best_score: Option<f64>,
    },
    Error {
        error: String,
    },
    Log {
        timestamp: i64,
        level: String,
        source: String,
        message: String,
    },
}

/// Broadcast bus for run events. Subscribers must not mutate engine
/// state; sends with no receivers are dropped silently.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EvolutionEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1024);
        Self { sender }
    }

    pub fn publish(&self, event: EvolutionEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EvolutionEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_reaches_subscriber() {
        let bus = EventBus::new();
        let mut receiver = bus.subscribe();
        bus.publish(EvolutionEvent::Complete {
            best_program_id: Some("p1".into()),
            best_score: Some(0.9),
        });
        let event = receiver.recv().await.unwrap();
        assert!(matches!(event, EvolutionEvent::Complete { .. }));
    }

    #[test]
    fn publish_without_subscribers_is_fine() {
        let bus = EventBus::new();
        bus.publish(EvolutionEvent::Error {
            error: "nope".into(),
        });
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let event = EvolutionEvent::Status {
            status: "running".into(),
            iteration: 3,
            total_iterations: 10,
            best_score: None,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"status\""));
        assert!(json.contains("\"iteration\":3"));
    }
}
