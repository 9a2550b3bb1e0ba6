use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

/// Minimal event envelope (RFC3339 time).
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Envelope {
    pub time: String,
    pub kind: String,
    pub payload: Value,
}

/// A broadcast bus for JSON-serializable events, with an optional bounded
/// replay buffer so late subscribers still observe the latest known state.
#[derive(Clone)]
pub struct Bus {
    tx: broadcast::Sender<Envelope>,
    replay: Arc<Mutex<VecDeque<Envelope>>>,
    replay_cap: usize,
}

impl Bus {
    pub fn new(capacity: usize) -> Self {
        Self::new_with_replay(capacity, 0)
    }

    pub fn new_with_replay(capacity: usize, replay: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self {
            tx,
            replay: Arc::new(Mutex::new(VecDeque::with_capacity(replay))),
            replay_cap: replay,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.tx.subscribe()
    }

    /// Buffered history first, then a live receiver. The receiver is created
    /// while the replay lock is held so no published event can fall between
    /// the copied history and the live stream.
    pub fn subscribe_with_replay(&self) -> (Vec<Envelope>, broadcast::Receiver<Envelope>) {
        let buf = self.replay.lock().expect("replay lock");
        let rx = self.tx.subscribe();
        (buf.iter().cloned().collect(), rx)
    }

    pub fn publish<T: Serialize>(&self, kind: &str, payload: &T) {
        let now = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
        let val =
            serde_json::to_value(payload).unwrap_or_else(|_| serde_json::json!({"_ser":"error"}));
        let env = Envelope {
            time: now,
            kind: kind.to_string(),
            payload: val,
        };
        let mut buf = self.replay.lock().expect("replay lock");
        if self.replay_cap > 0 {
            if buf.len() == self.replay_cap {
                buf.pop_front();
            }
            buf.push_back(env.clone());
        }
        // Send while holding the lock so replay order matches live order.
        let _ = self.tx.send(env);
    }
}
