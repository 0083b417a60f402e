//! Per-user lanes.
//!
//! Every active conversation gets one FIFO queue and one task that owns the
//! user's `DialogueState`. Messages from the same user are handled strictly
//! one after another; different users never wait on each other.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

use crate::catalog::UserId;
use crate::channels::IncomingMessage;

use super::engine::{DialogueEngine, Participant};
use super::event::Event;
use super::prompts::Prompt;
use super::state::DialogueState;

/// Where lanes deliver their replies.
#[async_trait]
pub trait ReplySink: Send + Sync {
    async fn deliver(&self, msg: &IncomingMessage, prompt: Prompt);
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct LaneKey {
    channel: String,
    user_id: UserId,
}

struct LaneHandle {
    tx: mpsc::UnboundedSender<IncomingMessage>,
    task: JoinHandle<()>,
}

type LaneMap = Arc<Mutex<HashMap<LaneKey, LaneHandle>>>;

/// Routes incoming messages into per-user lanes.
pub struct SessionRouter {
    engine: Arc<DialogueEngine>,
    sink: Arc<dyn ReplySink>,
    idle_timeout: Duration,
    lanes: LaneMap,
}

impl SessionRouter {
    pub fn new(
        engine: Arc<DialogueEngine>,
        sink: Arc<dyn ReplySink>,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            engine,
            sink,
            idle_timeout,
            lanes: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Queue `msg` on its user's lane, opening the lane if needed.
    pub async fn dispatch(&self, msg: IncomingMessage) {
        let key = LaneKey {
            channel: msg.channel.clone(),
            user_id: msg.user_id,
        };

        let mut lanes = self.lanes.lock().await;
        let msg = match lanes.get(&key) {
            Some(lane) => match lane.tx.send(msg) {
                Ok(()) => return,
                // The lane stopped on its own; open a fresh one
                Err(mpsc::error::SendError(msg)) => msg,
            },
            None => msg,
        };

        let (tx, rx) = mpsc::unbounded_channel();
        if tx.send(msg).is_err() {
            return;
        }
        tracing::debug!(channel = %key.channel, user_id = key.user_id, "Opening lane");

        let lane = Lane {
            key: key.clone(),
            rx,
            engine: Arc::clone(&self.engine),
            sink: Arc::clone(&self.sink),
            idle_timeout: self.idle_timeout,
            registry: Arc::clone(&self.lanes),
        };
        let task = tokio::spawn(lane.run());
        lanes.insert(key, LaneHandle { tx, task });
    }

    /// Number of lanes currently open.
    pub async fn active_lanes(&self) -> usize {
        self.lanes.lock().await.len()
    }

    /// Stop accepting work and wait for every lane to drain its queue.
    pub async fn close(&self) {
        let handles: Vec<LaneHandle> = self.lanes.lock().await.drain().map(|(_, h)| h).collect();
        for handle in handles {
            drop(handle.tx);
            if let Err(e) = handle.task.await {
                tracing::warn!(error = %e, "Lane task failed");
            }
        }
    }
}

struct Lane {
    key: LaneKey,
    rx: mpsc::UnboundedReceiver<IncomingMessage>,
    engine: Arc<DialogueEngine>,
    sink: Arc<dyn ReplySink>,
    idle_timeout: Duration,
    registry: LaneMap,
}

impl Lane {
    async fn run(mut self) {
        let mut state = DialogueState::default();

        while let Some(msg) = self.next().await {
            let who = Participant::new(msg.user_id, msg.user_name.clone());
            let event = Event::parse(&msg.payload);
            let transition = self.engine.step(&state, &who, event).await;
            state = transition.next;
            self.sink.deliver(&msg, transition.prompt).await;
        }
    }

    /// Next queued message, or `None` once the lane should stop.
    ///
    /// An idle lane deregisters itself, but only after checking under the
    /// registry lock that nothing was queued in the meantime.
    async fn next(&mut self) -> Option<IncomingMessage> {
        match tokio::time::timeout(self.idle_timeout, self.rx.recv()).await {
            Ok(msg) => msg,
            Err(_) => {
                let mut registry = self.registry.lock().await;
                match self.rx.try_recv() {
                    Ok(msg) => Some(msg),
                    Err(_) => {
                        registry.remove(&self.key);
                        tracing::debug!(
                            channel = %self.key.channel,
                            user_id = self.key.user_id,
                            "Lane idle; dropping conversation state"
                        );
                        None
                    }
                }
            }
        }
    }
}
