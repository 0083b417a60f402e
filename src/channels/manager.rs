//! ChannelManager — merges every gateway's stream and routes replies back.

use std::collections::HashMap;
use std::sync::Arc;

use futures::stream;

use crate::channels::{Channel, IncomingMessage, MessageStream, OutgoingResponse};
use crate::error::ChannelError;

#[derive(Default)]
pub struct ChannelManager {
    channels: HashMap<String, Arc<dyn Channel>>,
}

impl ChannelManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a channel. A channel with the same name is replaced.
    pub fn add(&mut self, channel: Arc<dyn Channel>) {
        let name = channel.name().to_string();
        if self.channels.insert(name.clone(), channel).is_some() {
            tracing::warn!(channel = %name, "Replacing already registered channel");
        }
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.channels.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Start every channel and merge their streams.
    ///
    /// Channels that fail to start are logged and skipped; it is an error
    /// only if none start.
    pub async fn start_all(&self) -> Result<MessageStream, ChannelError> {
        let mut streams = Vec::new();
        for (name, channel) in &self.channels {
            match channel.start().await {
                Ok(stream) => {
                    tracing::info!(channel = %name, "Channel started");
                    streams.push(stream);
                }
                Err(e) => tracing::error!(channel = %name, error = %e, "Channel failed to start"),
            }
        }
        if streams.is_empty() {
            return Err(ChannelError::StartupFailed {
                name: "all".into(),
                reason: "no channel could be started".into(),
            });
        }
        Ok(Box::pin(stream::select_all(streams)))
    }

    /// Send `response` on the channel `msg` arrived on.
    pub async fn respond(
        &self,
        msg: &IncomingMessage,
        response: OutgoingResponse,
    ) -> Result<(), ChannelError> {
        let channel = self
            .channels
            .get(&msg.channel)
            .ok_or_else(|| ChannelError::UnknownChannel {
                name: msg.channel.clone(),
            })?;
        channel.respond(msg, response).await
    }

    /// Health of every channel, by name.
    pub async fn health_check_all(&self) -> HashMap<String, Result<(), ChannelError>> {
        let mut results = HashMap::new();
        for (name, channel) in &self.channels {
            results.insert(name.clone(), channel.health_check().await);
        }
        results
    }

    pub async fn shutdown_all(&self) {
        for (name, channel) in &self.channels {
            if let Err(e) = channel.shutdown().await {
                tracing::warn!(channel = %name, error = %e, "Channel shutdown failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use futures::StreamExt;
    use tokio::sync::Mutex;

    use crate::channels::Payload;

    /// Channel that emits a fixed batch and records responses.
    struct ScriptedChannel {
        name: &'static str,
        inbox: Vec<IncomingMessage>,
        sent: Mutex<Vec<String>>,
        healthy: bool,
    }

    impl ScriptedChannel {
        fn new(name: &'static str, users: &[i64]) -> Self {
            let inbox = users
                .iter()
                .map(|&id| IncomingMessage::new(name, id, Payload::Text("/start".into())))
                .collect();
            Self {
                name,
                inbox,
                sent: Mutex::new(Vec::new()),
                healthy: true,
            }
        }
    }

    #[async_trait]
    impl Channel for ScriptedChannel {
        fn name(&self) -> &str {
            self.name
        }

        async fn start(&self) -> Result<MessageStream, ChannelError> {
            Ok(Box::pin(stream::iter(self.inbox.clone())))
        }

        async fn respond(
            &self,
            _msg: &IncomingMessage,
            response: OutgoingResponse,
        ) -> Result<(), ChannelError> {
            self.sent.lock().await.push(response.content);
            Ok(())
        }

        async fn health_check(&self) -> Result<(), ChannelError> {
            if self.healthy {
                Ok(())
            } else {
                Err(ChannelError::StartupFailed {
                    name: self.name.into(),
                    reason: "unreachable".into(),
                })
            }
        }
    }

    #[tokio::test]
    async fn merges_streams_and_routes_replies() {
        let a = Arc::new(ScriptedChannel::new("a", &[1, 2]));
        let b = Arc::new(ScriptedChannel::new("b", &[3]));
        let mut manager = ChannelManager::new();
        manager.add(a.clone());
        manager.add(b.clone());
        assert_eq!(manager.names(), vec!["a", "b"]);

        let messages: Vec<IncomingMessage> = manager.start_all().await.unwrap().collect().await;
        assert_eq!(messages.len(), 3);

        for msg in &messages {
            manager
                .respond(msg, OutgoingResponse::text(format!("to {}", msg.user_id)))
                .await
                .unwrap();
        }
        let mut to_a = a.sent.lock().await.clone();
        to_a.sort();
        assert_eq!(to_a, vec!["to 1", "to 2"]);
        assert_eq!(*b.sent.lock().await, vec!["to 3"]);
    }

    #[tokio::test]
    async fn unknown_channel_is_an_error() {
        let manager = ChannelManager::new();
        let msg = IncomingMessage::new("ghost", 1, Payload::Text("hi".into()));
        let err = manager
            .respond(&msg, OutgoingResponse::text("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, ChannelError::UnknownChannel { .. }));
    }

    #[tokio::test]
    async fn no_channels_fails_to_start() {
        let manager = ChannelManager::new();
        assert!(manager.is_empty());
        assert!(manager.start_all().await.is_err());
    }

    #[tokio::test]
    async fn health_is_reported_per_channel() {
        let mut manager = ChannelManager::new();
        manager.add(Arc::new(ScriptedChannel::new("up", &[])));
        manager.add(Arc::new(ScriptedChannel {
            healthy: false,
            ..ScriptedChannel::new("down", &[])
        }));

        let health = manager.health_check_all().await;
        assert_eq!(health.len(), 2);
        assert!(health["up"].is_ok());
        assert!(matches!(
            &health["down"],
            Err(ChannelError::StartupFailed { name, .. }) if name == "down"
        ));
    }
}
