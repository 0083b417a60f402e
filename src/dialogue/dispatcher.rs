//! Glue between the channel manager and the session router.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;

use crate::channels::{ChannelManager, IncomingMessage, OutgoingResponse, ReplyButton};
use crate::error::ChannelError;

use super::engine::DialogueEngine;
use super::prompts::Prompt;
use super::sessions::{ReplySink, SessionRouter};

impl From<Prompt> for OutgoingResponse {
    fn from(prompt: Prompt) -> Self {
        let buttons = prompt
            .choices
            .iter()
            .map(|c| ReplyButton {
                label: c.label().to_string(),
                token: c.token().to_string(),
            })
            .collect();
        OutgoingResponse::text(prompt.text).with_buttons(buttons)
    }
}

#[async_trait]
impl ReplySink for ChannelManager {
    async fn deliver(&self, msg: &IncomingMessage, prompt: Prompt) {
        if let Err(e) = self.respond(msg, prompt.into()).await {
            tracing::warn!(
                channel = %msg.channel,
                user_id = msg.user_id,
                error = %e,
                "Failed to deliver reply"
            );
        }
    }
}

/// Pump every channel's messages through the dialogue until all channels
/// close, then let the lanes finish what is queued.
pub async fn run(
    channels: Arc<ChannelManager>,
    engine: Arc<DialogueEngine>,
    idle_timeout: Duration,
) -> Result<(), ChannelError> {
    let mut incoming = channels.start_all().await?;
    let sink: Arc<dyn ReplySink> = channels.clone();
    let router = SessionRouter::new(engine, sink, idle_timeout);

    while let Some(msg) = incoming.next().await {
        tracing::debug!(
            channel = %msg.channel,
            user_id = msg.user_id,
            message_id = %msg.id,
            "Message received"
        );
        router.dispatch(msg).await;
    }

    tracing::info!("All channels closed; draining lanes");
    router.close().await;
    channels.shutdown_all().await;
    Ok(())
}
