//! CLI channel — stdin/stdout REPL for local testing.
//!
//! Buttons are printed as a numbered list; typing the number presses the
//! button.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::Mutex;

use crate::catalog::UserId;
use crate::channels::{
    Channel, IncomingMessage, MessageStream, OutgoingResponse, Payload, ReplyButton,
};
use crate::error::ChannelError;

/// Id the local user is registered under.
pub const CLI_USER_ID: UserId = 0;

/// A simple CLI channel that reads from stdin and writes to stdout.
pub struct CliChannel {
    user_name: String,
    /// Buttons of the last response, so a typed number can press one.
    buttons: Arc<Mutex<Vec<ReplyButton>>>,
}

impl CliChannel {
    pub fn new() -> Self {
        let user_name = std::env::var("USER").unwrap_or_else(|_| "local-user".to_string());
        Self {
            user_name,
            buttons: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl Default for CliChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Channel for CliChannel {
    fn name(&self) -> &str {
        "cli"
    }

    async fn start(&self) -> Result<MessageStream, ChannelError> {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let buttons = Arc::clone(&self.buttons);
        let user_name = self.user_name.clone();

        tokio::spawn(async move {
            let stdin = tokio::io::stdin();
            let reader = BufReader::new(stdin);
            let mut lines = reader.lines();

            eprintln!("Type /start to begin.");
            eprint!("> ");

            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let line = line.trim().to_string();
                        if line.is_empty() {
                            eprint!("> ");
                            continue;
                        }
                        let payload = payload_for(&line, &buttons.lock().await);
                        let msg = IncomingMessage::new("cli", CLI_USER_ID, payload)
                            .with_user_name(user_name.clone());
                        if tx.send(msg).is_err() {
                            break;
                        }
                    }
                    Ok(None) => break, // EOF
                    Err(e) => {
                        tracing::error!("Error reading stdin: {}", e);
                        break;
                    }
                }
            }
        });

        let stream = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|msg| (msg, rx))
        });

        Ok(Box::pin(stream))
    }

    async fn respond(
        &self,
        _msg: &IncomingMessage,
        response: OutgoingResponse,
    ) -> Result<(), ChannelError> {
        println!("\n{}", render(&response));
        *self.buttons.lock().await = response.buttons;
        eprint!("> ");
        Ok(())
    }

    async fn health_check(&self) -> Result<(), ChannelError> {
        Ok(())
    }
}

/// A bare number selects the matching button of the last response.
fn payload_for(line: &str, buttons: &[ReplyButton]) -> Payload {
    line.parse::<usize>()
        .ok()
        .and_then(|n| n.checked_sub(1))
        .and_then(|i| buttons.get(i))
        .map(|b| Payload::Callback(b.token.clone()))
        .unwrap_or_else(|| Payload::Text(line.to_string()))
}

fn render(response: &OutgoingResponse) -> String {
    let mut out = response.content.clone();
    for (i, button) in response.buttons.iter().enumerate() {
        out.push_str(&format!("\n  [{}] {}", i + 1, button.label));
    }
    out.push('\n');
    out
}
