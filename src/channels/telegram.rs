//! Telegram channel — long-polls the Bot API for messages and button presses.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;

use crate::channels::{
    Channel, IncomingMessage, MessageStream, OutgoingResponse, Payload, ReplyButton,
};
use crate::config::TelegramConfig;
use crate::error::ChannelError;

/// Maximum message length for Telegram's sendMessage API.
const TELEGRAM_MAX_MESSAGE_LENGTH: usize = 4096;

const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

/// Long-poll window passed to getUpdates.
const POLL_TIMEOUT_SECS: u64 = 30;

/// Telegram channel — connects to the Bot API via long-polling.
pub struct TelegramChannel {
    bot_token: SecretString,
    allowed_users: Vec<String>,
    api_base: String,
    client: reqwest::Client,
}

/// The parts of an update the dialogue cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
struct InboundUpdate {
    user_id: i64,
    username: Option<String>,
    first_name: Option<String>,
    chat_id: i64,
    payload: Payload,
    /// Set for button presses; must be answered to stop the client spinner.
    callback_query_id: Option<String>,
}

impl TelegramChannel {
    pub fn new(config: TelegramConfig) -> Self {
        Self {
            bot_token: config.bot_token,
            allowed_users: config.allowed_users,
            api_base: TELEGRAM_API_BASE.to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Point the channel at another Bot API server.
    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into().trim_end_matches('/').to_string();
        self
    }

    fn api_url(&self, method: &str) -> String {
        method_url(&self.api_base, &self.bot_token, method)
    }

    /// Send a text message, trying Markdown first with plain text fallback.
    /// Long messages are split; the keyboard goes on the last chunk.
    async fn send_message(
        &self,
        chat_id: &str,
        text: &str,
        keyboard: Option<&Value>,
    ) -> Result<(), ChannelError> {
        let chunks = split_message(text, TELEGRAM_MAX_MESSAGE_LENGTH);
        let last = chunks.len().saturating_sub(1);

        for (i, chunk) in chunks.iter().enumerate() {
            let markup = if i == last { keyboard } else { None };
            self.send_message_chunk(chat_id, chunk, markup).await?;
        }
        Ok(())
    }

    /// Send a single message chunk (≤4096 chars), Markdown-first with fallback.
    async fn send_message_chunk(
        &self,
        chat_id: &str,
        text: &str,
        keyboard: Option<&Value>,
    ) -> Result<(), ChannelError> {
        let mut body = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": "Markdown"
        });
        if let Some(markup) = keyboard {
            body["reply_markup"] = markup.clone();
        }

        let markdown_resp = self.post("sendMessage", &body).await?;
        if markdown_resp.status().is_success() {
            return Ok(());
        }

        let markdown_status = markdown_resp.status();
        tracing::warn!(
            status = ?markdown_status,
            "Telegram sendMessage with Markdown failed; retrying without parse_mode"
        );

        // Handles with underscores are the usual culprit
        if let Some(obj) = body.as_object_mut() {
            obj.remove("parse_mode");
        }
        let plain_resp = self.post("sendMessage", &body).await?;

        if !plain_resp.status().is_success() {
            let plain_err = plain_resp.text().await.unwrap_or_default();
            return Err(ChannelError::SendFailed {
                name: "telegram".into(),
                reason: format!(
                    "sendMessage failed (markdown: {markdown_status}, plain: {plain_err})"
                ),
            });
        }

        Ok(())
    }

    async fn post(&self, method: &str, body: &Value) -> Result<reqwest::Response, ChannelError> {
        self.client
            .post(self.api_url(method))
            .json(body)
            .send()
            .await
            .map_err(|e| ChannelError::SendFailed {
                name: "telegram".into(),
                reason: e.to_string(),
            })
    }
}

// ── Channel trait implementation ────────────────────────────────────

#[async_trait]
impl Channel for TelegramChannel {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn start(&self) -> Result<MessageStream, ChannelError> {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let api_base = self.api_base.clone();
        let bot_token = self.bot_token.clone();
        let allowed_users = self.allowed_users.clone();
        let client = self.client.clone();

        tokio::spawn(async move {
            let mut offset: i64 = 0;
            let url = method_url(&api_base, &bot_token, "getUpdates");

            tracing::info!("Telegram channel listening for messages...");

            loop {
                let body = serde_json::json!({
                    "offset": offset,
                    "timeout": POLL_TIMEOUT_SECS,
                    "allowed_updates": ["message", "callback_query"]
                });

                let resp = match client.post(&url).json(&body).send().await {
                    Ok(r) => r,
                    Err(e) => {
                        tracing::warn!("Telegram poll error: {e}");
                        tokio::time::sleep(Duration::from_secs(5)).await;
                        continue;
                    }
                };

                let data: Value = match resp.json().await {
                    Ok(d) => d,
                    Err(e) => {
                        tracing::warn!("Telegram parse error: {e}");
                        tokio::time::sleep(Duration::from_secs(5)).await;
                        continue;
                    }
                };

                let Some(results) = data.get("result").and_then(Value::as_array) else {
                    continue;
                };

                for update in results {
                    // Advance offset past this update
                    if let Some(uid) = update.get("update_id").and_then(Value::as_i64) {
                        offset = uid + 1;
                    }

                    let Some(inbound) = parse_update(update) else {
                        continue;
                    };

                    if !inbound.is_allowed(&allowed_users) {
                        tracing::warn!(
                            user_id = inbound.user_id,
                            username = inbound.username.as_deref().unwrap_or("unknown"),
                            "Telegram: ignoring update from unauthorized user"
                        );
                        continue;
                    }

                    if let Some(query_id) = &inbound.callback_query_id {
                        let answer = client
                            .post(method_url(&api_base, &bot_token, "answerCallbackQuery"))
                            .json(&serde_json::json!({ "callback_query_id": query_id }))
                            .send()
                            .await;
                        if let Err(e) = answer {
                            tracing::debug!("answerCallbackQuery failed: {e}");
                        }
                    }

                    let mut incoming =
                        IncomingMessage::new("telegram", inbound.user_id, inbound.payload)
                            .with_metadata(serde_json::json!({
                                "chat_id": inbound.chat_id.to_string(),
                                "first_name": inbound.first_name,
                            }));
                    if let Some(name) = inbound.username {
                        incoming = incoming.with_user_name(name);
                    }

                    if tx.send(incoming).is_err() {
                        tracing::info!("Telegram listener channel closed");
                        return;
                    }
                }
            }
        });

        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|msg| (msg, rx))
        });

        Ok(Box::pin(stream))
    }

    async fn respond(
        &self,
        msg: &IncomingMessage,
        response: OutgoingResponse,
    ) -> Result<(), ChannelError> {
        let chat_id = msg
            .metadata
            .get("chat_id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ChannelError::SendFailed {
                name: "telegram".into(),
                reason: "No chat_id in message metadata".into(),
            })?;

        let keyboard = inline_keyboard(&response.buttons);
        self.send_message(chat_id, &response.content, keyboard.as_ref())
            .await
    }

    async fn health_check(&self) -> Result<(), ChannelError> {
        let resp = self
            .client
            .get(self.api_url("getMe"))
            .send()
            .await
            .map_err(|e| ChannelError::StartupFailed {
                name: "telegram".into(),
                reason: e.to_string(),
            })?;

        if resp.status().is_success() {
            Ok(())
        } else {
            Err(ChannelError::StartupFailed {
                name: "telegram".into(),
                reason: format!("getMe returned {}", resp.status()),
            })
        }
    }

    async fn shutdown(&self) -> Result<(), ChannelError> {
        tracing::info!("Telegram channel shutting down");
        Ok(())
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

fn method_url(api_base: &str, bot_token: &SecretString, method: &str) -> String {
    format!("{api_base}/bot{}/{method}", bot_token.expose_secret())
}

/// Extract sender, chat and payload from a `message` or `callback_query`
/// update. Anything else (edits, stickers, channel posts) yields `None`.
fn parse_update(update: &Value) -> Option<InboundUpdate> {
    if let Some(message) = update.get("message") {
        let text = message.get("text").and_then(Value::as_str)?;
        let from = message.get("from")?;
        return Some(InboundUpdate {
            user_id: from.get("id").and_then(Value::as_i64)?,
            username: str_field(from, "username"),
            first_name: str_field(from, "first_name"),
            chat_id: message
                .get("chat")
                .and_then(|c| c.get("id"))
                .and_then(Value::as_i64)?,
            payload: Payload::Text(text.to_string()),
            callback_query_id: None,
        });
    }

    let query = update.get("callback_query")?;
    let from = query.get("from")?;
    Some(InboundUpdate {
        user_id: from.get("id").and_then(Value::as_i64)?,
        username: str_field(from, "username"),
        first_name: str_field(from, "first_name"),
        chat_id: query
            .get("message")
            .and_then(|m| m.get("chat"))
            .and_then(|c| c.get("id"))
            .and_then(Value::as_i64)?,
        payload: Payload::Callback(str_field(query, "data")?),
        callback_query_id: str_field(query, "id"),
    })
}

fn str_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(String::from)
}

/// One button per row.
fn inline_keyboard(buttons: &[ReplyButton]) -> Option<Value> {
    if buttons.is_empty() {
        return None;
    }
    let rows: Vec<Value> = buttons
        .iter()
        .map(|b| serde_json::json!([{ "text": b.label, "callback_data": b.token }]))
        .collect();
    Some(serde_json::json!({ "inline_keyboard": rows }))
}

impl InboundUpdate {
    /// Match the allowlist against the numeric id and the username.
    fn is_allowed(&self, allowed_users: &[String]) -> bool {
        let id = self.user_id.to_string();
        allowed_users
            .iter()
            .any(|u| u == "*" || *u == id || self.username.as_deref() == Some(u.as_str()))
    }
}

/// Split a message into chunks that fit Telegram's character limit.
/// Tries to split on newlines, then spaces, then hard-cuts on a char boundary.
fn split_message(text: &str, max_len: usize) -> Vec<String> {
    if text.len() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut remaining = text;

    while !remaining.is_empty() {
        if remaining.len() <= max_len {
            chunks.push(remaining.to_string());
            break;
        }

        let mut limit = max_len;
        while !remaining.is_char_boundary(limit) {
            limit -= 1;
        }

        // Find a good split point
        let chunk = &remaining[..limit];
        let split_at = chunk
            .rfind('\n')
            .or_else(|| chunk.rfind(' '))
            .unwrap_or(limit);

        // Don't split at position 0 (infinite loop guard)
        let split_at = if split_at == 0 { limit } else { split_at };

        chunks.push(remaining[..split_at].to_string());
        remaining = remaining[split_at..].trim_start();
    }

    chunks
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn channel(allowed: &[&str]) -> TelegramChannel {
        TelegramChannel::new(TelegramConfig {
            bot_token: SecretString::from("123:ABC".to_string()),
            allowed_users: allowed.iter().map(|s| s.to_string()).collect(),
        })
    }

    #[test]
    fn telegram_channel_name() {
        assert_eq!(channel(&["*"]).name(), "telegram");
    }

    #[test]
    fn telegram_api_url() {
        assert_eq!(
            channel(&[]).api_url("getMe"),
            "https://api.telegram.org/bot123:ABC/getMe"
        );
        let local = channel(&[]).with_api_base("http://127.0.0.1:9000/");
        assert_eq!(
            local.api_url("sendMessage"),
            "http://127.0.0.1:9000/bot123:ABC/sendMessage"
        );
    }

    // ── User allowlist tests ────────────────────────────────────────

    fn from_user(id: i64, username: Option<&str>) -> InboundUpdate {
        let mut from = serde_json::json!({"id": id, "first_name": "Test"});
        if let Some(name) = username {
            from["username"] = name.into();
        }
        parse_update(&serde_json::json!({
            "update_id": 1,
            "message": {
                "message_id": 1,
                "from": from,
                "chat": {"id": id, "type": "private"},
                "text": "/start"
            }
        }))
        .unwrap()
    }

    fn allow(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn telegram_user_allowed_wildcard() {
        assert!(from_user(1, Some("anyone")).is_allowed(&allow(&["*"])));
        assert!(from_user(1, None).is_allowed(&allow(&["*"])));
    }

    #[test]
    fn telegram_user_allowed_specific() {
        let list = allow(&["alice", "bob"]);
        assert!(from_user(1, Some("alice")).is_allowed(&list));
        assert!(!from_user(2, Some("eve")).is_allowed(&list));
        assert!(!from_user(3, None).is_allowed(&list));
    }

    #[test]
    fn telegram_user_denied_empty() {
        assert!(!from_user(1, Some("anyone")).is_allowed(&[]));
    }

    #[test]
    fn telegram_user_exact_match_not_substring() {
        let list = allow(&["alice", "12"]);
        assert!(!from_user(1, Some("alice_bot")).is_allowed(&list));
        assert!(!from_user(1, Some("malice")).is_allowed(&list));
        assert!(!from_user(123, None).is_allowed(&list));
    }

    #[test]
    fn telegram_user_allowed_by_numeric_id() {
        let list = allow(&["123456789"]);
        assert!(from_user(123456789, Some("unknown")).is_allowed(&list));
        assert!(!from_user(987, Some("unknown")).is_allowed(&list));
    }

    #[test]
    fn button_press_from_stranger_is_not_allowed() {
        let update = parse_update(&serde_json::json!({
            "update_id": 2,
            "callback_query": {
                "id": "cb-1",
                "from": {"id": 666, "username": "mallory"},
                "message": {"message_id": 5, "chat": {"id": 666}},
                "data": "role:viewer"
            }
        }))
        .unwrap();
        assert_eq!(update.callback_query_id.as_deref(), Some("cb-1"));
        assert!(!update.is_allowed(&allow(&["alice"])));
    }

    // ── Update parsing ──────────────────────────────────────────────

    #[test]
    fn parse_text_message() {
        let update = serde_json::json!({
            "update_id": 10,
            "message": {
                "message_id": 1,
                "from": {"id": 42, "username": "carol", "first_name": "Carol"},
                "chat": {"id": 4242, "type": "private"},
                "text": "/start"
            }
        });
        let parsed = parse_update(&update).unwrap();
        assert_eq!(parsed.user_id, 42);
        assert_eq!(parsed.chat_id, 4242);
        assert_eq!(parsed.username.as_deref(), Some("carol"));
        assert_eq!(parsed.payload, Payload::Text("/start".into()));
        assert_eq!(parsed.callback_query_id, None);
    }

    #[test]
    fn parse_callback_query() {
        let update = serde_json::json!({
            "update_id": 11,
            "callback_query": {
                "id": "cbq-1",
                "from": {"id": 42, "first_name": "Carol"},
                "message": {"message_id": 7, "chat": {"id": 4242}},
                "data": "role:viewer"
            }
        });
        let parsed = parse_update(&update).unwrap();
        assert_eq!(parsed.payload, Payload::Callback("role:viewer".into()));
        assert_eq!(parsed.callback_query_id.as_deref(), Some("cbq-1"));
        assert_eq!(parsed.username, None);
        assert_eq!(parsed.first_name.as_deref(), Some("Carol"));
    }

    #[test]
    fn parse_ignores_non_text_updates() {
        let sticker = serde_json::json!({
            "update_id": 12,
            "message": {"from": {"id": 1}, "chat": {"id": 1}, "sticker": {}}
        });
        assert_eq!(parse_update(&sticker), None);
        let edit = serde_json::json!({"update_id": 13, "edited_message": {}});
        assert_eq!(parse_update(&edit), None);
    }

    #[test]
    fn keyboard_has_one_button_per_row() {
        assert_eq!(inline_keyboard(&[]), None);
        let kb = inline_keyboard(&[
            ReplyButton {
                label: "I'm a viewer".into(),
                token: "role:viewer".into(),
            },
            ReplyButton {
                label: "I'm a creator".into(),
                token: "role:creator".into(),
            },
        ])
        .unwrap();
        let rows = kb["inline_keyboard"].as_array().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1][0]["callback_data"], "role:creator");
    }

    // ── Message splitting tests ─────────────────────────────────────

    #[test]
    fn split_message_short() {
        assert_eq!(split_message("Hello", 4096), vec!["Hello"]);
    }

    #[test]
    fn split_message_exact_limit() {
        let msg = "a".repeat(4096);
        let chunks = split_message(&msg, 4096);
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn split_message_over_limit_on_newline() {
        let msg = format!("{}\n{}", "a".repeat(2000), "b".repeat(3000));
        let chunks = split_message(&msg, 4096);
        assert_eq!(chunks, vec!["a".repeat(2000), "b".repeat(3000)]);
    }

    #[test]
    fn split_message_no_good_split_point() {
        let msg = "a".repeat(5000);
        let chunks = split_message(&msg, 4096);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].len(), 904);
    }

    #[test]
    fn split_message_respects_char_boundaries() {
        // "•" is three bytes; 4096 falls inside one
        let msg = "•".repeat(2000);
        let chunks = split_message(&msg, 4096);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks.concat(), msg);
    }

    #[test]
    fn incoming_message_missing_chat_id() {
        let msg = IncomingMessage::new("telegram", 1, Payload::Text("hello".into()));
        assert_eq!(msg.metadata.get("chat_id").and_then(|v| v.as_str()), None);
    }
}
