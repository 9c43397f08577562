//! Telegram channel: long-polls the Bot API for updates.
//!
//! Replies carry an optional reply keyboard. Pressing a button sends its
//! label back as an ordinary text message.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use crate::channels::{Channel, IncomingMessage, Keyboard, MessageStream, OutgoingResponse};
use crate::error::ChannelError;

/// Maximum message length for Telegram's sendMessage API.
const TELEGRAM_MAX_MESSAGE_LENGTH: usize = 4096;

/// Long-poll timeout passed to getUpdates, in seconds.
const POLL_TIMEOUT_SECS: u64 = 30;

/// Pause before polling again after a transport error.
const POLL_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Client-side bound on one long-poll request.
const POLL_REQUEST_TIMEOUT: Duration = Duration::from_secs(POLL_TIMEOUT_SECS + 10);

/// Telegram channel, connected to the Bot API via long-polling.
pub struct TelegramChannel {
    bot_token: SecretString,
    allowed_users: Vec<String>,
    client: reqwest::Client,
    /// Per-request bound on outbound sends.
    send_timeout: Duration,
}

impl TelegramChannel {
    pub fn new(bot_token: SecretString, allowed_users: Vec<String>, send_timeout: Duration) -> Self {
        Self {
            bot_token,
            allowed_users,
            client: reqwest::Client::new(),
            send_timeout,
        }
    }

    fn api_url(&self, method: &str) -> String {
        api_url(&self.bot_token, method)
    }

    /// Check if a username or numeric id is in the allowed list.
    pub fn is_user_allowed(&self, identity: &str) -> bool {
        check_user_allowed(&self.allowed_users, [identity])
    }

    /// Send a text message, splitting anything over Telegram's limit. The
    /// keyboard rides on the last chunk.
    async fn send_message(
        &self,
        chat_id: &str,
        text: &str,
        keyboard: Option<&Keyboard>,
    ) -> Result<(), ChannelError> {
        let chunks = split_message(text, TELEGRAM_MAX_MESSAGE_LENGTH);
        let last = chunks.len().saturating_sub(1);

        for (idx, chunk) in chunks.iter().enumerate() {
            let keyboard = if idx == last { keyboard } else { None };
            self.send_message_chunk(chat_id, chunk, keyboard).await?;
        }
        Ok(())
    }

    /// Send a single chunk, Markdown first with a plain-text retry.
    async fn send_message_chunk(
        &self,
        chat_id: &str,
        text: &str,
        keyboard: Option<&Keyboard>,
    ) -> Result<(), ChannelError> {
        let mut markdown_body = send_message_body(chat_id, text, keyboard);
        markdown_body["parse_mode"] = serde_json::json!("Markdown");

        let markdown_resp = self.post_send(&markdown_body).await?;
        if markdown_resp.status().is_success() {
            return Ok(());
        }

        let markdown_status = markdown_resp.status();
        tracing::warn!(
            status = ?markdown_status,
            "Telegram sendMessage with Markdown failed; retrying without parse_mode"
        );

        // User answers are echoed back in summaries and may not be valid Markdown.
        let plain_resp = self
            .post_send(&send_message_body(chat_id, text, keyboard))
            .await?;
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

    async fn post_send(&self, body: &serde_json::Value) -> Result<reqwest::Response, ChannelError> {
        self.client
            .post(self.api_url("sendMessage"))
            .timeout(self.send_timeout)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ChannelError::Timeout {
                        name: "telegram".into(),
                        timeout: self.send_timeout,
                    }
                } else {
                    ChannelError::SendFailed {
                        name: "telegram".into(),
                        reason: e.to_string(),
                    }
                }
            })
    }
}

fn api_url(token: &SecretString, method: &str) -> String {
    format!(
        "https://api.telegram.org/bot{}/{method}",
        token.expose_secret()
    )
}

/// JSON body for a plain-text sendMessage.
fn send_message_body(chat_id: &str, text: &str, keyboard: Option<&Keyboard>) -> serde_json::Value {
    let mut body = serde_json::json!({
        "chat_id": chat_id,
        "text": text,
    });
    if let Some(keyboard) = keyboard {
        let rows: Vec<Vec<serde_json::Value>> = keyboard
            .rows
            .iter()
            .map(|row| {
                row.iter()
                    .map(|label| serde_json::json!({ "text": label }))
                    .collect()
            })
            .collect();
        body["reply_markup"] = serde_json::json!({
            "keyboard": rows,
            "resize_keyboard": true,
        });
    }
    body
}

/// Turn one getUpdates entry into an inbound message.
///
/// Returns `None` for non-text updates and for senders outside the allowlist.
/// Updates from a `getUpdates` reply, or the API's error description.
fn poll_results(data: &serde_json::Value) -> Result<&Vec<serde_json::Value>, String> {
    if data.get("ok").and_then(serde_json::Value::as_bool) == Some(false) {
        let code = data.get("error_code").and_then(serde_json::Value::as_i64);
        let description = data
            .get("description")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("no description");
        return Err(match code {
            Some(code) => format!("{code}: {description}"),
            None => description.to_string(),
        });
    }
    data.get("result")
        .and_then(serde_json::Value::as_array)
        .ok_or_else(|| "reply has no result".to_string())
}

fn parse_update(update: &serde_json::Value, allowed_users: &[String]) -> Option<IncomingMessage> {
    let message = update.get("message")?;
    let text = message.get("text").and_then(serde_json::Value::as_str)?;

    let from = message.get("from");
    let username = from
        .and_then(|f| f.get("username"))
        .and_then(serde_json::Value::as_str)
        .unwrap_or("unknown");
    let user_id = from
        .and_then(|f| f.get("id"))
        .and_then(serde_json::Value::as_i64)
        .map(|id| id.to_string());

    let mut identities = vec![username];
    if let Some(ref id) = user_id {
        identities.push(id.as_str());
    }
    if !check_user_allowed(allowed_users, identities) {
        tracing::warn!(
            username,
            user_id = user_id.as_deref().unwrap_or("unknown"),
            "Telegram: ignoring message from unauthorized user"
        );
        return None;
    }

    let chat_id = message
        .get("chat")
        .and_then(|c| c.get("id"))
        .and_then(serde_json::Value::as_i64)
        .map(|id| id.to_string())
        .or_else(|| user_id.clone())?;

    let first_name = from
        .and_then(|f| f.get("first_name"))
        .and_then(serde_json::Value::as_str);

    let incoming = IncomingMessage::new("telegram", user_id.as_deref().unwrap_or(username), text)
        .with_metadata(serde_json::json!({
            "chat_id": chat_id,
            "username": username,
        }))
        .with_user_name(first_name.unwrap_or(username));
    Some(incoming)
}

#[async_trait]
impl Channel for TelegramChannel {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn start(&self) -> Result<MessageStream, ChannelError> {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let url = self.api_url("getUpdates");
        let allowed_users = self.allowed_users.clone();
        let client = self.client.clone();

        tokio::spawn(async move {
            let mut offset: i64 = 0;

            tracing::info!("Telegram channel listening for messages...");

            loop {
                let body = serde_json::json!({
                    "offset": offset,
                    "timeout": POLL_TIMEOUT_SECS,
                    "allowed_updates": ["message"]
                });

                let resp = match client
                    .post(&url)
                    .json(&body)
                    .timeout(POLL_REQUEST_TIMEOUT)
                    .send()
                    .await
                {
                    Ok(r) => r,
                    Err(e) => {
                        tracing::warn!("Telegram poll error: {e}");
                        tokio::time::sleep(POLL_RETRY_DELAY).await;
                        continue;
                    }
                };

                let data: serde_json::Value = match resp.json().await {
                    Ok(d) => d,
                    Err(e) => {
                        tracing::warn!("Telegram parse error: {e}");
                        tokio::time::sleep(POLL_RETRY_DELAY).await;
                        continue;
                    }
                };

                let results = match poll_results(&data) {
                    Ok(results) => results,
                    Err(description) => {
                        tracing::warn!("Telegram getUpdates rejected: {description}");
                        tokio::time::sleep(POLL_RETRY_DELAY).await;
                        continue;
                    }
                };

                for update in results {
                    if let Some(uid) = update.get("update_id").and_then(serde_json::Value::as_i64)
                    {
                        offset = uid + 1;
                    }

                    let Some(incoming) = parse_update(update, &allowed_users) else {
                        continue;
                    };

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

        self.send_message(chat_id, &response.content, response.keyboard.as_ref())
            .await
    }

    /// Private chats share their id with the user, so the user id doubles
    /// as the chat id.
    async fn broadcast(
        &self,
        user_id: &str,
        response: OutgoingResponse,
    ) -> Result<(), ChannelError> {
        if user_id.parse::<i64>().is_err() {
            return Err(ChannelError::Unreachable {
                user_id: user_id.to_string(),
            });
        }
        self.send_message(user_id, &response.content, response.keyboard.as_ref())
            .await
    }

    async fn health_check(&self) -> Result<(), ChannelError> {
        let resp = self
            .client
            .get(self.api_url("getMe"))
            .timeout(self.send_timeout)
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

/// Check if any identity in the iterator matches the allowed users list.
fn check_user_allowed<'a>(
    allowed_users: &[String],
    identities: impl IntoIterator<Item = &'a str>,
) -> bool {
    let ids: Vec<&str> = identities.into_iter().collect();
    allowed_users
        .iter()
        .any(|u| u == "*" || ids.contains(&u.as_str()))
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

        let mut hard_cut = max_len;
        while !remaining.is_char_boundary(hard_cut) {
            hard_cut -= 1;
        }

        let chunk = &remaining[..hard_cut];
        let split_at = chunk
            .rfind('\n')
            .or_else(|| chunk.rfind(' '))
            .unwrap_or(hard_cut);

        // Infinite loop guard
        let split_at = if split_at == 0 { hard_cut } else { split_at };

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
        TelegramChannel::new(
            SecretString::from("123:ABC"),
            allowed.iter().map(|s| s.to_string()).collect(),
            Duration::from_secs(5),
        )
    }

    // ── Basic channel tests ─────────────────────────────────────────

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
    }

    // ── User allowlist tests ────────────────────────────────────────

    #[test]
    fn telegram_user_allowed_wildcard() {
        assert!(channel(&["*"]).is_user_allowed("anyone"));
    }

    #[test]
    fn telegram_user_allowed_specific() {
        let ch = channel(&["alice", "bob"]);
        assert!(ch.is_user_allowed("alice"));
        assert!(!ch.is_user_allowed("eve"));
    }

    #[test]
    fn telegram_user_denied_empty() {
        assert!(!channel(&[]).is_user_allowed("anyone"));
    }

    #[test]
    fn telegram_user_exact_match_not_substring() {
        let ch = channel(&["alice"]);
        assert!(!ch.is_user_allowed("alice_bot"));
        assert!(!ch.is_user_allowed("malice"));
    }

    // ── Update parsing ──────────────────────────────────────────────

    fn update(text: &str) -> serde_json::Value {
        serde_json::json!({
            "update_id": 10,
            "message": {
                "text": text,
                "from": {"id": 42, "username": "ana", "first_name": "Ana"},
                "chat": {"id": 42}
            }
        })
    }

    #[test]
    fn parse_update_builds_incoming_message() {
        let msg = parse_update(&update("/diario"), &["*".to_string()]).unwrap();
        assert_eq!(msg.channel, "telegram");
        assert_eq!(msg.user_id, "42");
        assert_eq!(msg.content, "/diario");
        assert_eq!(msg.user_name.as_deref(), Some("Ana"));
        assert_eq!(msg.metadata["chat_id"], "42");
    }

    #[test]
    fn parse_update_allows_numeric_id() {
        assert!(parse_update(&update("olá"), &["42".to_string()]).is_some());
        assert!(parse_update(&update("olá"), &["ana".to_string()]).is_some());
        assert!(parse_update(&update("olá"), &["bob".to_string()]).is_none());
    }

    #[test]
    fn parse_update_skips_non_text() {
        let sticker = serde_json::json!({
            "update_id": 11,
            "message": {"sticker": {}, "from": {"id": 42}, "chat": {"id": 42}}
        });
        assert!(parse_update(&sticker, &["*".to_string()]).is_none());
    }

    // ── Outbound body ───────────────────────────────────────────────

    #[test]
    fn send_body_without_keyboard() {
        let body = send_message_body("42", "olá", None);
        assert_eq!(body["chat_id"], "42");
        assert_eq!(body["text"], "olá");
        assert!(body.get("reply_markup").is_none());
        assert!(body.get("parse_mode").is_none());
    }

    #[test]
    fn send_body_with_reply_keyboard() {
        let keyboard = Keyboard::single("Iniciar Rotina Matinal");
        let body = send_message_body("42", "Bom dia", Some(&keyboard));
        assert_eq!(
            body["reply_markup"]["keyboard"][0][0]["text"],
            "Iniciar Rotina Matinal"
        );
        assert_eq!(body["reply_markup"]["resize_keyboard"], true);
    }

    #[tokio::test]
    async fn broadcast_rejects_non_numeric_user() {
        let err = channel(&["*"])
            .broadcast("local-user", OutgoingResponse::text("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, ChannelError::Unreachable { .. }));
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
        assert_eq!(chunks[0].len(), 4096);
        assert_eq!(chunks[1].len(), 904);
    }

    #[test]
    fn poll_results_reads_updates() {
        let data = serde_json::json!({"ok": true, "result": [{"update_id": 7}]});
        assert_eq!(poll_results(&data).unwrap().len(), 1);
    }

    #[test]
    fn poll_results_reports_api_errors() {
        let data = serde_json::json!({
            "ok": false,
            "error_code": 401,
            "description": "Unauthorized"
        });
        assert_eq!(poll_results(&data).unwrap_err(), "401: Unauthorized");

        let conflict = serde_json::json!({"ok": false, "description": "Conflict"});
        assert_eq!(poll_results(&conflict).unwrap_err(), "Conflict");
    }

    #[test]
    fn poll_results_rejects_missing_result() {
        assert!(poll_results(&serde_json::json!({"ok": true})).is_err());
    }

    #[test]
    fn split_message_respects_char_boundaries() {
        // "ã" is two bytes; a hard cut at an odd byte must back off.
        let msg = "ã".repeat(3000);
        let chunks = split_message(&msg, 4095);
        assert_eq!(chunks.concat(), msg);
        assert!(chunks.iter().all(|c| c.len() <= 4095));
    }
}
