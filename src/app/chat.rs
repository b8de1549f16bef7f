//! Chat transcript and completion client.
//!
//! User input is sanitized before it enters the transcript, replies are
//! HTML-escaped before the shell renders them, and the transcript itself is
//! bounded: once it exceeds the configured size the oldest turns are dropped,
//! always keeping complete user/assistant pairs at the newest end.

use crate::error::{CompanionError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Who said a transcript line. `System` never enters the transcript; it is
/// prepended to the wire payload only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// One transcript line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    #[must_use]
    pub fn system(content: &str) -> Self {
        Self {
            role: ChatRole::System,
            content: content.to_owned(),
        }
    }

    #[must_use]
    pub fn user(content: &str) -> Self {
        Self {
            role: ChatRole::User,
            content: content.to_owned(),
        }
    }

    #[must_use]
    pub fn assistant(content: &str) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.to_owned(),
        }
    }
}

/// Strip markup from user input: everything between `<` and `>` is removed,
/// an unclosed `<` drops the rest of the line, and the result is trimmed.
/// A `>` with no tag open is ordinary text and passes through.
#[must_use]
pub fn sanitize_input(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_tag = false;
    for ch in text.chars() {
        match ch {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if in_tag => {}
            _ => out.push(ch),
        }
    }
    out.trim().to_owned()
}

/// Escape text for rendering in an HTML transcript view.
#[must_use]
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

/// Reject input that is empty after sanitizing or longer than `max_len`.
///
/// # Errors
///
/// Returns `Validation` with a user-presentable message.
pub fn validate_input(text: &str, max_len: usize) -> Result<()> {
    if text.is_empty() {
        return Err(CompanionError::Validation(
            "message is empty".to_owned(),
        ));
    }
    if text.chars().count() > max_len {
        return Err(CompanionError::Validation(format!(
            "message is too long (limit {max_len} characters)"
        )));
    }
    Ok(())
}

/// Drop the oldest turns until the transcript fits `max_len`, keeping the
/// newest complete user/assistant pairs. The surviving window never opens on
/// an assistant line with its user line cut away.
pub fn truncate_conversation(conversation: &mut Vec<ChatMessage>, max_len: usize) {
    if conversation.len() <= max_len {
        return;
    }
    let mut start = conversation.len() - max_len;
    while start < conversation.len() && conversation[start].role == ChatRole::Assistant {
        start += 1;
    }
    conversation.drain(..start);
}

// ── Completion client ───────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    messages: &'a [ChatMessage],
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    content: String,
}

/// Client for the chat completion endpoint. One attempt per call; the caller
/// decides what to say when it fails.
#[derive(Debug, Clone)]
pub struct ChatClient {
    client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
}

impl ChatClient {
    #[must_use]
    pub fn new(client: reqwest::Client, endpoint: String) -> Self {
        Self {
            client,
            endpoint,
            timeout: Duration::from_secs(30),
        }
    }

    /// Request a completion for the transcript. The system prompt travels as
    /// a leading `system` message in the `messages` array.
    ///
    /// # Errors
    ///
    /// Returns `Chat` on timeout, transport failure, non-2xx status, or a
    /// malformed body.
    pub async fn complete(
        &self,
        system_prompt: &str,
        messages: &[ChatMessage],
    ) -> Result<String> {
        let mut payload = Vec::with_capacity(messages.len() + 1);
        if !system_prompt.is_empty() {
            payload.push(ChatMessage::system(system_prompt));
        }
        payload.extend_from_slice(messages);
        let request = ChatRequest { messages: &payload };
        let response = tokio::time::timeout(
            self.timeout,
            self.client.post(&self.endpoint).json(&request).send(),
        )
        .await
        .map_err(|_| CompanionError::Chat("request timed out".to_owned()))?
        .map_err(|e| CompanionError::Chat(format!("request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(CompanionError::Chat(format!(
                "endpoint returned {}",
                response.status()
            )));
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| CompanionError::Chat(format!("malformed reply: {e}")))?;
        debug!("chat reply: {} chars", body.content.len());
        Ok(body.content)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn sanitize_strips_tags_and_trims() {
        assert_eq!(sanitize_input("  hello <b>world</b>  "), "hello world");
        assert_eq!(sanitize_input("<script>alert(1)</script>hi"), "alert(1)hi");
        assert_eq!(sanitize_input("plain text"), "plain text");
    }

    #[test]
    fn sanitize_drops_unclosed_tag_remainder() {
        assert_eq!(sanitize_input("before <img src=x onerror=..."), "before");
    }

    #[test]
    fn sanitize_keeps_a_bare_greater_than() {
        assert_eq!(sanitize_input("1 > 2"), "1 > 2");
        assert_eq!(sanitize_input("a <b>bold</b> > c"), "a bold > c");
    }

    #[test]
    fn escape_covers_html_metacharacters() {
        assert_eq!(
            escape_html(r#"<a href="x">&'"#),
            "&lt;a href=&quot;x&quot;&gt;&amp;&#39;"
        );
    }

    #[test]
    fn validation_rejects_empty_and_oversized() {
        assert!(validate_input("", 500).is_err());
        assert!(validate_input("ok", 500).is_ok());
        let long = "x".repeat(501);
        assert!(matches!(
            validate_input(&long, 500),
            Err(CompanionError::Validation(_))
        ));
        assert!(validate_input(&"x".repeat(500), 500).is_ok());
    }

    #[test]
    fn truncation_keeps_newest_pairs() {
        let mut convo = Vec::new();
        for i in 0..4 {
            convo.push(ChatMessage::user(&format!("q{i}")));
            convo.push(ChatMessage::assistant(&format!("a{i}")));
        }
        truncate_conversation(&mut convo, 4);

        assert_eq!(convo.len(), 4);
        assert_eq!(convo[0].role, ChatRole::User);
        assert_eq!(convo[0].content, "q2");
        assert_eq!(convo[3].content, "a3");
    }

    #[test]
    fn truncation_never_opens_on_an_assistant_line() {
        let mut convo = vec![
            ChatMessage::user("q0"),
            ChatMessage::assistant("a0"),
            ChatMessage::user("q1"),
            ChatMessage::assistant("a1"),
            ChatMessage::user("q2"),
        ];
        // A window of 4 would start on a1; the survivor set shrinks instead.
        truncate_conversation(&mut convo, 4);
        assert_eq!(convo[0].role, ChatRole::User);
        assert_eq!(convo[0].content, "q1");
        assert_eq!(convo.len(), 3);
    }

    #[test]
    fn truncation_is_a_no_op_under_the_limit() {
        let mut convo = vec![ChatMessage::user("hi")];
        truncate_conversation(&mut convo, 50);
        assert_eq!(convo.len(), 1);
    }

    #[tokio::test]
    async fn complete_sends_the_prompt_as_a_leading_system_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat"))
            .and(body_json(serde_json::json!({
                "messages": [
                    { "role": "system", "content": "You are a companion." },
                    { "role": "user", "content": "hi" }
                ]
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "content": "hello there" })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = ChatClient::new(reqwest::Client::new(), format!("{}/chat", server.uri()));
        let reply = client
            .complete("You are a companion.", &[ChatMessage::user("hi")])
            .await
            .unwrap();
        assert_eq!(reply, "hello there");
    }

    #[tokio::test]
    async fn complete_omits_the_system_line_when_the_prompt_is_empty() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat"))
            .and(body_json(serde_json::json!({
                "messages": [{ "role": "user", "content": "hi" }]
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "content": "ok" })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = ChatClient::new(reqwest::Client::new(), format!("{}/chat", server.uri()));
        let reply = client.complete("", &[ChatMessage::user("hi")]).await.unwrap();
        assert_eq!(reply, "ok");
    }

    #[tokio::test]
    async fn complete_fails_without_retrying() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&server)
            .await;

        let client = ChatClient::new(reqwest::Client::new(), format!("{}/chat", server.uri()));
        let result = client.complete("", &[ChatMessage::user("hi")]).await;
        assert!(matches!(result, Err(CompanionError::Chat(_))));
    }
}
