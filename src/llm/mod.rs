//! LLMClient (§4.4)
//!
//! Issues a chat-completion request per user turn with bounded history
//! and a composed system prompt, post-processes the reply, and exposes
//! a secondary ephemeral classifier for disconnect intent.

use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use crate::error::GatewayError;
use crate::types::{HistoryEntry, Role};

/// Literal policy block appended after the agent system prompt and
/// optional FirstGreeting (§6, verbatim).
pub const POLICY_BLOCK: &str = "Answer strictly using the information provided above. If the user asks for address, phone, timings, or other specifics, check the System Prompt or FirstGreeting. If the information is not present, reply briefly that you don't have that information. Always end your answer with a short, relevant follow-up question to keep the conversation going. Keep the entire reply under 100 tokens.";

/// Last N history exchanges sent to the LLM (§4.4 "last 6").
const HISTORY_WINDOW: usize = 6;

static FOLLOWUP_PHRASES: Lazy<Vec<(&'static str, &'static str)>> = Lazy::new(|| {
    vec![
        ("en", "Is there anything else I can help with?"),
        ("hi", "क्या मैं आपकी किसी और चीज़ में मदद कर सकता हूँ?"),
        ("ta", "வேறு ஏதாவது உதவி தேவையா?"),
        ("te", "ఇంకేమైనా సహాయం కావాలా?"),
        ("bn", "আর কিছু সাহায্য করতে পারি?"),
        ("mr", "आणखी काही मदत हवी आहे का?"),
        ("gu", "બીજું કંઈ મદદ જોઈએ છે?"),
        ("kn", "ಇನ್ನೇನಾದರೂ ಸಹಾಯ ಬೇಕೇ?"),
        ("ml", "മറ്റെന്തെങ്കിലും സഹായം വേണോ?"),
    ]
});

fn followup_phrase(language: &str) -> &'static str {
    FOLLOWUP_PHRASES
        .iter()
        .find(|(lang, _)| *lang == language)
        .map(|(_, phrase)| *phrase)
        .unwrap_or("Is there anything else I can help with?")
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: &'static str,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system", content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user", content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: "assistant", content: content.into() }
    }
}

/// Disconnect-intent classifier outcome (§4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectIntent {
    Disconnect,
    Continue,
}

#[async_trait]
pub trait LLMClient: Send + Sync {
    /// `complete(history, systemPrompt, userMessage, language) -> assistantText`.
    /// `Ok(None)` means "skip this turn, do not speak" (§4.4).
    async fn complete(
        &self,
        history: &[HistoryEntry],
        system_prompt: &str,
        user_message: &str,
        language: &str,
    ) -> Result<Option<String>, GatewayError>;

    /// Cheap, ephemeral classification not added to history.
    async fn classify_disconnect_intent(&self, user_message: &str) -> DisconnectIntent;
}

/// HTTP chat-completion implementation (§4.4, §6 LLM (HTTP)).
pub struct HttpLlmClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    request_timeout: Duration,
}

impl HttpLlmClient {
    /// `http` is the process-wide shared client (§5 "External HTTP
    /// client is shared (connection pooling)"), not one constructed
    /// per-call.
    pub fn new(http: reqwest::Client, base_url: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>, request_timeout_ms: u64) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            request_timeout: Duration::from_millis(request_timeout_ms),
        }
    }

    fn compose_system_prompt(&self, system_prompt: &str, first_message: Option<&str>) -> String {
        let mut composed = system_prompt.to_string();
        if let Some(greeting) = first_message.filter(|g| !g.is_empty()) {
            composed.push_str("\n\nFirstGreeting: ");
            composed.push_str(greeting);
        }
        composed.push_str("\n\n");
        composed.push_str(POLICY_BLOCK);
        composed
    }

    fn build_messages(
        &self,
        history: &[HistoryEntry],
        system_prompt: &str,
        user_message: &str,
        user_name: Option<&str>,
    ) -> Vec<ChatMessage> {
        let mut messages = vec![ChatMessage::system(self.compose_system_prompt(system_prompt, None))];
        if let Some(name) = user_name.filter(|n| !n.is_empty()) {
            messages.push(ChatMessage::system(format!("The caller's name is {name}.")));
        }

        let windowed = history.iter().rev().take(HISTORY_WINDOW).collect::<Vec<_>>();
        for entry in windowed.into_iter().rev() {
            messages.push(match entry.role {
                Role::User => ChatMessage::user(entry.text.clone()),
                Role::Assistant => ChatMessage::assistant(entry.text.clone()),
            });
        }

        messages.push(ChatMessage::user(user_message.to_string()));
        messages
    }

    /// Append a language-appropriate follow-up phrase when the reply
    /// doesn't already end with a question (§4.4 Post-processing).
    fn postprocess(text: String, language: &str) -> String {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return String::new();
        }
        if trimmed.ends_with('?') || trimmed.ends_with('？') {
            trimmed.to_string()
        } else {
            format!("{trimmed} {}", followup_phrase(language))
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[async_trait]
impl LLMClient for HttpLlmClient {
    async fn complete(
        &self,
        history: &[HistoryEntry],
        system_prompt: &str,
        user_message: &str,
        language: &str,
    ) -> Result<Option<String>, GatewayError> {
        let messages = self.build_messages(history, system_prompt, user_message, None);

        let body = json!({
            "model": self.model,
            "messages": messages,
            "max_tokens": 120,
            "temperature": 0.3,
        });

        let request = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .timeout(self.request_timeout);

        let response = match request.send().await {
            Ok(resp) => resp,
            Err(err) if err.is_timeout() => {
                warn!("llm request timed out");
                return Ok(None);
            }
            Err(err) => return Err(GatewayError::transient("llm", err)),
        };

        if response.status() == reqwest::StatusCode::UNAUTHORIZED || response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(GatewayError::upstream("llm", response.status().to_string()));
        }
        if !response.status().is_success() {
            return Err(GatewayError::upstream("llm", response.status().to_string()));
        }

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::transient("llm", e))?;

        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Ok(None);
        }

        Ok(Some(Self::postprocess(text, language)))
    }

    async fn classify_disconnect_intent(&self, user_message: &str) -> DisconnectIntent {
        let body = json!({
            "model": self.model,
            "messages": [
                ChatMessage::system("Classify the user's message as DISCONNECT if they are ending the call/conversation, otherwise CONTINUE. Reply with exactly one word."),
                ChatMessage::user(user_message),
            ],
            "max_tokens": 4,
            "temperature": 0.0,
        });

        let request = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .timeout(Duration::from_millis(1_500));

        let Ok(response) = request.send().await else {
            return DisconnectIntent::Continue;
        };
        let Ok(parsed) = response.json::<ChatCompletionResponse>().await else {
            return DisconnectIntent::Continue;
        };

        let verdict = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        if verdict.to_uppercase().contains("DISCONNECT") {
            DisconnectIntent::Disconnect
        } else {
            DisconnectIntent::Continue
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> HttpLlmClient {
        HttpLlmClient::new(reqwest::Client::new(), "https://api.openai.com/v1", "key", "gpt-4o-mini", 4_000)
    }

    #[test]
    fn postprocess_appends_followup_when_no_question() {
        let out = HttpLlmClient::postprocess("We open at nine".to_string(), "en");
        assert!(out.ends_with('?'));
        assert!(out.starts_with("We open at nine"));
    }

    #[test]
    fn postprocess_leaves_existing_question_untouched() {
        let out = HttpLlmClient::postprocess("Would that work for you?".to_string(), "en");
        assert_eq!(out, "Would that work for you?");
    }

    #[test]
    fn postprocess_empty_stays_empty() {
        assert_eq!(HttpLlmClient::postprocess("   ".to_string(), "en"), "");
    }

    #[test]
    fn build_messages_windows_history_to_last_six() {
        let client = client();
        let history: Vec<HistoryEntry> = (0..10)
            .map(|i| HistoryEntry { role: if i % 2 == 0 { Role::User } else { Role::Assistant }, text: format!("turn {i}") })
            .collect();
        let messages = client.build_messages(&history, "be helpful", "latest", None);
        // system + 6 history + user
        assert_eq!(messages.len(), 8);
        assert_eq!(messages.last().unwrap().content, "latest");
    }

    #[test]
    fn compose_system_prompt_includes_policy_block() {
        let client = client();
        let composed = client.compose_system_prompt("Be nice.", Some("Welcome!"));
        assert!(composed.contains("Be nice."));
        assert!(composed.contains("FirstGreeting: Welcome!"));
        assert!(composed.contains("under 100 tokens"));
    }
}
