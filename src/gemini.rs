use async_trait::async_trait;
use serde_json::{json, Value};

use crate::config::BotConfig;
use crate::history::{ChatTurn, TurnRole};

/// Seam to the generative model. The session manager owns the canonical
/// turn sequence; implementations convert it to their wire shape.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn generate(&self, turns: &[ChatTurn]) -> Result<String, String>;
}

pub struct GeminiClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
    max_output_tokens: u32,
    temperature: f64,
}

impl GeminiClient {
    pub fn new(http: reqwest::Client, config: &BotConfig) -> Self {
        Self {
            http,
            api_key: config.gemini_api_key.clone(),
            model: config.gemini_model.clone(),
            max_output_tokens: config.max_output_tokens,
            temperature: config.temperature,
        }
    }

    fn contents_payload(turns: &[ChatTurn]) -> Vec<Value> {
        turns
            .iter()
            .map(|turn| {
                let role = match turn.role {
                    TurnRole::User => "user",
                    TurnRole::Model => "model",
                };
                json!({
                    "role": role,
                    "parts": [{ "text": turn.content }]
                })
            })
            .collect()
    }
}

#[async_trait]
impl ChatModel for GeminiClient {
    async fn generate(&self, turns: &[ChatTurn]) -> Result<String, String> {
        if self.api_key.trim().is_empty() {
            return Err("GEMINI_API_KEY not configured".to_string());
        }
        let response = self
            .http
            .post(format!(
                "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent",
                self.model
            ))
            .query(&[("key", self.api_key.as_str())])
            .json(&json!({
                "contents": Self::contents_payload(turns),
                "generationConfig": {
                    "maxOutputTokens": self.max_output_tokens,
                    "temperature": self.temperature
                }
            }))
            .send()
            .await
            .map_err(|err| format!("gemini request failed: {err}"))?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(format!("gemini returned {status}: {body}"));
        }
        let payload = response
            .json::<Value>()
            .await
            .map_err(|err| format!("gemini parse failed: {err}"))?;
        let text = payload
            .get("candidates")
            .and_then(Value::as_array)
            .and_then(|candidates| candidates.first())
            .and_then(|candidate| candidate.get("content"))
            .and_then(|content| content.get("parts"))
            .and_then(Value::as_array)
            .and_then(|parts| parts.first())
            .and_then(|part| part.get("text"))
            .and_then(Value::as_str)
            .map(str::trim)
            .unwrap_or("")
            .to_string();
        if text.is_empty() {
            return Err("gemini response had empty content".to_string());
        }
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contents_payload_preserves_order_and_roles() {
        let turns = vec![
            ChatTurn::user("first"),
            ChatTurn::model("second"),
            ChatTurn::user("third"),
        ];
        let contents = GeminiClient::contents_payload(&turns);
        assert_eq!(contents.len(), 3);
        assert_eq!(contents[0]["role"], "user");
        assert_eq!(contents[1]["role"], "model");
        assert_eq!(contents[2]["parts"][0]["text"], "third");
    }
}
