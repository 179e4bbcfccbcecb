//! Client for the vision counting collaborator.
//!
//! Posts one frame as a base64 data URL to a chat-completions style
//! endpoint and expects `{"people": <int>}` back. The client may be
//! constructed unconfigured; readiness is reported through the
//! `PeopleCounter::ready` method, never a process-wide flag.

use crate::error::AppError;
use crate::occupancy::PeopleCounter;
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

const COUNT_PROMPT: &str = "Count the number of distinct people visible in the photo. \
     Return JSON like {\"people\": <integer>} with no extra text.";

pub struct VisionCounter {
    client: Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct PeopleAnswer {
    #[serde(default)]
    people: i64,
}

impl VisionCounter {
    pub fn new(client: Client, endpoint: &str, model: &str, api_key: Option<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.to_string(),
            model: model.to_string(),
            api_key,
        }
    }
}

#[async_trait]
impl PeopleCounter for VisionCounter {
    async fn count(&self, image: &[u8]) -> Result<u32, AppError> {
        let Some(api_key) = &self.api_key else {
            return Err(AppError::Count(
                "vision counter is not configured".to_string(),
            ));
        };

        let image_b64 = BASE64.encode(image);
        let body = json!({
            "model": self.model,
            "response_format": {"type": "json_object"},
            "messages": [{
                "role": "user",
                "content": [
                    {"type": "text", "text": COUNT_PROMPT},
                    {"type": "image_url", "image_url": {
                        "url": format!("data:image/jpeg;base64,{image_b64}")
                    }},
                ],
            }],
        });

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::Count(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(AppError::Count(format!(
                "vision endpoint returned {status}: {text}"
            )));
        }

        let completion: CompletionResponse = response
            .json()
            .await
            .map_err(|e| AppError::Count(e.to_string()))?;
        let content = completion
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .ok_or_else(|| AppError::Count("vision response had no choices".to_string()))?;
        let answer: PeopleAnswer =
            serde_json::from_str(content).map_err(|e| AppError::Count(e.to_string()))?;

        let people = u32::try_from(answer.people.max(0)).unwrap_or(0);
        debug!(people, "vision counter answered");
        Ok(people)
    }

    fn ready(&self) -> bool {
        self.api_key.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unconfigured_counter_is_not_ready() {
        let counter = VisionCounter::new(Client::new(), "http://localhost/v1", "test-model", None);
        assert!(!counter.ready());
    }

    #[test]
    fn configured_counter_is_ready() {
        let counter = VisionCounter::new(
            Client::new(),
            "http://localhost/v1",
            "test-model",
            Some("key".to_string()),
        );
        assert!(counter.ready());
    }

    #[tokio::test]
    async fn unconfigured_count_fails() {
        let counter = VisionCounter::new(Client::new(), "http://localhost/v1", "test-model", None);

        let err = counter.count(&[1, 2, 3]).await.unwrap_err();

        assert!(matches!(err, AppError::Count(_)));
    }

    #[test]
    fn negative_people_clamps_to_zero() {
        let answer: PeopleAnswer = serde_json::from_str("{\"people\": -3}").expect("parse");
        assert_eq!(u32::try_from(answer.people.max(0)).unwrap_or(0), 0);
    }
}
