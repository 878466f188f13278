use std::time::{Duration, Instant};

use async_trait::async_trait;
use colloquy_common::api::{ModelInfo, Usage};
use colloquy_common::models::{ChatSettings, Turn, DEFAULT_MODEL};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("upstream returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("upstream returned no choices")]
    EmptyResponse,
}

/// Parameters passed through to the model. Unset fields use the client's
/// defaults.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationParams {
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub top_p: Option<f32>,
    pub frequency_penalty: Option<f32>,
    pub presence_penalty: Option<f32>,
}

impl From<&ChatSettings> for GenerationParams {
    fn from(settings: &ChatSettings) -> Self {
        Self {
            model: settings.model.clone(),
            temperature: Some(settings.temperature),
            max_tokens: Some(settings.max_tokens),
            top_p: Some(settings.top_p),
            frequency_penalty: Some(settings.frequency_penalty),
            presence_penalty: Some(settings.presence_penalty),
        }
    }
}

/// A generated reply.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub content: String,
    pub usage: Option<Usage>,
    pub model: String,
    pub finish_reason: Option<String>,
    pub response_time_ms: u64,
}

/// Something that can produce the next assistant turn of a conversation.
#[async_trait]
pub trait ChatGenerator: Send + Sync {
    async fn generate(
        &self,
        turns: &[Turn],
        params: &GenerationParams,
    ) -> Result<Completion, LlmError>;

    async fn list_models(&self) -> Result<Vec<ModelInfo>, LlmError>;
}

/// Context window of well-known models; anything else gets 4096.
pub fn model_max_tokens(model_id: &str) -> u32 {
    match model_id {
        "gpt-4" => 8192,
        "gpt-4-32k" => 32768,
        "gpt-3.5-turbo-16k" => 16384,
        _ => 4096,
    }
}

/// Display name for a model id, e.g. `gpt-4` becomes `GPT-4`.
pub fn model_display_name(model_id: &str) -> String {
    model_id.to_uppercase()
}

/// OpenAI-compatible chat completions client.
pub struct OpenAiClient {
    base_url: String,
    api_key: String,
    default_model: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [Turn],
    temperature: f32,
    max_tokens: u32,
    top_p: f32,
    frequency_penalty: f32,
    presence_penalty: f32,
    stream: bool,
}

#[derive(Deserialize)]
struct CompletionResponse {
    model: String,
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ModelList {
    data: Vec<ModelEntry>,
}

#[derive(Deserialize)]
struct ModelEntry {
    id: String,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    message: String,
}

impl OpenAiClient {
    pub fn new(base_url: &str, api_key: &str, default_model: Option<&str>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .unwrap_or_default();

        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            default_model: default_model.unwrap_or(DEFAULT_MODEL).to_string(),
            client,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn check(resp: reqwest::Response) -> Result<reqwest::Response, LlmError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        let text = resp.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ApiErrorBody>(&text)
            .map(|body| body.error.message)
            .unwrap_or(text);

        Err(LlmError::Api {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl ChatGenerator for OpenAiClient {
    #[tracing::instrument(skip(self, turns), fields(turns = turns.len()))]
    async fn generate(
        &self,
        turns: &[Turn],
        params: &GenerationParams,
    ) -> Result<Completion, LlmError> {
        let body = CompletionRequest {
            model: params.model.as_deref().unwrap_or(&self.default_model),
            messages: turns,
            temperature: params.temperature.unwrap_or(0.7),
            max_tokens: params.max_tokens.unwrap_or(1000),
            top_p: params.top_p.unwrap_or(1.0),
            frequency_penalty: params.frequency_penalty.unwrap_or(0.0),
            presence_penalty: params.presence_penalty.unwrap_or(0.0),
            stream: false,
        };

        let start = Instant::now();
        let resp = self
            .client
            .post(self.url("/chat/completions"))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;
        let resp: CompletionResponse = Self::check(resp).await?.json().await?;
        let response_time_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

        let choice = resp
            .choices
            .into_iter()
            .next()
            .ok_or(LlmError::EmptyResponse)?;

        Ok(Completion {
            content: choice.message.content.unwrap_or_default(),
            usage: resp.usage,
            model: resp.model,
            finish_reason: choice.finish_reason,
            response_time_ms,
        })
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>, LlmError> {
        let resp = self
            .client
            .get(self.url("/models"))
            .bearer_auth(&self.api_key)
            .send()
            .await?;
        let list: ModelList = Self::check(resp).await?.json().await?;

        Ok(list
            .data
            .into_iter()
            .filter(|m| m.id.contains("gpt"))
            .map(|m| ModelInfo {
                name: model_display_name(&m.id),
                max_tokens: model_max_tokens(&m.id),
                id: m.id,
            })
            .collect())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Mutex;

    use super::*;

    /// Canned generator that records the turns it was asked to continue.
    #[derive(Default)]
    pub struct FakeGenerator {
        pub seen: Mutex<Vec<Vec<Turn>>>,
        pub fail: bool,
    }

    #[async_trait]
    impl ChatGenerator for FakeGenerator {
        async fn generate(
            &self,
            turns: &[Turn],
            params: &GenerationParams,
        ) -> Result<Completion, LlmError> {
            if self.fail {
                return Err(LlmError::Api {
                    status: 500,
                    message: "boom".to_string(),
                });
            }
            self.seen.lock().unwrap().push(turns.to_vec());
            Ok(Completion {
                content: format!("echo: {}", turns.last().map_or("", |t| t.content.as_str())),
                usage: Some(Usage {
                    prompt_tokens: 3,
                    completion_tokens: 5,
                    total_tokens: 8,
                }),
                model: params.model.clone().unwrap_or_else(|| DEFAULT_MODEL.to_string()),
                finish_reason: Some("stop".to_string()),
                response_time_ms: 1,
            })
        }

        async fn list_models(&self) -> Result<Vec<ModelInfo>, LlmError> {
            if self.fail {
                return Err(LlmError::EmptyResponse);
            }
            Ok(vec![ModelInfo {
                id: "gpt-4".to_string(),
                name: model_display_name("gpt-4"),
                max_tokens: model_max_tokens("gpt-4"),
            }])
        }
    }

    #[test]
    fn known_models_have_context_sizes() {
        assert_eq!(model_max_tokens("gpt-4"), 8192);
        assert_eq!(model_max_tokens("gpt-4-32k"), 32768);
        assert_eq!(model_max_tokens("gpt-3.5-turbo"), 4096);
        assert_eq!(model_max_tokens("gpt-3.5-turbo-16k"), 16384);
        assert_eq!(model_max_tokens("gpt-4o"), 4096);
    }

    #[test]
    fn display_name_is_uppercased() {
        assert_eq!(model_display_name("gpt-3.5-turbo"), "GPT-3.5-TURBO");
    }

    #[test]
    fn settings_map_to_params() {
        let settings = ChatSettings {
            model: Some("gpt-4".to_string()),
            frequency_penalty: 0.5,
            ..ChatSettings::default()
        };
        let params = GenerationParams::from(&settings);
        assert_eq!(params.model.as_deref(), Some("gpt-4"));
        assert_eq!(params.max_tokens, Some(1000));
        assert_eq!(params.frequency_penalty, Some(0.5));
        assert_eq!(params.presence_penalty, Some(0.0));
    }

    #[test]
    fn request_body_shape() {
        let turns = [Turn::new(colloquy_common::Role::User, "hi")];
        let body = CompletionRequest {
            model: "gpt-4",
            messages: &turns,
            temperature: 0.5,
            max_tokens: 10,
            top_p: 1.0,
            frequency_penalty: 0.0,
            presence_penalty: 0.0,
            stream: false,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["stream"], false);
        assert_eq!(json["max_tokens"], 10);
    }

    #[test]
    fn response_parses_first_choice() {
        let raw = r#"{
            "model": "gpt-3.5-turbo-0613",
            "choices": [{ "message": { "role": "assistant", "content": "Hello!" }, "finish_reason": "stop" }],
            "usage": { "prompt_tokens": 9, "completion_tokens": 2, "total_tokens": 11 }
        }"#;
        let resp: CompletionResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(resp.choices[0].message.content.as_deref(), Some("Hello!"));
        assert_eq!(resp.usage.map(|u| u.total_tokens), Some(11));
    }
}
