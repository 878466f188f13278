use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CommonError, CommonResult};

pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";
pub const DEFAULT_TEMPERATURE: f32 = 0.7;
pub const DEFAULT_MAX_TOKENS: u32 = 1000;
pub const DEFAULT_TOP_P: f32 = 1.0;
pub const DEFAULT_PENALTY: f32 = 0.0;

/// Author of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// A single turn as sent to the language model: role and content only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Generation parameters recorded on an assistant message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageMetadata {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// A chat message as returned to the front-end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub content: String,
    pub role: Role,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub tokens: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<MessageMetadata>,
}

impl ChatMessage {
    /// Build a user message, trimming surrounding whitespace.
    ///
    /// Fails with [`CommonError::EmptyMessage`] when nothing but whitespace
    /// was supplied.
    pub fn from_user(content: &str) -> CommonResult<Self> {
        let content = content.trim();
        if content.is_empty() {
            return Err(CommonError::EmptyMessage);
        }

        Ok(Self {
            content: content.to_string(),
            role: Role::User,
            timestamp: Utc::now(),
            tokens: estimate_tokens(content),
            metadata: None,
        })
    }

    pub fn to_turn(&self) -> Turn {
        Turn::new(self.role, self.content.clone())
    }
}

/// Per-conversation generation settings.
///
/// Every field is optional on the wire; missing fields fall back to the
/// defaults above.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChatSettings {
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_p: f32,
    pub frequency_penalty: f32,
    pub presence_penalty: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
            top_p: DEFAULT_TOP_P,
            frequency_penalty: DEFAULT_PENALTY,
            presence_penalty: DEFAULT_PENALTY,
            model: None,
        }
    }
}

impl ChatSettings {
    pub fn validate(&self) -> CommonResult<()> {
        check_range("temperature", f64::from(self.temperature), 0.0, 2.0)?;
        check_range("maxTokens", f64::from(self.max_tokens), 1.0, 4000.0)?;
        check_range("topP", f64::from(self.top_p), 0.0, 1.0)?;
        check_range("frequencyPenalty", f64::from(self.frequency_penalty), -2.0, 2.0)?;
        check_range("presencePenalty", f64::from(self.presence_penalty), -2.0, 2.0)?;
        Ok(())
    }
}

fn check_range(field: &'static str, got: f64, min: f64, max: f64) -> CommonResult<()> {
    // NaN fails both comparisons, so test for containment instead.
    if (min..=max).contains(&got) {
        Ok(())
    } else {
        Err(CommonError::OutOfRange {
            field,
            min,
            max,
            got,
        })
    }
}

/// Rough token estimate: one token per four characters.
pub fn estimate_tokens(text: &str) -> u32 {
    let chars = text.chars().count();
    u32::try_from(chars.div_ceil(4)).unwrap_or(u32::MAX)
}
