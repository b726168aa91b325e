pub mod registry;
pub mod request;
pub mod stream;
pub mod task;

use serde::{Deserialize, Serialize};

// Re-export the pieces callers touch most
pub use registry::{Provider, ProviderProfile, ProviderRegistry, ResponseKind};
pub use request::{PreparedRequest, build_request};
pub use task::{TaskEvent, TaskHandle, TaskPoller, TaskState};

/// Role in a chat conversation. Only these two roles cross the wire;
/// system prompts are out of scope for this proxy.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One message of a conversation as the browser client sends it.
///
/// `image`/`images` carry base64 payloads or URLs for the image-to-video
/// models; `thinking_process`/`show_thinking` belong to the reasoning
/// channel and are only ever set on assistant messages.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<String>>,
    #[serde(
        default,
        rename = "thinkingProcess",
        skip_serializing_if = "Option::is_none"
    )]
    pub thinking_process: Option<String>,
    #[serde(
        default,
        rename = "showThinking",
        skip_serializing_if = "Option::is_none"
    )]
    pub show_thinking: Option<bool>,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            image: None,
            images: None,
            thinking_process: None,
            show_thinking: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            image: None,
            images: None,
            thinking_process: None,
            show_thinking: None,
        }
    }

    /// Images attached to this message, normalizing the legacy single
    /// `image` field into the plural form.
    pub fn attached_images(&self) -> Vec<&str> {
        if let Some(images) = &self.images {
            images.iter().map(String::as_str).collect()
        } else if let Some(image) = &self.image {
            vec![image.as_str()]
        } else {
            Vec::new()
        }
    }
}

/// Optional parameters for video-generation models. Serialized as trailing
/// `--flag value` tokens on the prompt text, never as body fields.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct VideoParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
    #[serde(
        default,
        rename = "aspectRatio",
        skip_serializing_if = "Option::is_none"
    )]
    pub aspect_ratio: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fps: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
}

/// The uniform inbound request: one shape for every provider and model
/// class. Constructed fresh per send and immutable once dispatched.
///
/// `provider` stays a raw string here so an unknown identifier surfaces as
/// a structured 400 from [`Provider::parse`] instead of a serde reject.
#[derive(Deserialize, Debug, Clone)]
pub struct GenerateRequest {
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    #[serde(default, rename = "apiKey")]
    pub api_key: String,
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub model: String,
    #[serde(default, rename = "videoParams")]
    pub video_params: Option<VideoParams>,
    /// Source image for the image-editing model, supplied at request level
    /// rather than inside a message.
    #[serde(default)]
    pub image: Option<String>,
}

impl GenerateRequest {
    /// Field presence checks that run upstream of provider dispatch.
    /// The error strings are part of the wire contract.
    pub fn validate(&self) -> Result<(), crate::errors::AppError> {
        if self.api_key.is_empty() {
            return Err(crate::errors::AppError::validation("API key is required"));
        }

        if self.messages.is_empty() {
            return Err(crate::errors::AppError::validation("Messages are required"));
        }

        Ok(())
    }

    /// Content of the most recent user message, used as the prompt for
    /// image and video models.
    pub fn last_user_prompt(&self) -> &str {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or("")
    }

    /// The most recent user message carrying one or more images, if any.
    pub fn last_user_message_with_images(&self) -> Option<&ChatMessage> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User && !m.attached_images().is_empty())
    }
}
