use serde::{Deserialize, Serialize};

use crate::{config::EndpointOverrides, errors::AppError};

// Default vendor base URLs; overridable through [endpoints] in config.
const SILICONFLOW_BASE: &str = "https://api.siliconflow.cn";
const OPENAI_BASE: &str = "https://api.openai.com";
const ANTHROPIC_BASE: &str = "https://api.anthropic.com";
const DOUBAO_BASE: &str = "https://ark.cn-beijing.volces.com";

// Doubao routes by exact model name; everything else on that provider is
// an ordinary chat-completions model.
const DOUBAO_T2I_MODEL: &str = "doubao-seedream-3-0-t2i-250415";
const DOUBAO_I2I_MODEL: &str = "doubao-seededit-3-0-i2i-250628";
const DOUBAO_T2V_MODEL: &str = "doubao-seedance-1-0-pro-250528";
const DOUBAO_I2V_MODEL: &str = "doubao-seedance-1-0-lite-i2v-250428";

/// Closed set of supported upstream providers.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    SiliconFlow,
    OpenAi,
    Anthropic,
    Doubao,
}

impl Provider {
    /// Parse the provider identifier from the inbound request. Anything
    /// outside the known set is a 400, checked before any network call.
    pub fn parse(id: &str) -> Result<Self, AppError> {
        match id {
            "siliconflow" => Ok(Self::SiliconFlow),
            "openai" => Ok(Self::OpenAi),
            "anthropic" => Ok(Self::Anthropic),
            "doubao" => Ok(Self::Doubao),
            other => Err(AppError::UnsupportedProvider(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SiliconFlow => "siliconflow",
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Doubao => "doubao",
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the upstream answers for a resolved (provider, model) pair, and
/// therefore how the response must be interpreted downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    /// SSE / newline-delimited JSON deltas, relayed as a uniform SSE stream.
    StreamingText,
    /// Whole JSON body with `data: [{url}, ...]`, returned as-is.
    ImageJson,
    /// Whole JSON body carrying an asynchronous job id, projected into a
    /// task handle and polled separately.
    VideoTask,
}

/// Authentication header shape for a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthScheme {
    /// `Authorization: Bearer <key>`
    Bearer,
    /// `x-api-key: <key>` plus `anthropic-version`
    AnthropicApiKey,
}

/// Which wire body the request adapter must build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyVariant {
    OpenAiChat,
    SiliconFlowChat,
    AnthropicChat,
    DoubaoChat,
    TextToImage,
    ImageEdit,
    TextToVideo,
    ImageToVideo,
}

/// Static routing record for one (provider, model) pair: where to send the
/// request, how to authenticate, which body to build, and what shape of
/// response to expect. Resolved once per request, never mutated.
#[derive(Debug, Clone)]
pub struct ProviderProfile {
    pub provider: Provider,
    pub url: String,
    pub auth: AuthScheme,
    pub body: BodyVariant,
    pub kind: ResponseKind,
}

/// Resolves (provider, model) pairs to [`ProviderProfile`]s.
///
/// Routing within `doubao` is model-keyed: the same provider identifier
/// reaches the chat, image-generation, or video-task endpoint depending on
/// the model name.
#[derive(Debug, Clone)]
pub struct ProviderRegistry {
    siliconflow_base: String,
    openai_base: String,
    anthropic_base: String,
    doubao_base: String,
}

impl ProviderRegistry {
    pub fn new(overrides: &EndpointOverrides) -> Self {
        let base = |o: &Option<String>, default: &str| {
            o.as_deref()
                .unwrap_or(default)
                .trim_end_matches('/')
                .to_string()
        };

        Self {
            siliconflow_base: base(&overrides.siliconflow, SILICONFLOW_BASE),
            openai_base: base(&overrides.openai, OPENAI_BASE),
            anthropic_base: base(&overrides.anthropic, ANTHROPIC_BASE),
            doubao_base: base(&overrides.doubao, DOUBAO_BASE),
        }
    }

    /// Registry with the real vendor endpoints.
    pub fn with_defaults() -> Self {
        Self::new(&EndpointOverrides::default())
    }

    pub fn resolve(&self, provider: Provider, model: &str) -> ProviderProfile {
        match provider {
            Provider::SiliconFlow => ProviderProfile {
                provider,
                url: format!("{}/v1/chat/completions", self.siliconflow_base),
                auth: AuthScheme::Bearer,
                body: BodyVariant::SiliconFlowChat,
                kind: ResponseKind::StreamingText,
            },
            Provider::OpenAi => ProviderProfile {
                provider,
                url: format!("{}/v1/chat/completions", self.openai_base),
                auth: AuthScheme::Bearer,
                body: BodyVariant::OpenAiChat,
                kind: ResponseKind::StreamingText,
            },
            Provider::Anthropic => ProviderProfile {
                provider,
                url: format!("{}/v1/messages", self.anthropic_base),
                auth: AuthScheme::AnthropicApiKey,
                body: BodyVariant::AnthropicChat,
                kind: ResponseKind::StreamingText,
            },
            Provider::Doubao => self.resolve_doubao(model),
        }
    }

    fn resolve_doubao(&self, model: &str) -> ProviderProfile {
        let (url, body, kind) = match model {
            DOUBAO_T2I_MODEL => (
                format!("{}/api/v3/images/generations", self.doubao_base),
                BodyVariant::TextToImage,
                ResponseKind::ImageJson,
            ),
            DOUBAO_I2I_MODEL => (
                format!("{}/api/v3/images/generations", self.doubao_base),
                BodyVariant::ImageEdit,
                ResponseKind::ImageJson,
            ),
            DOUBAO_T2V_MODEL => (
                format!("{}/api/v3/contents/generations/tasks", self.doubao_base),
                BodyVariant::TextToVideo,
                ResponseKind::VideoTask,
            ),
            DOUBAO_I2V_MODEL => (
                format!("{}/api/v3/contents/generations/tasks", self.doubao_base),
                BodyVariant::ImageToVideo,
                ResponseKind::VideoTask,
            ),
            _ => (
                format!("{}/api/v3/chat/completions", self.doubao_base),
                BodyVariant::DoubaoChat,
                ResponseKind::StreamingText,
            ),
        };

        ProviderProfile {
            provider: Provider::Doubao,
            url,
            auth: AuthScheme::Bearer,
            body,
            kind,
        }
    }

    /// Status URL for an asynchronous video-generation task.
    pub fn task_status_url(&self, task_id: &str) -> String {
        format!(
            "{}/api/v3/contents/generations/tasks/{}",
            self.doubao_base, task_id
        )
    }
}
