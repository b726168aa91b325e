use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::Serialize;
use serde_json::Value;

use crate::{
    errors::{AppError, AppResult},
    providers::{
        GenerateRequest, Role, VideoParams,
        registry::{AuthScheme, BodyVariant, ProviderProfile},
    },
};

// Model defaults applied when the request leaves `model` empty.
const DEFAULT_OPENAI_MODEL: &str = "gpt-3.5-turbo";
const DEFAULT_SILICONFLOW_MODEL: &str = "Qwen/Qwen2-7B-Instruct";
const DEFAULT_ANTHROPIC_MODEL: &str = "claude-3-haiku-20240307";

// SiliconFlow sampling defaults and the Anthropic required token budget.
const CHAT_MAX_TOKENS: u32 = 8192;
const SILICONFLOW_TEMPERATURE: f64 = 0.7;
const SILICONFLOW_TOP_P: f64 = 0.95;

// Fixed image-generation parameters; the UI exposes none of these.
const IMAGE_SIZE: &str = "1024x1024";
const IMAGE_SEED: i64 = 21;
const IMAGE_GUIDANCE_SCALE: f32 = 5.5;

// Source image used when the editing model gets no image at all.
const IMAGE_EDIT_FALLBACK: &str =
    "https://ark-project.tos-cn-beijing.volces.com/doc_image/seedream_i2i.jpeg";

/// A fully built outbound request: exact URL, headers, and JSON body for
/// one provider/model combination. Building is deterministic; identical
/// input yields byte-identical body output.
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    pub url: String,
    pub headers: HeaderMap,
    pub body: Value,
}

impl PreparedRequest {
    /// Serialized body, used where byte equality matters.
    pub fn body_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(&self.body).unwrap_or_default()
    }
}

/// Message as chat providers expect it: role and content only, extra
/// client-side fields stripped.
#[derive(Serialize, Debug)]
struct WireMessage<'a> {
    role: Role,
    content: &'a str,
}

#[derive(Serialize, Debug)]
struct ChatBody<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f64>,
}

#[derive(Serialize, Debug)]
struct ImageBody<'a> {
    model: &'a str,
    prompt: &'a str,
    response_format: &'static str,
    // Editing preserves the source dimensions, so the variant with an
    // `image` field must not carry `size`.
    #[serde(skip_serializing_if = "Option::is_none")]
    size: Option<&'static str>,
    seed: i64,
    guidance_scale: f32,
    watermark: bool,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    image: Option<String>,
}

#[derive(Serialize, Debug)]
struct VideoBody<'a> {
    model: &'a str,
    content: Vec<VideoPart>,
}

/// Typed parts of a video-generation request body.
#[derive(Serialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
enum VideoPart {
    Text {
        text: String,
    },
    ImageUrl {
        image_url: ImageUrlPart,
        #[serde(skip_serializing_if = "Option::is_none")]
        role: Option<&'static str>,
    },
}

#[derive(Serialize, Debug)]
struct ImageUrlPart {
    url: String,
}

/// Build the exact wire request for a resolved provider profile.
///
/// Field-presence rules here are contractual: each body variant carries
/// exactly the fields its provider documents, no more and no fewer.
pub fn build_request(
    profile: &ProviderProfile,
    request: &GenerateRequest,
) -> AppResult<PreparedRequest> {
    let body = match profile.body {
        BodyVariant::OpenAiChat => chat_body(request, DEFAULT_OPENAI_MODEL, false)?,
        BodyVariant::SiliconFlowChat => chat_body(request, DEFAULT_SILICONFLOW_MODEL, true)?,
        BodyVariant::DoubaoChat => chat_body(request, &request.model, false)?,
        BodyVariant::AnthropicChat => anthropic_body(request)?,
        BodyVariant::TextToImage => image_body(request, false)?,
        BodyVariant::ImageEdit => image_body(request, true)?,
        BodyVariant::TextToVideo => video_body(request, false)?,
        BodyVariant::ImageToVideo => video_body(request, true)?,
    };

    Ok(PreparedRequest {
        url: profile.url.clone(),
        headers: auth_headers(profile.auth, &request.api_key)?,
        body,
    })
}

fn auth_headers(auth: AuthScheme, api_key: &str) -> AppResult<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    match auth {
        AuthScheme::Bearer => {
            let value = HeaderValue::from_str(&format!("Bearer {}", api_key))
                .map_err(|_| AppError::validation("API key contains invalid characters"))?;
            headers.insert(AUTHORIZATION, value);
        }
        AuthScheme::AnthropicApiKey => {
            let value = HeaderValue::from_str(api_key)
                .map_err(|_| AppError::validation("API key contains invalid characters"))?;
            headers.insert("x-api-key", value);
            headers.insert("anthropic-version", HeaderValue::from_static("2023-06-01"));
        }
    }

    Ok(headers)
}

fn wire_messages(request: &GenerateRequest) -> Vec<WireMessage<'_>> {
    request
        .messages
        .iter()
        .map(|m| WireMessage {
            role: m.role,
            content: &m.content,
        })
        .collect()
}

fn chat_body(
    request: &GenerateRequest,
    default_model: &str,
    siliconflow_sampling: bool,
) -> AppResult<Value> {
    let model = if request.model.is_empty() {
        default_model
    } else {
        request.model.as_str()
    };

    let body = ChatBody {
        model,
        messages: wire_messages(request),
        stream: true,
        max_tokens: siliconflow_sampling.then_some(CHAT_MAX_TOKENS),
        temperature: siliconflow_sampling.then_some(SILICONFLOW_TEMPERATURE),
        top_p: siliconflow_sampling.then_some(SILICONFLOW_TOP_P),
    };

    serde_json::to_value(&body).map_err(|e| AppError::internal(e.to_string()))
}

fn anthropic_body(request: &GenerateRequest) -> AppResult<Value> {
    let model = if request.model.is_empty() {
        DEFAULT_ANTHROPIC_MODEL
    } else {
        request.model.as_str()
    };

    // Anthropic requires max_tokens and accepts user/assistant roles only;
    // the Role enum already enforces the latter.
    let body = ChatBody {
        model,
        messages: wire_messages(request),
        stream: true,
        max_tokens: Some(CHAT_MAX_TOKENS),
        temperature: None,
        top_p: None,
    };

    serde_json::to_value(&body).map_err(|e| AppError::internal(e.to_string()))
}

fn image_body(request: &GenerateRequest, editing: bool) -> AppResult<Value> {
    let image = editing.then(|| {
        request
            .image
            .clone()
            .filter(|i| !i.is_empty())
            .unwrap_or_else(|| IMAGE_EDIT_FALLBACK.to_string())
    });

    let body = ImageBody {
        model: &request.model,
        prompt: request.last_user_prompt(),
        response_format: "url",
        size: (!editing).then_some(IMAGE_SIZE),
        seed: IMAGE_SEED,
        guidance_scale: IMAGE_GUIDANCE_SCALE,
        watermark: false,
        stream: false,
        image,
    };

    serde_json::to_value(&body).map_err(|e| AppError::internal(e.to_string()))
}

fn video_body(request: &GenerateRequest, image_to_video: bool) -> AppResult<Value> {
    let prompt = prompt_with_video_params(
        request.last_user_prompt(),
        request.video_params.as_ref(),
    );

    let mut content = vec![VideoPart::Text { text: prompt }];

    if image_to_video {
        if let Some(message) = request.last_user_message_with_images() {
            let images = message.attached_images();
            let tag_frames = images.len() == 2;
            for (index, image) in images.into_iter().take(2).enumerate() {
                content.push(VideoPart::ImageUrl {
                    image_url: ImageUrlPart {
                        url: image.to_string(),
                    },
                    role: tag_frames.then(|| if index == 0 { "first_frame" } else { "last_frame" }),
                });
            }
        }
    }

    let body = VideoBody {
        model: &request.model,
        content,
    };

    serde_json::to_value(&body).map_err(|e| AppError::internal(e.to_string()))
}

/// Serialize defined video parameters as trailing `--flag value` tokens,
/// in the fixed order the upstream parser expects.
fn prompt_with_video_params(prompt: &str, params: Option<&VideoParams>) -> String {
    let mut text = prompt.to_string();
    let Some(params) = params else {
        return text;
    };

    if let Some(resolution) = &params.resolution {
        text.push_str(&format!(" --rs {}", resolution));
    }
    if let Some(ratio) = &params.aspect_ratio {
        text.push_str(&format!(" --rt {}", ratio));
    }
    if let Some(duration) = params.duration {
        text.push_str(&format!(" --dur {}", duration));
    }
    if let Some(fps) = params.fps {
        text.push_str(&format!(" --fps {}", fps));
    }
    if let Some(seed) = params.seed {
        text.push_str(&format!(" --seed {}", seed));
    }

    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn video_param_suffix_keeps_flag_order() {
        let params = VideoParams {
            resolution: Some("720p".to_string()),
            aspect_ratio: Some("16:9".to_string()),
            duration: Some(5),
            fps: Some(24),
            seed: Some(42),
        };
        assert_eq!(
            prompt_with_video_params("a cat", Some(&params)),
            "a cat --rs 720p --rt 16:9 --dur 5 --fps 24 --seed 42"
        );
    }

    #[test]
    fn video_param_suffix_skips_undefined_fields() {
        let params = VideoParams {
            duration: Some(10),
            ..Default::default()
        };
        assert_eq!(
            prompt_with_video_params("waves", Some(&params)),
            "waves --dur 10"
        );
        assert_eq!(prompt_with_video_params("waves", None), "waves");
    }
}
