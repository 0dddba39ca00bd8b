use std::env;
use std::thread;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::DynamicImage;
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use super::{AnalyzeRequest, ImageSynthesizer, ReasoningModel};
use crate::error::ModelError;
use crate::imaging::encode_jpeg;

const PROVIDER: &str = "Gemini";
const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_REASONING_MODEL: &str = "gemini-robotics-er-1.5-preview";
pub const DEFAULT_IMAGE_MODEL: &str = "gemini-2.5-flash-image";

#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_base: String,
    pub api_key: Option<String>,
    pub reasoning_model: String,
    pub image_model: String,
    pub request_timeout: Duration,
    pub transport_retries: usize,
    pub retry_backoff: Duration,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            api_key: None,
            reasoning_model: DEFAULT_REASONING_MODEL.to_string(),
            image_model: DEFAULT_IMAGE_MODEL.to_string(),
            request_timeout: Duration::from_secs(120),
            transport_retries: 2,
            retry_backoff: Duration::from_millis(1200),
        }
    }
}

impl GeminiConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            api_base: non_empty_env("GEMINI_API_BASE")
                .map(|value| value.trim_end_matches('/').to_string())
                .unwrap_or(defaults.api_base),
            api_key: non_empty_env("GEMINI_API_KEY").or_else(|| non_empty_env("GOOGLE_API_KEY")),
            reasoning_model: non_empty_env("GUIDE_REASONING_MODEL")
                .unwrap_or(defaults.reasoning_model),
            image_model: non_empty_env("GUIDE_IMAGE_MODEL").unwrap_or(defaults.image_model),
            request_timeout: non_empty_env("GUIDE_REQUEST_TIMEOUT")
                .and_then(|raw| parse_timeout(&raw))
                .unwrap_or(defaults.request_timeout),
            transport_retries: non_empty_env("GUIDE_TRANSPORT_RETRIES")
                .and_then(|raw| raw.parse::<usize>().ok())
                .map(|retries| retries.min(4))
                .unwrap_or(defaults.transport_retries),
            retry_backoff: defaults.retry_backoff,
        }
    }
}

/// `generateContent` client serving both the reasoning and the image
/// synthesis capability.
#[derive(Debug, Clone)]
pub struct GeminiModel {
    config: GeminiConfig,
}

impl GeminiModel {
    pub fn new(config: GeminiConfig) -> Self {
        Self { config }
    }

    fn api_key(&self) -> Result<&str, ModelError> {
        self.config
            .api_key
            .as_deref()
            .ok_or(ModelError::MissingApiKey)
    }

    fn endpoint_for_model(&self, model: &str) -> String {
        let trimmed = model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:generateContent", self.config.api_base, model_path)
    }

    // Built per call so the blocking client never lives on an async thread.
    fn http(&self, endpoint: &str) -> Result<HttpClient, ModelError> {
        HttpClient::builder()
            .timeout(self.config.request_timeout)
            .build()
            .map_err(|source| ModelError::Transport {
                provider: PROVIDER.to_string(),
                endpoint: endpoint.to_string(),
                source,
            })
    }

    fn post_with_transport_retries(&self, endpoint: &str, payload: &Value) -> Result<Value, ModelError> {
        let api_key = self.api_key()?;
        let http = self.http(endpoint)?;
        let max_retries = self.config.transport_retries;
        let mut attempt = 0;
        loop {
            let sent = http
                .post(endpoint)
                .query(&[("key", api_key)])
                .json(payload)
                .send();
            match sent {
                Ok(response) => return response_json_or_error(response),
                Err(source) => {
                    if !is_retryable_transport_error(&source) || attempt >= max_retries {
                        return Err(ModelError::Transport {
                            provider: PROVIDER.to_string(),
                            endpoint: endpoint.to_string(),
                            source,
                        });
                    }
                    attempt += 1;
                    warn!(
                        attempt,
                        max_retries, "Gemini transport retry after transient request failure"
                    );
                    thread::sleep(self.config.retry_backoff * attempt as u32);
                }
            }
        }
    }
}

impl ReasoningModel for GeminiModel {
    fn name(&self) -> &str {
        "gemini"
    }

    fn analyze(&self, request: &AnalyzeRequest<'_>) -> Result<Option<String>, ModelError> {
        let endpoint = self.endpoint_for_model(&self.config.reasoning_model);
        let payload = build_analyze_payload(request)?;
        debug!(
            schema = request.schema_name,
            images = request.images.len(),
            prompt_chars = request.prompt.len(),
            "Gemini reasoning request"
        );
        let response = self.post_with_transport_retries(&endpoint, &payload)?;
        Ok(extract_text(&response))
    }
}

impl ImageSynthesizer for GeminiModel {
    fn name(&self) -> &str {
        "gemini"
    }

    fn synthesize(
        &self,
        prompt: &str,
        image: &DynamicImage,
    ) -> Result<Option<DynamicImage>, ModelError> {
        let endpoint = self.endpoint_for_model(&self.config.image_model);
        let payload = build_synthesis_payload(prompt, image)?;
        let response = self.post_with_transport_retries(&endpoint, &payload)?;
        Ok(first_decodable_image(&extract_image_items(&response)?))
    }
}

pub(crate) struct ImageBytes {
    pub bytes: Vec<u8>,
    pub mime_type: Option<String>,
}

fn image_part(image: &DynamicImage) -> Result<Value, ModelError> {
    let bytes = encode_jpeg(image)?;
    Ok(json!({
        "inlineData": {
            "mimeType": "image/jpeg",
            "data": BASE64.encode(bytes),
        }
    }))
}

pub(crate) fn build_analyze_payload(request: &AnalyzeRequest<'_>) -> Result<Value, ModelError> {
    let mut parts = Vec::with_capacity(request.images.len() + 1);
    for image in request.images {
        parts.push(image_part(image)?);
    }
    parts.push(json!({ "text": request.prompt }));

    let mut generation_config = Map::new();
    generation_config.insert("temperature".to_string(), json!(request.temperature));
    generation_config.insert(
        "responseMimeType".to_string(),
        Value::String("application/json".to_string()),
    );
    generation_config.insert("responseJsonSchema".to_string(), request.schema.clone());
    generation_config.insert(
        "thinkingConfig".to_string(),
        json!({ "thinkingBudget": request.thinking_budget }),
    );

    Ok(json!({
        "contents": [{ "role": "user", "parts": parts }],
        "generationConfig": Value::Object(generation_config),
    }))
}

pub(crate) fn build_synthesis_payload(prompt: &str, image: &DynamicImage) -> Result<Value, ModelError> {
    Ok(json!({
        "contents": [{
            "role": "user",
            "parts": [{ "text": prompt }, image_part(image)?],
        }],
        "generationConfig": {
            "responseModalities": ["IMAGE"],
        },
    }))
}

fn candidate_parts(response: &Value) -> Vec<Value> {
    response
        .get("candidates")
        .and_then(Value::as_array)
        .and_then(|candidates| candidates.first())
        .and_then(|candidate| candidate.get("content"))
        .and_then(|content| content.get("parts"))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

/// Concatenated non-thought text of the first candidate, `None` if blank.
pub(crate) fn extract_text(response: &Value) -> Option<String> {
    let text: String = candidate_parts(response)
        .iter()
        .filter(|part| !part.get("thought").and_then(Value::as_bool).unwrap_or(false))
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect();
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.to_string())
}

pub(crate) fn extract_image_items(response: &Value) -> Result<Vec<ImageBytes>, ModelError> {
    let mut out = Vec::new();
    for part in candidate_parts(response) {
        let Some(inline) = part
            .get("inlineData")
            .or_else(|| part.get("inline_data"))
            .and_then(Value::as_object)
        else {
            continue;
        };
        let data = inline
            .get("data")
            .and_then(Value::as_str)
            .unwrap_or_default();
        if data.is_empty() {
            continue;
        }
        let Ok(bytes) = BASE64.decode(data.as_bytes()) else {
            warn!("Gemini returned undecodable inline image data");
            continue;
        };
        let mime_type = inline
            .get("mimeType")
            .or_else(|| inline.get("mime_type"))
            .and_then(Value::as_str)
            .map(str::to_string);
        out.push(ImageBytes { bytes, mime_type });
    }
    Ok(out)
}

fn first_decodable_image(items: &[ImageBytes]) -> Option<DynamicImage> {
    items.iter().find_map(|item| {
        image::load_from_memory(&item.bytes)
            .map_err(|err| {
                debug!(mime = ?item.mime_type, error = %err, "skipping undecodable image part");
            })
            .ok()
    })
}

fn response_json_or_error(response: HttpResponse) -> Result<Value, ModelError> {
    let status = response.status();
    let code = status.as_u16();
    let body = response.text().map_err(|source| ModelError::Transport {
        provider: PROVIDER.to_string(),
        endpoint: "response body".to_string(),
        source,
    })?;
    if !status.is_success() {
        return Err(ModelError::Status {
            provider: PROVIDER.to_string(),
            code,
            body: truncate_text(&body, 512),
        });
    }
    serde_json::from_str(&body).map_err(|source| ModelError::InvalidPayload {
        provider: PROVIDER.to_string(),
        source,
    })
}

fn is_retryable_transport_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}

fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

/// Seconds, clamped to `[15, 600]`; non-numeric and non-finite values are
/// ignored.
fn parse_timeout(raw: &str) -> Option<Duration> {
    raw.parse::<f64>()
        .ok()
        .filter(|secs| secs.is_finite())
        .map(|secs| Duration::from_secs_f64(secs.clamp(15.0, 600.0)))
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
