use std::time::Duration;

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use serde_json::{json, Value};

use crate::generation::{
    GenerationCapability, GenerationRequest, GenerationResponse, RequestPart, ResponsePart,
};

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_IMAGE_MODEL: &str = "gemini-3-pro-image-preview";
const API_KEY_HEADER: &str = "x-goog-api-key";

#[derive(Debug, Clone)]
pub struct GeminiSettings {
    pub api_base: String,
    pub api_key: Option<String>,
    pub model: String,
    pub request_timeout: Duration,
}

/// `generateContent` with image-only output. A single attempt per call.
pub struct GeminiProvider {
    settings: GeminiSettings,
    http: HttpClient,
}

impl GeminiProvider {
    pub fn new(settings: GeminiSettings) -> Self {
        Self {
            settings,
            http: HttpClient::new(),
        }
    }

    fn endpoint(&self) -> String {
        let trimmed = self.settings.model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!(
            "{}/{}:generateContent",
            self.settings.api_base.trim_end_matches('/'),
            model_path
        )
    }

    /// No `aspectRatio`: the model follows the subject's framing.
    fn build_payload(request: &GenerationRequest) -> Value {
        let parts: Vec<Value> = request
            .parts
            .iter()
            .map(|part| match part {
                RequestPart::Text(text) => json!({ "text": text }),
                RequestPart::Image(image) => json!({
                    "inlineData": {
                        "mimeType": image.effective_mime(),
                        "data": BASE64.encode(&image.bytes),
                    }
                }),
            })
            .collect();

        json!({
            "contents": [{
                "role": "user",
                "parts": parts,
            }],
            "generationConfig": {
                "responseModalities": ["IMAGE"],
                "imageConfig": {
                    "imageSize": request.image_size,
                },
            },
        })
    }

    fn extract_parts(response_payload: &Value) -> Result<Vec<ResponsePart>> {
        let candidates = response_payload
            .get("candidates")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let mut out = Vec::new();

        for candidate in candidates {
            let parts = candidate
                .get("content")
                .and_then(Value::as_object)
                .and_then(|content| content.get("parts"))
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            for part in parts {
                if let Some(text) = part.get("text").and_then(Value::as_str) {
                    out.push(ResponsePart::Text(text.to_string()));
                    continue;
                }
                let inline = part
                    .get("inlineData")
                    .or_else(|| part.get("inline_data"))
                    .and_then(Value::as_object)
                    .cloned()
                    .unwrap_or_default();
                let data = inline
                    .get("data")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                if data.is_empty() {
                    continue;
                }
                let bytes = BASE64
                    .decode(data.as_bytes())
                    .context("Gemini image base64 decode failed")?;
                let mime_type = inline
                    .get("mimeType")
                    .or_else(|| inline.get("mime_type"))
                    .and_then(Value::as_str)
                    .map(str::to_string);
                out.push(ResponsePart::InlineData { mime_type, bytes });
            }
        }

        Ok(out)
    }
}

impl GenerationCapability for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    fn generate(&self, request: &GenerationRequest) -> Result<GenerationResponse> {
        let Some(api_key) = self.settings.api_key.as_deref() else {
            bail!("GEMINI_API_KEY or GOOGLE_API_KEY not set");
        };
        let endpoint = self.endpoint();
        let payload = Self::build_payload(request);

        let response = self
            .http
            .post(&endpoint)
            .header(API_KEY_HEADER, api_key)
            .timeout(self.settings.request_timeout)
            .json(&payload)
            .send()
            .map_err(|err| err.without_url())
            .with_context(|| format!("Gemini request failed ({endpoint})"))?;
        let response_payload = response_json_or_error("Gemini", response)?;
        Ok(GenerationResponse {
            parts: Self::extract_parts(&response_payload)?,
        })
    }
}

fn response_json_or_error(provider: &str, response: HttpResponse) -> Result<Value> {
    let status = response.status();
    let code = status.as_u16();
    let body = response
        .text()
        .map_err(|err| err.without_url())
        .with_context(|| format!("{provider} response body read failed"))?;
    if !status.is_success() {
        bail!("{provider} request failed ({code}): {}", truncate_body(&body, 512));
    }
    let parsed: Value = serde_json::from_str(&body)
        .with_context(|| format!("{provider} returned invalid JSON payload"))?;
    Ok(parsed)
}

fn truncate_body(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}
