use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use moodboard_contracts::chat::menu_commands;
use moodboard_contracts::ImageRef;
use moodboard_engine::resolve::{mime_for_path, resolve_local};
use moodboard_engine::{FetchError, ImageBytes, ImageResolver, Reply};
use reqwest::blocking::multipart::{Form as MultipartForm, Part as MultipartPart};
use reqwest::blocking::Client as HttpClient;
use serde::Deserialize;
use serde_json::{json, Value};

pub const DEFAULT_API_BASE: &str = "https://api.telegram.org";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub chat: Chat,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub photo: Vec<PhotoSize>,
}

impl Message {
    /// Telegram lists photo sizes smallest first.
    pub fn largest_photo(&self) -> Option<&PhotoSize> {
        self.photo.last()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PhotoSize {
    pub file_id: String,
}

/// Outbound half of the bot platform.
pub trait ChatTransport {
    fn send(&self, chat_id: i64, reply: Reply) -> Result<()>;
}

/// Bot API client over blocking HTTP. The token never appears in errors.
pub struct TelegramClient {
    api_base: String,
    token: String,
    http: HttpClient,
}

impl TelegramClient {
    pub fn new(token: impl Into<String>) -> Self {
        Self::with_api_base(token, DEFAULT_API_BASE)
    }

    pub fn with_api_base(token: impl Into<String>, api_base: &str) -> Self {
        Self {
            api_base: api_base.trim_end_matches('/').to_string(),
            token: token.into(),
            http: HttpClient::new(),
        }
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.token, method)
    }

    fn call(&self, method: &str, payload: &Value, timeout: Duration) -> Result<Value> {
        let response = self
            .http
            .post(self.method_url(method))
            .timeout(timeout)
            .json(payload)
            .send()
            .map_err(|err| err.without_url())
            .with_context(|| format!("Telegram {method} request failed"))?;
        let envelope: Value = response
            .json()
            .map_err(|err| err.without_url())
            .with_context(|| format!("Telegram {method} returned invalid JSON"))?;
        unwrap_envelope(method, envelope)
    }

    /// Raw updates so one undecodable update does not sink the whole batch.
    pub fn get_updates(&self, offset: Option<i64>, poll_timeout_s: u64) -> Result<Vec<Value>> {
        let mut payload = json!({
            "timeout": poll_timeout_s,
            "allowed_updates": ["message"],
        });
        if let Some(offset) = offset {
            payload["offset"] = json!(offset);
        }
        let result = self.call(
            "getUpdates",
            &payload,
            Duration::from_secs(poll_timeout_s + 10),
        )?;
        match result {
            Value::Array(updates) => Ok(updates),
            other => bail!("Telegram getUpdates returned {other} instead of a list"),
        }
    }

    pub fn send_message(&self, chat_id: i64, text: &str) -> Result<()> {
        self.call(
            "sendMessage",
            &json!({ "chat_id": chat_id, "text": text }),
            REQUEST_TIMEOUT,
        )?;
        Ok(())
    }

    pub fn send_photo(&self, chat_id: i64, bytes: Vec<u8>, caption: &str) -> Result<()> {
        let photo = MultipartPart::bytes(bytes)
            .file_name("moodboard.png")
            .mime_str("image/png")?;
        let form = MultipartForm::new()
            .text("chat_id", chat_id.to_string())
            .text("caption", caption.to_string())
            .part("photo", photo);
        let response = self
            .http
            .post(self.method_url("sendPhoto"))
            .timeout(REQUEST_TIMEOUT)
            .multipart(form)
            .send()
            .map_err(|err| err.without_url())
            .context("Telegram sendPhoto request failed")?;
        let envelope: Value = response
            .json()
            .map_err(|err| err.without_url())
            .context("Telegram sendPhoto returned invalid JSON")?;
        unwrap_envelope("sendPhoto", envelope)?;
        Ok(())
    }

    pub fn set_my_commands(&self) -> Result<()> {
        let commands: Vec<Value> = menu_commands()
            .map(|spec| json!({ "command": spec.command, "description": spec.description }))
            .collect();
        self.call(
            "setMyCommands",
            &json!({ "commands": commands }),
            REQUEST_TIMEOUT,
        )?;
        Ok(())
    }

    fn download_file(&self, file_id: &str) -> Result<ImageBytes> {
        let file = self.call("getFile", &json!({ "file_id": file_id }), REQUEST_TIMEOUT)?;
        let Some(file_path) = file.get("file_path").and_then(Value::as_str) else {
            bail!("Telegram getFile returned no file_path");
        };
        let url = format!("{}/file/bot{}/{}", self.api_base, self.token, file_path);
        let response = self
            .http
            .get(url)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .map_err(|err| err.without_url())
            .context("Telegram file download failed")?;
        let status = response.status();
        if !status.is_success() {
            bail!("Telegram file download failed ({})", status.as_u16());
        }
        let bytes = response
            .bytes()
            .map_err(|err| err.without_url())
            .context("Telegram file body read failed")?;
        Ok(ImageBytes::new(
            bytes.to_vec(),
            mime_for_path(Path::new(file_path)).map(str::to_string),
        ))
    }
}

fn unwrap_envelope(method: &str, envelope: Value) -> Result<Value> {
    if envelope.get("ok").and_then(Value::as_bool) == Some(true) {
        return Ok(envelope.get("result").cloned().unwrap_or(Value::Null));
    }
    let code = envelope
        .get("error_code")
        .and_then(Value::as_i64)
        .map(|code| code.to_string())
        .unwrap_or_else(|| "?".to_string());
    let description = envelope
        .get("description")
        .and_then(Value::as_str)
        .unwrap_or("no description");
    bail!("Telegram {method} failed ({code}): {description}")
}

impl ImageResolver for TelegramClient {
    fn resolve(&self, image: &ImageRef) -> Result<ImageBytes, FetchError> {
        if let Some(local) = resolve_local(image) {
            return local;
        }
        let ImageRef::Remote { token } = image else {
            return Err(FetchError::Unsupported { kind: image.kind() });
        };
        self.download_file(token)
            .map_err(|err| FetchError::Transport(format!("{err:#}")))
    }
}

impl ChatTransport for TelegramClient {
    fn send(&self, chat_id: i64, reply: Reply) -> Result<()> {
        match reply {
            Reply::Text(text) => self.send_message(chat_id, &text),
            Reply::Photo { bytes, caption } => self.send_photo(chat_id, bytes, &caption),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{unwrap_envelope, TelegramClient, Update};

    #[test]
    fn photo_update_exposes_largest_size_and_caption() -> anyhow::Result<()> {
        let update: Update = serde_json::from_value(json!({
            "update_id": 10,
            "message": {
                "message_id": 3,
                "chat": {"id": -100200, "type": "group"},
                "caption": "add to mood",
                "photo": [
                    {"file_id": "small", "file_unique_id": "a", "width": 90, "height": 60},
                    {"file_id": "large", "file_unique_id": "b", "width": 1280, "height": 853}
                ]
            }
        }))?;
        let message = update.message.as_ref().map(|message| {
            (
                message.chat.id,
                message.largest_photo().map(|photo| photo.file_id.clone()),
                message.caption.clone(),
            )
        });
        assert_eq!(
            message,
            Some((
                -100200,
                Some("large".to_string()),
                Some("add to mood".to_string())
            ))
        );
        Ok(())
    }

    #[test]
    fn non_message_updates_parse_without_message() -> anyhow::Result<()> {
        let update: Update = serde_json::from_value(json!({
            "update_id": 11,
            "edited_message": {"message_id": 1, "chat": {"id": 1}}
        }))?;
        assert!(update.message.is_none());
        Ok(())
    }

    #[test]
    fn envelope_errors_carry_code_and_description() {
        assert_eq!(
            unwrap_envelope("getMe", json!({"ok": true, "result": {"id": 1}})).ok(),
            Some(json!({"id": 1}))
        );
        let err = unwrap_envelope(
            "sendMessage",
            json!({"ok": false, "error_code": 403, "description": "Forbidden: bot was blocked"}),
        )
        .err()
        .map(|err| err.to_string())
        .unwrap_or_default();
        assert_eq!(
            err,
            "Telegram sendMessage failed (403): Forbidden: bot was blocked"
        );
    }

    #[test]
    fn method_urls_use_bot_token_path() {
        let client = TelegramClient::with_api_base("123:abc", "http://localhost:8081/");
        assert_eq!(
            client.method_url("getUpdates"),
            "http://localhost:8081/bot123:abc/getUpdates"
        );
    }
}
