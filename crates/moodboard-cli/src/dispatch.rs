use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use moodboard_contracts::{ConversationId, ImageRef};
use moodboard_engine::replies;
use moodboard_engine::{ConversationController, Reply, ReplySink};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::telegram::{ChatTransport, TelegramClient, Update};

const POLL_TIMEOUT_S: u64 = 30;
const POLL_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Forwards controller replies for one chat straight to the transport.
struct ChatSink<'a> {
    transport: &'a dyn ChatTransport,
    chat_id: i64,
}

impl ReplySink for ChatSink<'_> {
    fn send(&mut self, reply: Reply) -> Result<()> {
        self.transport.send(self.chat_id, reply)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookStatus {
    Accepted,
    Failed,
}

impl WebhookStatus {
    pub fn code(self) -> u16 {
        match self {
            Self::Accepted => 200,
            Self::Failed => 500,
        }
    }
}

/// Routes one update to the controller. Updates without a message, or
/// messages with neither a photo nor text, are ignored.
pub fn process_update(
    controller: &ConversationController,
    transport: &dyn ChatTransport,
    update: &Update,
) -> Result<()> {
    let Some(message) = &update.message else {
        debug!(update_id = update.update_id, "update without message");
        return Ok(());
    };
    let conversation = ConversationId::from(message.chat.id);
    let mut sink = ChatSink {
        transport,
        chat_id: message.chat.id,
    };

    if let Some(photo) = message.largest_photo() {
        let caption = message.caption.as_deref().unwrap_or_default();
        return controller.handle_photo(
            &conversation,
            ImageRef::remote(photo.file_id.clone()),
            caption,
            &mut sink,
        );
    }
    match message.text.as_deref() {
        Some(text) => controller.handle_text(&conversation, text, &mut sink),
        None => Ok(()),
    }
}

/// Handles one webhook delivery. A malformed body or a failed update yields
/// `Failed`; on failure the chat gets a generic error reply when possible.
pub fn handle_webhook_body(
    controller: &ConversationController,
    transport: &dyn ChatTransport,
    body: &str,
) -> WebhookStatus {
    let update: Update = match serde_json::from_str(body) {
        Ok(update) => update,
        Err(err) => {
            warn!(error = %err, "malformed webhook body");
            return WebhookStatus::Failed;
        }
    };
    match process_update(controller, transport, &update) {
        Ok(()) => WebhookStatus::Accepted,
        Err(err) => {
            error!(update_id = update.update_id, error = format!("{err:#}"), "update failed");
            notify_failure(transport, &update);
            WebhookStatus::Failed
        }
    }
}

fn notify_failure(transport: &dyn ChatTransport, update: &Update) {
    let Some(message) = &update.message else {
        return;
    };
    if let Err(err) = transport.send(message.chat.id, Reply::Text(replies::unexpected_error())) {
        warn!(chat_id = message.chat.id, error = format!("{err:#}"), "error reply failed");
    }
}

/// Decodes and handles one raw update from `getUpdates`. Returns the offset
/// to acknowledge it, if the update carried an id at all.
pub fn handle_raw_update(
    controller: &ConversationController,
    transport: &dyn ChatTransport,
    raw: Value,
) -> Option<i64> {
    let update_id = raw.get("update_id").and_then(Value::as_i64);
    match serde_json::from_value::<Update>(raw) {
        Ok(update) => {
            if let Err(err) = process_update(controller, transport, &update) {
                error!(update_id = update.update_id, error = format!("{err:#}"), "update failed");
                notify_failure(transport, &update);
            }
        }
        Err(err) => warn!(?update_id, error = %err, "skipping undecodable update"),
    }
    update_id.map(|id| id + 1)
}

/// Long-polls until the process is killed. Transport errors are logged and
/// retried after a pause.
pub fn run_poll_loop(controller: &ConversationController, client: &TelegramClient) -> Result<i32> {
    let mut offset: Option<i64> = None;
    info!("polling for updates");
    loop {
        let updates = match client.get_updates(offset, POLL_TIMEOUT_S) {
            Ok(updates) => updates,
            Err(err) => {
                warn!(error = format!("{err:#}"), "getUpdates failed; retrying");
                thread::sleep(POLL_RETRY_DELAY);
                continue;
            }
        };
        for raw in updates {
            if let Some(next) = handle_raw_update(controller, client, raw) {
                offset = Some(offset.map_or(next, |current| current.max(next)));
            }
        }
    }
}

/// Reads a webhook body from `path`, or stdin when `path` is `-`.
pub fn read_webhook_body(path: &str) -> Result<String> {
    if path == "-" {
        return std::io::read_to_string(std::io::stdin()).context("failed to read stdin");
    }
    std::fs::read_to_string(path).with_context(|| format!("failed to read {path}"))
}
