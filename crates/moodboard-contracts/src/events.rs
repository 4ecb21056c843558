use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::chat::SaveTrigger;
use crate::conversation::ConversationId;

/// Everything the bot writes to its event log. Serialized with a `type`
/// tag; per-conversation events carry the `conversation` id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BotEvent {
    BotStarted {
        store: String,
        model: String,
    },
    ReferenceSaved {
        conversation: ConversationId,
        via: SaveTrigger,
        image_kind: String,
        references: usize,
    },
    ReferencesCleared {
        conversation: ConversationId,
    },
    SessionModeChanged {
        conversation: ConversationId,
        collecting: bool,
    },
    CompositionFinished {
        conversation: ConversationId,
        outcome: String,
        references_used: usize,
        references_total: usize,
        truncated: bool,
    },
}

impl BotEvent {
    pub fn conversation(&self) -> Option<&ConversationId> {
        match self {
            Self::BotStarted { .. } => None,
            Self::ReferenceSaved { conversation, .. }
            | Self::ReferencesCleared { conversation }
            | Self::SessionModeChanged { conversation, .. }
            | Self::CompositionFinished { conversation, .. } => Some(conversation),
        }
    }
}

/// One line of the log: the event plus the process session and a timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventLine {
    pub session_id: String,
    pub ts: String,
    #[serde(flatten)]
    pub event: BotEvent,
}

/// Append-only JSONL log shared by every handler of one bot process.
#[derive(Debug, Clone)]
pub struct EventLog {
    session_id: Arc<str>,
    file: Arc<Mutex<File>>,
}

impl EventLog {
    /// Creates missing parent directories and opens `path` for appending.
    pub fn open(path: impl Into<PathBuf>, session_id: impl Into<String>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("failed to open event log {}", path.display()))?;
        Ok(Self {
            session_id: Arc::from(session_id.into()),
            file: Arc::new(Mutex::new(file)),
        })
    }

    pub fn record(&self, event: BotEvent) -> Result<EventLine> {
        let line = EventLine {
            session_id: self.session_id.to_string(),
            ts: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false),
            event,
        };
        let mut encoded = serde_json::to_vec(&line)?;
        encoded.push(b'\n');

        let mut file = self
            .file
            .lock()
            .map_err(|_| anyhow::anyhow!("event log lock poisoned"))?;
        file.write_all(&encoded)?;
        Ok(line)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use chrono::DateTime;
    use serde_json::Value;

    use super::{BotEvent, EventLine, EventLog};
    use crate::chat::SaveTrigger;
    use crate::conversation::ConversationId;

    #[test]
    fn record_writes_flat_tagged_line() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("logs").join("events.jsonl");
        let log = EventLog::open(&path, "bot-1")?;

        let written = log.record(BotEvent::ReferenceSaved {
            conversation: ConversationId::from(42_i64),
            via: SaveTrigger::Caption,
            image_kind: "remote".to_string(),
            references: 3,
        })?;

        let content = fs::read_to_string(&path)?;
        let row: Value = serde_json::from_str(content.lines().next().unwrap_or("{}"))?;
        assert_eq!(row["type"], "reference_saved");
        assert_eq!(row["session_id"], "bot-1");
        assert_eq!(row["conversation"], "42");
        assert_eq!(row["via"], "caption");
        assert_eq!(row["references"], 3);
        DateTime::parse_from_rfc3339(row["ts"].as_str().unwrap_or(""))?;

        let parsed: EventLine = serde_json::from_value(row)?;
        assert_eq!(parsed, written);
        Ok(())
    }

    #[test]
    fn clones_append_to_the_same_file() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let log = EventLog::open(&path, "bot-2")?;

        log.record(BotEvent::BotStarted {
            store: "memory".to_string(),
            model: "m".to_string(),
        })?;
        log.clone().record(BotEvent::ReferencesCleared {
            conversation: ConversationId::from("-100"),
        })?;
        EventLog::open(&path, "bot-3")?.record(BotEvent::SessionModeChanged {
            conversation: ConversationId::from("-100"),
            collecting: true,
        })?;

        let lines: Vec<EventLine> = fs::read_to_string(&path)?
            .lines()
            .map(serde_json::from_str)
            .collect::<Result<_, _>>()?;
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0].event.conversation(), None);
        assert_eq!(
            lines[1].event.conversation(),
            Some(&ConversationId::from("-100"))
        );
        assert_eq!(lines[2].session_id, "bot-3");
        Ok(())
    }
}
