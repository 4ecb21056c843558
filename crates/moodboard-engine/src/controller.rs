use anyhow::Result;
use moodboard_contracts::chat::{
    classify, parse_input, BotAction, CaptionKeywords, ChatInput, PhotoIntent, SaveTrigger,
};
use moodboard_contracts::events::{BotEvent, EventLog};
use moodboard_contracts::{ConversationId, ImageRef};
use tracing::{debug, error, info, warn};

use crate::compose::{CompositionFailure, Composer};
use crate::replies;
use crate::store::{StoreError, Stores};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Text(String),
    Photo { bytes: Vec<u8>, caption: String },
}

/// Where replies go as soon as they are produced, so the "generating"
/// acknowledgement reaches the user before the generation call returns.
pub trait ReplySink {
    fn send(&mut self, reply: Reply) -> Result<()>;
}

impl ReplySink for Vec<Reply> {
    fn send(&mut self, reply: Reply) -> Result<()> {
        self.push(reply);
        Ok(())
    }
}

/// Routes commands and photos of one conversation to the stores and the
/// composer. Store failures become a reply; only sink errors propagate.
pub struct ConversationController {
    stores: Stores,
    composer: Composer,
    keywords: CaptionKeywords,
    events: Option<EventLog>,
}

impl ConversationController {
    pub fn new(stores: Stores, composer: Composer, keywords: CaptionKeywords) -> Self {
        Self {
            stores,
            composer,
            keywords,
            events: None,
        }
    }

    pub fn with_events(mut self, events: EventLog) -> Self {
        self.events = Some(events);
        self
    }

    pub fn handle_text(
        &self,
        conversation: &ConversationId,
        text: &str,
        sink: &mut dyn ReplySink,
    ) -> Result<()> {
        match parse_input(text) {
            ChatInput::Noop => Ok(()),
            ChatInput::Command(action) => self.handle_command(conversation, action, sink),
            ChatInput::Unknown { command } => {
                debug!(%conversation, command = %command, "unknown command");
                sink.send(Reply::Text(replies::unknown_command(&command)))
            }
            ChatInput::Text(_) => sink.send(Reply::Text(replies::send_a_photo())),
        }
    }

    pub fn handle_command(
        &self,
        conversation: &ConversationId,
        action: BotAction,
        sink: &mut dyn ReplySink,
    ) -> Result<()> {
        info!(%conversation, ?action, "command");
        let reply = match action {
            BotAction::Start | BotAction::Help => Ok(replies::welcome()),
            BotAction::SetStyle => self
                .set_mode(conversation, true)
                .map(|()| replies::collecting_started()),
            BotAction::DoneStyle => self
                .set_mode(conversation, false)
                .and_then(|()| self.stores.references.count(conversation))
                .map(replies::collecting_finished),
            BotAction::ClearStyle => self.clear_references(conversation),
            BotAction::Status => self
                .stores
                .references
                .count(conversation)
                .map(replies::status),
        };
        sink.send(Reply::Text(self.or_storage_unavailable(conversation, reply)))
    }

    pub fn handle_photo(
        &self,
        conversation: &ConversationId,
        photo: ImageRef,
        caption: &str,
        sink: &mut dyn ReplySink,
    ) -> Result<()> {
        let session_mode = match self.stores.modes.get(conversation) {
            Ok(mode) => mode,
            Err(err) => return self.report_store_error(conversation, err, sink),
        };

        match classify(session_mode, caption, &self.keywords) {
            PhotoIntent::SaveAsReference { via } => {
                let saved = self.save_reference(conversation, photo, via);
                sink.send(Reply::Text(self.or_storage_unavailable(conversation, saved)))
            }
            PhotoIntent::TreatAsSubject => self.transform(conversation, &photo, sink),
        }
    }

    fn set_mode(&self, conversation: &ConversationId, collecting: bool) -> Result<(), StoreError> {
        self.stores.modes.set(conversation, collecting)?;
        self.record(BotEvent::SessionModeChanged {
            conversation: conversation.clone(),
            collecting,
        });
        Ok(())
    }

    fn clear_references(&self, conversation: &ConversationId) -> Result<String, StoreError> {
        self.stores.references.clear(conversation)?;
        info!(%conversation, "references cleared");
        self.record(BotEvent::ReferencesCleared {
            conversation: conversation.clone(),
        });
        Ok(replies::references_cleared())
    }

    fn save_reference(
        &self,
        conversation: &ConversationId,
        photo: ImageRef,
        via: SaveTrigger,
    ) -> Result<String, StoreError> {
        let kind = photo.kind();
        self.stores.references.append(conversation, photo)?;
        let count = self.stores.references.count(conversation)?;
        info!(%conversation, references = count, ?via, "reference saved");
        self.record(BotEvent::ReferenceSaved {
            conversation: conversation.clone(),
            via,
            image_kind: kind.to_string(),
            references: count,
        });
        Ok(match via {
            SaveTrigger::Caption => replies::reference_saved_from_caption(count),
            SaveTrigger::SessionMode => replies::reference_saved(count),
        })
    }

    fn transform(
        &self,
        conversation: &ConversationId,
        subject: &ImageRef,
        sink: &mut dyn ReplySink,
    ) -> Result<()> {
        let references = match self.stores.references.list(conversation) {
            Ok(references) => references,
            Err(err) => return self.report_store_error(conversation, err, sink),
        };
        if references.is_empty() {
            info!(%conversation, "transform requested without references");
            return sink.send(Reply::Text(replies::no_references()));
        }

        sink.send(Reply::Text(replies::generating()))?;
        let result = self.composer.compose(subject, &references);
        info!(
            %conversation,
            outcome = result.label(),
            references = result.references_used,
            truncated = result.truncated,
            "composition finished"
        );
        self.record(BotEvent::CompositionFinished {
            conversation: conversation.clone(),
            outcome: result.label().to_string(),
            references_used: result.references_used,
            references_total: result.references_total,
            truncated: result.truncated,
        });

        if result.truncated {
            sink.send(Reply::Text(replies::references_truncated(
                result.references_total,
            )))?;
        }
        let reply = match result.outcome {
            Ok(image) => Reply::Photo {
                bytes: image.bytes,
                caption: replies::transformed_caption(),
            },
            Err(CompositionFailure::NoReferencesConfigured) => Reply::Text(replies::no_references()),
            Err(CompositionFailure::GenerationEmpty) => Reply::Text(replies::generation_empty()),
            Err(CompositionFailure::QuotaExceeded { .. }) => {
                Reply::Text(replies::quota_exceeded())
            }
            Err(CompositionFailure::GenerationFailed { diagnostic }) => {
                error!(%conversation, diagnostic = %diagnostic, "generation failed");
                Reply::Text(replies::generation_failed(&diagnostic))
            }
        };
        sink.send(reply)
    }

    fn or_storage_unavailable(
        &self,
        conversation: &ConversationId,
        reply: Result<String, StoreError>,
    ) -> String {
        reply.unwrap_or_else(|err| {
            error!(%conversation, error = %err, "store operation failed");
            replies::storage_unavailable()
        })
    }

    fn report_store_error(
        &self,
        conversation: &ConversationId,
        err: StoreError,
        sink: &mut dyn ReplySink,
    ) -> Result<()> {
        let text = self.or_storage_unavailable(conversation, Err(err));
        sink.send(Reply::Text(text))
    }

    fn record(&self, event: BotEvent) {
        let Some(events) = &self.events else {
            return;
        };
        if let Err(err) = events.record(event) {
            warn!(error = %err, "failed to write event");
        }
    }
}
