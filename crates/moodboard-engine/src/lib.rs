pub mod compose;
pub mod config;
pub mod controller;
pub mod gemini;
pub mod generation;
pub mod replies;
pub mod resolve;
pub mod store;

use std::sync::Arc;

use anyhow::{Context, Result};
use moodboard_contracts::events::{BotEvent, EventLog};
use tracing::info;

pub use compose::{
    Composer, CompositionFailure, CompositionRequest, CompositionResult, GeneratedImage,
    MAX_REFERENCES,
};
pub use config::BotConfig;
pub use controller::{ConversationController, Reply, ReplySink};
pub use gemini::GeminiProvider;
pub use generation::GenerationCapability;
pub use resolve::{FetchError, ImageBytes, ImageResolver, LocalResolver};
pub use store::{ReferenceStore, SessionModeTracker, StoreBackend, StoreError, Stores};

/// Wires stores, the Gemini capability and the optional event log from
/// `config`. `resolver` must be able to fetch the transport's remote images.
pub fn build_controller(
    config: &BotConfig,
    resolver: Arc<dyn ImageResolver>,
) -> Result<ConversationController> {
    let stores = Stores::open(&config.store, Arc::clone(&resolver))
        .with_context(|| format!("failed to open {} store", config.store.backend))?;
    let capability: Arc<dyn GenerationCapability> =
        Arc::new(GeminiProvider::new(config.gemini.clone()));
    let composer = Composer::new(capability, resolver);
    let mut controller =
        ConversationController::new(stores, composer, config.caption_keywords.clone());

    if let Some(path) = &config.events_path {
        let session_id = format!("bot-{}", uuid::Uuid::new_v4());
        let events = EventLog::open(path, session_id)?;
        events.record(BotEvent::BotStarted {
            store: config.store.backend.to_string(),
            model: config.gemini.model.clone(),
        })?;
        controller = controller.with_events(events);
    }

    info!(
        store = %config.store.backend,
        model = %config.gemini.model,
        events = config.events_path.is_some(),
        "conversation controller ready"
    );
    Ok(controller)
}
