use std::sync::Arc;

use concierge_core::{Config, RelayDispatcher, SanitizedConfig, TicketRegistry, TicketStore};

/// Shared application state
pub struct AppState {
    config: SanitizedConfig,
    store: Arc<dyn TicketStore>,
    registry: Arc<TicketRegistry>,
    dispatcher: Option<RelayDispatcher>,
}

impl AppState {
    pub fn new(
        config: &Config,
        store: Arc<dyn TicketStore>,
        registry: Arc<TicketRegistry>,
    ) -> Self {
        Self {
            config: SanitizedConfig::from(config),
            store,
            registry,
            dispatcher: None,
        }
    }

    /// Attach the live dispatcher so its workers show up in metrics.
    pub fn with_dispatcher(mut self, dispatcher: RelayDispatcher) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    pub fn sanitized_config(&self) -> &SanitizedConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn TicketStore> {
        &self.store
    }

    pub fn registry(&self) -> &TicketRegistry {
        &self.registry
    }

    pub fn dispatcher(&self) -> Option<&RelayDispatcher> {
        self.dispatcher.as_ref()
    }
}
