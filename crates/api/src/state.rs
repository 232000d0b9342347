//! Shared application state for the Axum API server.

use std::sync::Arc;

use herald_common::config::{AppConfig, ConfigSource};
use herald_common::types::AddressField;
use herald_content::{
    ArchiveIngester, ContentRenderer, DefaultAssetValidator, LocalStorage, TemplateService,
};
use herald_notifier::{ChannelDispatcher, RecipientResolver, TwilioWhatsAppTransport};
use herald_store::PgGroupMembership;
use sqlx::PgPool;

/// Application state shared across all route handlers via Axum `State`.
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: AppConfig,
    pub templates: TemplateService,
    pub renderer: ContentRenderer,
    pub dispatcher: Arc<ChannelDispatcher>,
}

impl AppState {
    /// Wire the local media storage, Postgres group membership and the
    /// WhatsApp transport from `config`.
    pub fn new(pool: PgPool, config: AppConfig) -> Self {
        let storage = LocalStorage::new(config.media_root.clone(), config.media_url.clone());
        let ingester = ArchiveIngester::new(
            Arc::new(storage),
            Arc::new(DefaultAssetValidator::new()),
        );

        let resolver = RecipientResolver::new(
            Arc::new(PgGroupMembership::new(pool.clone())),
            AddressField::Phone,
        );
        let transport = Arc::new(TwilioWhatsAppTransport::new(&config.credentials()));
        let dispatcher = ChannelDispatcher::new(Some(&config), resolver, transport);

        Self {
            pool,
            config,
            templates: TemplateService::new(ingester),
            renderer: ContentRenderer::new(),
            dispatcher: Arc::new(dispatcher),
        }
    }

    /// Replace the dispatcher, e.g. with one using a different transport.
    pub fn with_dispatcher(mut self, dispatcher: ChannelDispatcher) -> Self {
        self.dispatcher = Arc::new(dispatcher);
        self
    }
}
