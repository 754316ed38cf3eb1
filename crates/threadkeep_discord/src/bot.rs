use std::sync::Arc;

use serenity::Client;
use serenity::http::Http;
use serenity::model::gateway::GatewayIntents;
use threadkeep_core::{
    DocumentEngine, DocumentSyncFeature, EventDispatcher, RecordStore, StreamCache,
    ThreadkeepConfig,
};
use tracing::{info, warn};

use crate::Result;
use crate::config::DiscordBotConfig;
use crate::handler::ThreadkeepHandler;
use crate::interactions::DocumentControls;
use crate::store::DiscordRecordStore;

/// The assembled bot: Discord-backed store, cache, document engine and
/// gateway handler.
#[derive(Debug)]
pub struct ThreadkeepBot {
    token: String,
    engine: Arc<DocumentEngine>,
    handler: ThreadkeepHandler,
}

impl ThreadkeepBot {
    pub fn new(config: &ThreadkeepConfig, bot_config: DiscordBotConfig) -> Result<Self> {
        let http = Arc::new(Http::new(&bot_config.bot_token));
        let store: Arc<dyn RecordStore> = Arc::new(DiscordRecordStore::new(http));
        let cache = Arc::new(StreamCache::with_policy(store, config.cache.policy()?));

        let settings = config.documents.settings()?;
        info!(
            control_stream = %settings.control_stream,
            directory = %settings.directory.display(),
            documents = settings.names.len(),
            "document sync configured"
        );
        let engine = Arc::new(DocumentEngine::new(Arc::clone(&cache), settings));

        let dispatcher = EventDispatcher::new(cache)
            .with_feature(Arc::new(DocumentSyncFeature::new(Arc::clone(&engine))));

        let admins = bot_config.admins(&config.discord.admin_users);
        if admins.is_empty() {
            warn!("no admin users configured; document controls will refuse everyone");
        }
        let controls = DocumentControls::new(Arc::clone(&engine), admins);

        Ok(Self {
            token: bot_config.bot_token.clone(),
            engine,
            handler: ThreadkeepHandler::new(
                Arc::new(dispatcher),
                Arc::new(controls),
                Arc::new(bot_config),
            ),
        })
    }

    pub fn engine(&self) -> &Arc<DocumentEngine> {
        &self.engine
    }

    /// Connect to the gateway and run until Ctrl-C
    pub async fn run(self) -> Result<()> {
        let intents = GatewayIntents::GUILDS
            | GatewayIntents::GUILD_MESSAGES
            | GatewayIntents::MESSAGE_CONTENT;

        let mut client = Client::builder(&self.token, intents)
            .event_handler(self.handler)
            .await?;

        let shard_manager = Arc::clone(&client.shard_manager);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutting down");
                shard_manager.shutdown_all().await;
            }
        });

        client.start().await?;
        Ok(())
    }
}
