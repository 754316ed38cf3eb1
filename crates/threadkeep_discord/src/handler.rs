use std::sync::Arc;

use async_trait::async_trait;
use serenity::client::{Context, EventHandler};
use serenity::model::application::Interaction;
use serenity::model::channel::{GuildChannel, Message, PartialGuildChannel};
use serenity::model::event::MessageUpdateEvent;
use serenity::model::gateway::Ready;
use serenity::model::id::{ChannelId, GuildId, MessageId};
use threadkeep_core::{EventDispatcher, RecordId, StreamId};
use tracing::{debug, error, info, warn};

use crate::config::DiscordBotConfig;
use crate::convert::to_record;
use crate::interactions::DocumentControls;

/// Feeds gateway events into the dispatcher and routes control-card
/// interactions.
#[derive(Debug, Clone)]
pub struct ThreadkeepHandler {
    dispatcher: Arc<EventDispatcher>,
    controls: Arc<DocumentControls>,
    config: Arc<DiscordBotConfig>,
}

impl ThreadkeepHandler {
    pub fn new(
        dispatcher: Arc<EventDispatcher>,
        controls: Arc<DocumentControls>,
        config: Arc<DiscordBotConfig>,
    ) -> Self {
        Self {
            dispatcher,
            controls,
            config,
        }
    }

    fn allowed(&self, guild_id: Option<GuildId>) -> bool {
        self.config.allows_guild(guild_id.map(|g| g.get()))
    }
}

#[async_trait]
impl EventHandler for ThreadkeepHandler {
    async fn ready(&self, _ctx: Context, ready: Ready) {
        info!(
            user = %ready.user.name,
            guilds = ready.guilds.len(),
            "connected to Discord"
        );
        // runs on every (re)connect; initialize is idempotent
        let dispatcher = Arc::clone(&self.dispatcher);
        tokio::spawn(async move {
            dispatcher.ready().await;
        });
    }

    async fn message(&self, _ctx: Context, msg: Message) {
        if !self.allowed(msg.guild_id) {
            return;
        }
        self.dispatcher.record_created(&to_record(&msg)).await;
    }

    async fn message_update(
        &self,
        ctx: Context,
        _old_if_available: Option<Message>,
        new: Option<Message>,
        event: MessageUpdateEvent,
    ) {
        if !self.allowed(event.guild_id) {
            return;
        }
        let stream_id = StreamId(event.channel_id.get());
        if let Some(msg) = new {
            self.dispatcher.record_updated(&to_record(&msg)).await;
            return;
        }
        // without a full message, only mirrored streams are worth a fetch
        if !self.dispatcher.cache().is_cached(stream_id) {
            return;
        }
        match event.channel_id.message(&ctx.http, event.id).await {
            Ok(msg) => self.dispatcher.record_updated(&to_record(&msg)).await,
            Err(err) => warn!(
                stream_id = %stream_id,
                record_id = event.id.get(),
                error = %err,
                "could not fetch updated message"
            ),
        }
    }

    async fn message_delete(
        &self,
        _ctx: Context,
        channel_id: ChannelId,
        deleted_message_id: MessageId,
        guild_id: Option<GuildId>,
    ) {
        if !self.allowed(guild_id) {
            return;
        }
        self.dispatcher
            .record_deleted(
                StreamId(channel_id.get()),
                RecordId(deleted_message_id.get()),
            )
            .await;
    }

    async fn thread_create(&self, _ctx: Context, thread: GuildChannel) {
        let Some(parent) = thread.parent_id else {
            return;
        };
        debug!(thread = thread.id.get(), name = %thread.name, "thread created");
        self.dispatcher
            .substream_changed(StreamId(parent.get()), RecordId(thread.id.get()))
            .await;
    }

    async fn thread_delete(
        &self,
        _ctx: Context,
        thread: PartialGuildChannel,
        _full_thread_data: Option<GuildChannel>,
    ) {
        // threads started from a message share its id
        self.dispatcher
            .substream_deleted(StreamId(thread.parent_id.get()), RecordId(thread.id.get()))
            .await;
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        let result = match &interaction {
            Interaction::Component(component) => {
                self.controls.handle_component(&ctx, component).await
            }
            Interaction::Modal(modal) => self.controls.handle_modal(&ctx, modal).await,
            _ => Ok(()),
        };
        if let Err(err) = result {
            error!(error = %err, "interaction failed");
        }
    }
}
