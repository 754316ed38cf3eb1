//! `RecordStore` over the Discord REST API

use std::sync::Arc;

use async_trait::async_trait;
use serenity::builder::{CreateThread, GetMessages};
use serenity::http::{Http, HttpError};
use serenity::model::channel::{Channel, MessageFlags};
use serenity::model::id::{ChannelId, MessageId};
use threadkeep_core::store::{PageRequest, RecordStore};
use threadkeep_core::{
    CoreError, Record, RecordContent, RecordId, Result, StreamId, Substream, UserId,
};
use tokio::sync::OnceCell;
use tracing::debug;

use crate::convert::{create_message, edit_message, to_record};

/// Records are messages, streams are channels, sub-streams are threads.
///
/// Rate limiting and retries are left to serenity's HTTP client.
pub struct DiscordRecordStore {
    http: Arc<Http>,
    author: OnceCell<UserId>,
}

impl std::fmt::Debug for DiscordRecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscordRecordStore")
            .field("author", &self.author.get())
            .finish_non_exhaustive()
    }
}

impl DiscordRecordStore {
    pub fn new(http: Arc<Http>) -> Self {
        Self {
            http,
            author: OnceCell::new(),
        }
    }

    pub fn http(&self) -> &Arc<Http> {
        &self.http
    }
}

fn channel(stream_id: StreamId) -> ChannelId {
    ChannelId::new(stream_id.get())
}

fn message(record_id: RecordId) -> MessageId {
    MessageId::new(record_id.get())
}

fn is_not_found(err: &serenity::Error) -> bool {
    matches!(
        err,
        serenity::Error::Http(HttpError::UnsuccessfulRequest(response))
            if response.status_code.as_u16() == 404
    )
}

#[async_trait]
impl RecordStore for DiscordRecordStore {
    async fn fetch_page(&self, stream_id: StreamId, page: PageRequest) -> Result<Vec<Record>> {
        let mut request = GetMessages::new().limit(page.limit);
        if let Some(before) = page.before {
            request = request.before(message(before));
        }
        let messages = channel(stream_id)
            .messages(&*self.http, request)
            .await
            .map_err(|e| CoreError::store_unavailable("fetch_page", Some(stream_id), e))?;
        debug!(stream_id = %stream_id, count = messages.len(), "fetched page");
        Ok(messages.iter().map(to_record).collect())
    }

    async fn fetch_record(&self, stream_id: StreamId, record_id: RecordId) -> Result<Record> {
        let msg = channel(stream_id)
            .message(&*self.http, message(record_id))
            .await
            .map_err(|e| CoreError::store_unavailable("fetch_record", Some(stream_id), e))?;
        Ok(to_record(&msg))
    }

    async fn create_record(&self, stream_id: StreamId, content: RecordContent) -> Result<Record> {
        let msg = channel(stream_id)
            .send_message(&*self.http, create_message(&content))
            .await
            .map_err(|e| CoreError::store_unavailable("create_record", Some(stream_id), e))?;
        Ok(to_record(&msg))
    }

    async fn edit_record(
        &self,
        stream_id: StreamId,
        record_id: RecordId,
        content: RecordContent,
    ) -> Result<Record> {
        let msg = channel(stream_id)
            .edit_message(&*self.http, message(record_id), edit_message(&content))
            .await
            .map_err(|e| CoreError::store_unavailable("edit_record", Some(stream_id), e))?;
        Ok(to_record(&msg))
    }

    async fn delete_record(&self, stream_id: StreamId, record_id: RecordId) -> Result<()> {
        channel(stream_id)
            .delete_message(&*self.http, message(record_id))
            .await
            .map_err(|e| CoreError::store_unavailable("delete_record", Some(stream_id), e))
    }

    async fn attach_substream(
        &self,
        stream_id: StreamId,
        record_id: RecordId,
        name: &str,
    ) -> Result<Substream> {
        let thread = channel(stream_id)
            .create_thread_from_message(&*self.http, message(record_id), CreateThread::new(name))
            .await
            .map_err(|e| CoreError::store_unavailable("attach_substream", Some(stream_id), e))?;
        Ok(Substream {
            id: StreamId(thread.id.get()),
            name: thread.name,
        })
    }

    async fn fetch_substream_of(
        &self,
        stream_id: StreamId,
        record_id: RecordId,
    ) -> Result<Option<Substream>> {
        let msg = channel(stream_id)
            .message(&*self.http, message(record_id))
            .await
            .map_err(|e| CoreError::store_unavailable("fetch_substream_of", Some(stream_id), e))?;
        if let Some(thread) = msg.thread {
            return Ok(Some(Substream {
                id: StreamId(thread.id.get()),
                name: thread.name,
            }));
        }
        if !msg
            .flags
            .is_some_and(|flags| flags.contains(MessageFlags::HAS_THREAD))
        {
            return Ok(None);
        }

        // the thread shares the starter message's id
        let thread = match self.http.get_channel(ChannelId::new(record_id.get())).await {
            Ok(thread) => thread,
            // the flag outlives a deleted thread
            Err(err) if is_not_found(&err) => {
                debug!(stream_id = %stream_id, record_id = %record_id, "thread no longer exists");
                return Ok(None);
            }
            Err(err) => {
                return Err(CoreError::store_unavailable(
                    "fetch_substream_of",
                    Some(stream_id),
                    err,
                ));
            }
        };
        match thread {
            Channel::Guild(thread) => Ok(Some(Substream {
                id: StreamId(thread.id.get()),
                name: thread.name,
            })),
            _ => Ok(None),
        }
    }

    async fn current_author(&self) -> Result<UserId> {
        self.author
            .get_or_try_init(|| async {
                let user = self
                    .http
                    .get_current_user()
                    .await
                    .map_err(|e| CoreError::store_unavailable("current_author", None, e))?;
                Ok::<_, CoreError>(UserId(user.id.get()))
            })
            .await
            .copied()
    }
}
