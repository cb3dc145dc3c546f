//! Redis stream backend.
//!
//! Every instance posts to one shared stream and reads through one shared
//! consumer group, so each message is handed to exactly one instance.
//! The instance's service id is its consumer name.

use ::redis::aio::MultiplexedConnection;
use ::redis::streams::{StreamReadOptions, StreamReadReply};
use ::redis::{AsyncCommands, Client, RedisError};
use async_trait::async_trait;
use tracing::debug;

use super::{MAX_BATCH, Message, MessageStream};
use crate::error::{Error, Result};

/// Stream every instance posts to.
pub const STREAM_KEY: &str = "GwebRedisMessageStream";
/// Entry field holding the payload.
pub const EVENT_FIELD: &str = "GwebRedisStreamEvent";
/// Consumer group shared by all instances.
pub const GROUP: &str = "GwebRedisStreamGroup";

/// A [`MessageStream`] over a Redis stream and consumer group.
#[derive(Clone)]
pub struct RedisStream {
    conn: MultiplexedConnection,
    consumer: String,
}

impl RedisStream {
    /// Connects to `url` and prepares the stream for `service_id`.
    ///
    /// `url` is either a full `redis://` URL or a bare `host:port`. The
    /// server must answer `PING`; the stream and its consumer group are
    /// created when missing.
    pub async fn connect(url: &str, service_id: &str) -> Result<Self> {
        let url = if url.contains("://") { url.to_owned() } else { format!("redis://{url}") };
        let client = Client::open(url.as_str()).map_err(connect_err)?;
        let mut conn = client.get_multiplexed_async_connection().await.map_err(connect_err)?;

        let _: String = ::redis::cmd("PING").query_async(&mut conn).await.map_err(connect_err)?;

        let created: ::redis::RedisResult<()> =
            conn.xgroup_create_mkstream(STREAM_KEY, GROUP, "0").await;
        match created {
            Ok(()) => debug!(stream = STREAM_KEY, group = GROUP, "consumer group created"),
            Err(e) if e.code() == Some("BUSYGROUP") => {}
            Err(e) => return Err(connect_err(e)),
        }

        Ok(Self { conn, consumer: service_id.to_owned() })
    }

    /// This instance's consumer name.
    pub fn consumer(&self) -> &str {
        &self.consumer
    }
}

fn connect_err(e: RedisError) -> Error {
    Error::StreamConnect(e.into())
}

#[async_trait]
impl MessageStream for RedisStream {
    async fn post_message(&self, service_id: &str, payload: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let id: String = conn
            .xadd(STREAM_KEY, "*", &[(EVENT_FIELD, payload)])
            .await
            .map_err(|e| Error::StreamWrite(e.into()))?;
        debug!(service_id, message_id = %id, "message posted");
        Ok(())
    }

    async fn read_message_stream(&self) -> Result<Vec<Message>> {
        let mut conn = self.conn.clone();
        let opts = StreamReadOptions::default()
            .group(GROUP, self.consumer.as_str())
            .count(MAX_BATCH);
        let reply: Option<StreamReadReply> = conn
            .xread_options(&[STREAM_KEY], &[">"], &opts)
            .await
            .map_err(|e| Error::StreamRead(e.into()))?;

        let Some(reply) = reply else {
            return Ok(Vec::new());
        };
        let mut messages = Vec::new();
        for key in reply.keys {
            for entry in key.ids {
                // entries written by other producers may lack the payload field
                if let Some(payload) = entry.get::<String>(EVENT_FIELD) {
                    messages.push(Message { payload, message_id: entry.id });
                }
            }
        }
        messages.truncate(MAX_BATCH);
        Ok(messages)
    }
}
