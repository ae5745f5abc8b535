//! Discord provider.
//!
//! A serenity gateway bot: the event handler forwards every non-bot
//! message into the bridge's inbound stream; outbound sends go through the
//! HTTP API, chunked to Discord's message length cap. Long outputs are
//! uploaded as attachments by the caller via [`ChatProvider::send_file`].

use std::sync::Arc;

use parking_lot::Mutex;
use serenity::all::{
    ChannelId, Client, Context, CreateAttachment, CreateMessage, EventHandler, GatewayIntents,
    Message, Ready,
};
use serenity::gateway::ShardManager;
use serenity::http::Http;
use tokio::sync::mpsc;

use cr_domain::message::InboundMessage;
use cr_domain::{Error, Result};

use crate::traits::ChatProvider;

/// Discord caps messages at 2000 characters; stay under it so a chunk
/// boundary marker never tips a chunk over.
const CHUNK_LIMIT: usize = 1900;

pub struct DiscordProvider {
    token: String,
    inbound_tx: mpsc::Sender<InboundMessage>,
    inbound_rx: Mutex<Option<mpsc::Receiver<InboundMessage>>>,
    http: Mutex<Option<Arc<Http>>>,
    shard_manager: Mutex<Option<Arc<ShardManager>>>,
}

impl DiscordProvider {
    pub const NAME: &'static str = "discord";

    pub fn new(token: String) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(256);
        Self {
            token,
            inbound_tx,
            inbound_rx: Mutex::new(Some(inbound_rx)),
            http: Mutex::new(None),
            shard_manager: Mutex::new(None),
        }
    }

    fn http(&self) -> Result<Arc<Http>> {
        self.http
            .lock()
            .clone()
            .ok_or_else(|| Error::Transport("discord provider not started".into()))
    }

    fn channel(&self, channel_id: &str) -> Result<ChannelId> {
        let id: u64 = channel_id
            .parse()
            .map_err(|_| Error::Transport(format!("invalid discord channel id: {channel_id}")))?;
        if id == 0 {
            return Err(Error::Transport("discord channel id must be non-zero".into()));
        }
        Ok(ChannelId::new(id))
    }
}

struct Handler {
    tx: mpsc::Sender<InboundMessage>,
}

#[serenity::async_trait]
impl EventHandler for Handler {
    async fn message(&self, _ctx: Context, msg: Message) {
        if msg.author.bot {
            return;
        }
        let inbound = InboundMessage {
            channel_id: msg.channel_id.to_string(),
            content: msg.content.clone(),
            author: msg.author.name.clone(),
            author_id: msg.author.id.to_string(),
            source: DiscordProvider::NAME.to_string(),
        };
        if self.tx.send(inbound).await.is_err() {
            tracing::warn!("inbound stream closed, dropping discord message");
        }
    }

    async fn ready(&self, _ctx: Context, ready: Ready) {
        tracing::info!(bot = %ready.user.name, "discord gateway connected");
    }
}

#[async_trait::async_trait]
impl ChatProvider for DiscordProvider {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn start(&self) -> Result<()> {
        let intents = GatewayIntents::GUILDS
            | GatewayIntents::GUILD_MESSAGES
            | GatewayIntents::DIRECT_MESSAGES
            | GatewayIntents::MESSAGE_CONTENT;

        let handler = Handler {
            tx: self.inbound_tx.clone(),
        };
        let mut client = Client::builder(&self.token, intents)
            .event_handler(handler)
            .await
            .map_err(|e| Error::Transport(format!("discord client: {e}")))?;

        *self.http.lock() = Some(Arc::clone(&client.http));
        *self.shard_manager.lock() = Some(Arc::clone(&client.shard_manager));

        tokio::spawn(async move {
            if let Err(e) = client.start().await {
                tracing::error!(error = %e, "discord gateway stopped");
            }
        });
        Ok(())
    }

    async fn stop(&self) {
        let manager = self.shard_manager.lock().take();
        if let Some(manager) = manager {
            manager.shutdown_all().await;
            tracing::info!("discord gateway shut down");
        }
    }

    async fn send(&self, channel_id: &str, content: &str) -> Result<()> {
        let http = self.http()?;
        let channel = self.channel(channel_id)?;
        for chunk in chunk_message(content, CHUNK_LIMIT) {
            channel
                .say(http.as_ref(), chunk)
                .await
                .map_err(|e| Error::Transport(format!("discord send: {e}")))?;
        }
        Ok(())
    }

    async fn send_file(&self, channel_id: &str, filename: &str, bytes: &[u8]) -> Result<()> {
        let http = self.http()?;
        let channel = self.channel(channel_id)?;
        let attachment = CreateAttachment::bytes(bytes.to_vec(), filename);
        channel
            .send_message(http.as_ref(), CreateMessage::new().add_file(attachment))
            .await
            .map_err(|e| Error::Transport(format!("discord file send: {e}")))?;
        Ok(())
    }

    fn take_messages(&self) -> Option<mpsc::Receiver<InboundMessage>> {
        self.inbound_rx.lock().take()
    }
}

/// Split `content` into chunks of at most `limit` bytes, preferring line
/// boundaries and hard-splitting single overlong lines on char
/// boundaries.
fn chunk_message(content: &str, limit: usize) -> Vec<String> {
    if content.len() <= limit {
        return vec![content.to_string()];
    }

    let mut chunks = Vec::new();
    let mut current = String::new();
    for line in content.split_inclusive('\n') {
        if current.len() + line.len() > limit && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
        }
        if line.len() > limit {
            let mut rest = line;
            while rest.len() > limit {
                let mut cut = limit;
                while !rest.is_char_boundary(cut) {
                    cut -= 1;
                }
                chunks.push(rest[..cut].to_string());
                rest = &rest[cut..];
            }
            current.push_str(rest);
        } else {
            current.push_str(line);
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}
