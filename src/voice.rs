use std::sync::{Arc, Mutex as StdMutex};

use serenity::async_trait;
use serenity::model::id::{ChannelId, GuildId};
use songbird::tracks::TrackHandle;
use songbird::{ytdl, Event, EventContext, EventHandler as VoiceEventHandler, Songbird, TrackEvent};
use tokio::sync::oneshot;
use tracing::info;

use crate::models::Track;
use crate::music::error::{MusicError, Result};
use crate::music::player::{AudioSink, PlaybackHandle, StartedTrack, VoiceConnector};

/// Voice connections through the songbird manager registered with the client.
pub struct SongbirdVoice {
    manager: Arc<Songbird>,
}

impl SongbirdVoice {
    pub fn new(manager: Arc<Songbird>) -> Self {
        SongbirdVoice { manager }
    }
}

#[async_trait]
impl VoiceConnector for SongbirdVoice {
    async fn join(&self, guild_id: GuildId, channel_id: ChannelId) -> Result<()> {
        let (handler_lock, joined) = self.manager.join(guild_id, channel_id).await;
        joined.map_err(|why| {
            MusicError::Voice(format!("Could not join <#{}>: {why}", channel_id.0))
        })?;

        let mut handler = handler_lock.lock().await;
        if handler.is_deaf() {
            info!("Already deafen!")
        } else if let Err(why) = handler.deafen(true).await {
            info!("Deafen failed due to {why:?}")
        }

        Ok(())
    }

    async fn leave(&self, guild_id: GuildId) -> Result<()> {
        if self.manager.get(guild_id).is_none() {
            return Err(MusicError::NotInVoiceChannel);
        }

        self.manager
            .remove(guild_id)
            .await
            .map_err(|why| MusicError::Voice(format!("Failed: {why:?}")))
    }

    async fn is_connected(&self, guild_id: GuildId) -> bool {
        match self.manager.get(guild_id) {
            Some(handler_lock) => handler_lock.lock().await.current_channel().is_some(),
            None => false,
        }
    }

    fn sink(&self, guild_id: GuildId) -> Arc<dyn AudioSink> {
        Arc::new(SongbirdSink {
            manager: self.manager.clone(),
            guild_id,
        })
    }
}

struct SongbirdSink {
    manager: Arc<Songbird>,
    guild_id: GuildId,
}

#[async_trait]
impl AudioSink for SongbirdSink {
    async fn start(&self, track: &Track, volume: f32) -> Result<StartedTrack> {
        let handler_lock = self.manager.get(self.guild_id).ok_or(MusicError::NotInVoiceChannel)?;

        let source = ytdl(&track.url).await.map_err(|why| {
            MusicError::ResolutionFailure(format!(
                "Could not play {} due to error {why}",
                track.title
            ))
        })?;

        let track_handle = {
            let mut handler = handler_lock.lock().await;
            handler.play_source(source)
        };

        let (sender, finished) = oneshot::channel();
        track_handle
            .add_event(
                Event::Track(TrackEvent::End),
                SongEndNotifier {
                    guild_id: self.guild_id,
                    sender: StdMutex::new(Some(sender)),
                },
            )
            .map_err(|why| MusicError::Voice(format!("Add event END failed: {why}")))?;

        if let Err(why) = track_handle.set_volume(volume) {
            info!("Could not set volume on {}: {why}", track.title);
        }

        Ok(StartedTrack {
            handle: Box::new(track_handle),
            finished,
        })
    }
}

impl PlaybackHandle for TrackHandle {
    fn pause(&self) -> Result<()> {
        TrackHandle::pause(self).map_err(|why| MusicError::Voice(why.to_string()))
    }

    fn resume(&self) -> Result<()> {
        self.play().map_err(|why| MusicError::Voice(why.to_string()))
    }

    fn stop(&self) {
        if let Err(why) = TrackHandle::stop(self) {
            info!("Stopping a finished track: {why}");
        }
    }

    fn set_volume(&self, volume: f32) {
        if let Err(why) = TrackHandle::set_volume(self, volume) {
            info!("Setting volume on a finished track: {why}");
        }
    }
}

struct SongEndNotifier {
    guild_id: GuildId,
    sender: StdMutex<Option<oneshot::Sender<()>>>,
}

#[async_trait]
impl VoiceEventHandler for SongEndNotifier {
    async fn act(&self, _ctx: &EventContext<'_>) -> Option<Event> {
        info!("End notifier triggered for guild {}", self.guild_id.0);

        let sender = self.sender.lock().ok().and_then(|mut sender| sender.take());
        if let Some(sender) = sender {
            let _ = sender.send(());
        }

        None
    }
}
