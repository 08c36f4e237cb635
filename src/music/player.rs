use std::sync::Arc;

use serenity::async_trait;
use tokio::sync::{oneshot, Mutex, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use serenity::model::id::{ChannelId, GuildId};

use crate::models::Track;
use crate::music::controller::StreamController;
use crate::music::error::{MusicError, Result};

/// Control over one track that the sink is currently streaming.
pub trait PlaybackHandle: Send + Sync {
    fn pause(&self) -> Result<()>;
    fn resume(&self) -> Result<()>;
    /// Stops the stream. No further frames of this track reach the channel.
    fn stop(&self);
    fn set_volume(&self, volume: f32);
}

pub struct StartedTrack {
    pub handle: Box<dyn PlaybackHandle>,
    /// Fires once when the track reaches its natural end.
    pub finished: oneshot::Receiver<()>,
}

/// Where decoded audio ends up for one guild.
#[async_trait]
pub trait AudioSink: Send + Sync {
    async fn start(&self, track: &Track, volume: f32) -> Result<StartedTrack>;
}

/// Voice connection management for every guild the bot plays in.
#[async_trait]
pub trait VoiceConnector: Send + Sync {
    async fn join(&self, guild_id: GuildId, channel_id: ChannelId) -> Result<()>;
    async fn leave(&self, guild_id: GuildId) -> Result<()>;
    async fn is_connected(&self, guild_id: GuildId) -> bool;
    fn sink(&self, guild_id: GuildId) -> Arc<dyn AudioSink>;
}

/// Drives the sink for one guild until `shutdown` fires.
pub async fn run_playback(
    controller: Arc<Mutex<StreamController>>,
    wake: Arc<Notify>,
    sink: Arc<dyn AudioSink>,
    shutdown: CancellationToken,
) {
    loop {
        let job = controller.lock().await.next_job();

        let job = match job {
            Some(job) => job,
            None => {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = wake.notified() => {}
                }
                continue;
            }
        };

        info!("Starting {} - {} {}", job.track.title, job.track.url, job.track.id);

        let started = tokio::select! {
            _ = shutdown.cancelled() => break,
            started = sink.start(&job.track, job.volume) => started,
        };

        let StartedTrack { handle, finished } = match started {
            Ok(started) => started,
            Err(MusicError::NotInVoiceChannel) => {
                warn!("Not connected to voice, holding {}", job.track.title);
                controller.lock().await.halt(job.generation);
                continue;
            }
            Err(why) => {
                warn!("Could not play {}: {why}", job.track.title);
                controller.lock().await.track_finished(job.generation);
                continue;
            }
        };

        if !controller.lock().await.attach(job.generation, handle) {
            debug!("{} departed before its stream started", job.track.title);
            continue;
        }

        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = job.cancel.cancelled() => {
                debug!("{} was cancelled", job.track.title);
            }
            result = finished => {
                if result.is_ok() {
                    debug!("{} reached its end", job.track.title);
                }
                controller.lock().await.track_finished(job.generation);
            }
        }
    }

    info!("Playback task shut down");
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;

    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    pub enum SinkEvent {
        Started(String),
        Paused(String),
        Resumed(String),
        Stopped(String),
        Volume(String, f32),
    }

    /// In-memory sink that records every call and lets tests end tracks.
    #[derive(Default)]
    pub struct FakeSink {
        pub events: Arc<StdMutex<Vec<SinkEvent>>>,
        finishers: StdMutex<Vec<(String, oneshot::Sender<()>)>>,
        pub refuse: StdMutex<Option<MusicError>>,
    }

    struct FakeHandle {
        title: String,
        events: Arc<StdMutex<Vec<SinkEvent>>>,
    }

    impl PlaybackHandle for FakeHandle {
        fn pause(&self) -> Result<()> {
            self.events.lock().unwrap().push(SinkEvent::Paused(self.title.clone()));
            Ok(())
        }

        fn resume(&self) -> Result<()> {
            self.events.lock().unwrap().push(SinkEvent::Resumed(self.title.clone()));
            Ok(())
        }

        fn stop(&self) {
            self.events.lock().unwrap().push(SinkEvent::Stopped(self.title.clone()));
        }

        fn set_volume(&self, volume: f32) {
            self.events.lock().unwrap().push(SinkEvent::Volume(self.title.clone(), volume));
        }
    }

    impl FakeSink {
        pub fn events(&self) -> Vec<SinkEvent> {
            self.events.lock().unwrap().clone()
        }

        pub fn handle_for(&self, title: &str) -> Box<dyn PlaybackHandle> {
            Box::new(FakeHandle {
                title: title.to_string(),
                events: self.events.clone(),
            })
        }

        /// Ends the oldest still-running stream of `title` naturally.
        pub fn finish(&self, title: &str) -> bool {
            let mut finishers = self.finishers.lock().unwrap();
            match finishers.iter().position(|(name, _)| name == title) {
                Some(index) => {
                    let (_, sender) = finishers.remove(index);
                    sender.send(()).is_ok()
                }
                None => false,
            }
        }
    }

    #[async_trait]
    impl AudioSink for FakeSink {
        async fn start(&self, track: &Track, _volume: f32) -> Result<StartedTrack> {
            if let Some(why) = self.refuse.lock().unwrap().clone() {
                return Err(why);
            }

            let (sender, finished) = oneshot::channel();
            self.events.lock().unwrap().push(SinkEvent::Started(track.title.clone()));
            self.finishers.lock().unwrap().push((track.title.clone(), sender));

            Ok(StartedTrack {
                handle: self.handle_for(&track.title),
                finished,
            })
        }
    }

    /// Voice connections kept in a map; every guild shares one `FakeSink`.
    #[derive(Default)]
    pub struct FakeVoice {
        pub channels: StdMutex<HashMap<GuildId, ChannelId>>,
        pub sink: Arc<FakeSink>,
    }

    #[async_trait]
    impl VoiceConnector for FakeVoice {
        async fn join(&self, guild_id: GuildId, channel_id: ChannelId) -> Result<()> {
            self.channels.lock().unwrap().insert(guild_id, channel_id);
            Ok(())
        }

        async fn leave(&self, guild_id: GuildId) -> Result<()> {
            match self.channels.lock().unwrap().remove(&guild_id) {
                Some(_) => Ok(()),
                None => Err(MusicError::NotInVoiceChannel),
            }
        }

        async fn is_connected(&self, guild_id: GuildId) -> bool {
            self.channels.lock().unwrap().contains_key(&guild_id)
        }

        fn sink(&self, _guild_id: GuildId) -> Arc<dyn AudioSink> {
            self.sink.clone()
        }
    }
}
