use std::collections::HashMap;
use std::sync::Arc;

use serenity::model::id::GuildId;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::music::controller::StreamController;
use crate::music::player::{run_playback, AudioSink};

/// One guild's controller plus the playback task feeding its sink.
pub struct GuildSession {
    pub controller: Arc<Mutex<StreamController>>,
    shutdown: CancellationToken,
}

impl GuildSession {
    fn spawn(guild_id: GuildId, volume: f32, sink: Arc<dyn AudioSink>) -> Self {
        let controller = StreamController::new(volume);
        let wake = controller.wake();
        let controller = Arc::new(Mutex::new(controller));
        let shutdown = CancellationToken::new();

        info!("Creating music session for guild {}", guild_id.0);
        tokio::spawn(run_playback(controller.clone(), wake, sink, shutdown.clone()));

        GuildSession { controller, shutdown }
    }

    async fn close(&self) {
        self.controller.lock().await.shutdown();
        self.shutdown.cancel();
    }
}

/// Every guild with an active music session. Guilds never share state.
pub struct GuildSessions {
    sessions: RwLock<HashMap<GuildId, Arc<GuildSession>>>,
    volume: f32,
}

impl GuildSessions {
    pub fn new(volume: f32) -> Self {
        GuildSessions {
            sessions: RwLock::new(HashMap::new()),
            volume,
        }
    }

    pub async fn get(&self, guild_id: GuildId) -> Option<Arc<GuildSession>> {
        self.sessions.read().await.get(&guild_id).cloned()
    }

    pub async fn get_or_create<F>(&self, guild_id: GuildId, sink: F) -> Arc<GuildSession>
    where
        F: FnOnce() -> Arc<dyn AudioSink>,
    {
        if let Some(session) = self.get(guild_id).await {
            return session;
        }

        let mut sessions = self.sessions.write().await;
        sessions
            .entry(guild_id)
            .or_insert_with(|| Arc::new(GuildSession::spawn(guild_id, self.volume, sink())))
            .clone()
    }

    /// Tears the guild's session down. Returns false if there was none.
    pub async fn remove(&self, guild_id: GuildId) -> bool {
        let session = self.sessions.write().await.remove(&guild_id);

        match session {
            Some(session) => {
                info!("Closing music session for guild {}", guild_id.0);
                session.close().await;
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use serenity::model::id::UserId;

    use super::*;
    use crate::models::{PlaybackState, ResolvedSource, Track};
    use crate::music::player::testing::FakeSink;

    fn fake_sink() -> Arc<dyn AudioSink> {
        Arc::new(FakeSink::default())
    }

    fn track(title: &str) -> Track {
        Track::new(
            ResolvedSource {
                title: title.to_string(),
                url: format!("https://example.com/{title}"),
                duration: None,
                is_live: false,
            },
            UserId(1),
        )
    }

    #[tokio::test]
    async fn sessions_are_created_once_per_guild() {
        let sessions = GuildSessions::new(0.25);

        let first = sessions.get_or_create(GuildId(1), fake_sink).await;
        let again = sessions.get_or_create(GuildId(1), fake_sink).await;
        let other = sessions.get_or_create(GuildId(2), fake_sink).await;

        assert!(Arc::ptr_eq(&first, &again));
        assert!(!Arc::ptr_eq(&first, &other));
    }

    #[tokio::test]
    async fn guilds_do_not_share_queues() {
        let sessions = GuildSessions::new(0.25);
        let first = sessions.get_or_create(GuildId(1), fake_sink).await;
        let second = sessions.get_or_create(GuildId(2), fake_sink).await;

        first.controller.lock().await.enqueue(track("only here"), false);

        assert!(second.controller.lock().await.current().is_none());
    }

    #[tokio::test]
    async fn remove_resets_the_controller() {
        let sessions = GuildSessions::new(0.25);
        let session = sessions.get_or_create(GuildId(1), fake_sink).await;
        session.controller.lock().await.enqueue(track("gone"), false);

        assert!(sessions.remove(GuildId(1)).await);

        assert!(sessions.get(GuildId(1)).await.is_none());
        assert_eq!(session.controller.lock().await.state(), PlaybackState::Stopped);
        assert!(!sessions.remove(GuildId(1)).await);
    }
}
