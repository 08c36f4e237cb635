use std::sync::Arc;

use serenity::model::id::GuildId;
use tracing::{debug, info};

use crate::models::{Invocation, PlaybackState, Track};
use crate::music::authority::AuthorityResolver;
use crate::music::commands::{MusicCommand, PlaylistCommand};
use crate::music::controller::{QueuePosition, QueueSnapshot, SkipOutcome};
use crate::music::error::{MusicError, Result};
use crate::music::library::SharedLibrary;
use crate::music::paste::PasteService;
use crate::music::player::VoiceConnector;
use crate::music::resolver::{RequestKind, ResolveRequest, Resolved, SourceResolver};
use crate::music::sessions::{GuildSession, GuildSessions};
use crate::playlists::is_playlist_url;

const MAX_LISTED_TRACKS: usize = 20;

/// Runs music commands against the per-guild sessions and the shared library.
pub struct MusicService {
    sessions: GuildSessions,
    library: Arc<SharedLibrary>,
    resolver: SourceResolver,
    authority: AuthorityResolver,
    paste: Arc<dyn PasteService>,
    voice: Arc<dyn VoiceConnector>,
}

impl MusicService {
    pub fn new(
        default_volume: f32,
        library: Arc<SharedLibrary>,
        resolver: SourceResolver,
        authority: AuthorityResolver,
        paste: Arc<dyn PasteService>,
        voice: Arc<dyn VoiceConnector>,
    ) -> Self {
        MusicService {
            sessions: GuildSessions::new(default_volume),
            library,
            resolver,
            authority,
            paste,
            voice,
        }
    }

    /// Executes one command and returns the reply for the channel.
    pub async fn execute(&self, invocation: &Invocation, command: MusicCommand) -> Result<String> {
        debug!("Guild {} runs {:?}", invocation.guild.0, command);

        match command {
            MusicCommand::Join => self.join(invocation).await,
            MusicCommand::Leave => self.leave(invocation.guild).await,
            MusicCommand::Library => self.library_listing().await,
            MusicCommand::Play(Some(reference)) => {
                self.ensure_voice(invocation).await?;
                self.request(invocation, reference, true).await
            }
            MusicCommand::Play(None) => {
                self.ensure_voice(invocation).await?;
                self.start(invocation).await
            }
            MusicCommand::PlayLibrary(index) => {
                self.ensure_voice(invocation).await?;
                self.play_library_entry(invocation, index).await
            }
            MusicCommand::Add(reference) => self.request(invocation, reference, false).await,
            MusicCommand::Playlist(PlaylistCommand::Load(url)) => {
                self.ensure_voice(invocation).await?;
                self.resolve(invocation, url, RequestKind::Playlist, true).await
            }
            MusicCommand::Playlist(PlaylistCommand::Library) => {
                self.ensure_voice(invocation).await?;
                self.queue_library(invocation).await
            }
            MusicCommand::Dj => {
                let session = self.session(invocation.guild).await;
                let dj = session.controller.lock().await.dj();

                Ok(match dj {
                    Some(user) => format!("**Current DJ**: <@{}>", user.0),
                    None => "Current DJ: (╯°□°）╯︵ ┻━┻".to_string(),
                })
            }
            MusicCommand::Volume(volume) => {
                let session = self.session(invocation.guild).await;
                let mut controller = session.controller.lock().await;

                match volume {
                    Some(volume) => {
                        controller.set_volume(volume)?;
                        Ok(format!("Volume set to **{volume}**"))
                    }
                    None => Ok(format!("Current volume: **{}**", controller.volume())),
                }
            }
            MusicCommand::Now => {
                let session = self.session(invocation.guild).await;
                let snapshot = session.controller.lock().await.snapshot();

                Ok(render_queue(&snapshot))
            }
            MusicCommand::Skip => {
                let session = self.session(invocation.guild).await;
                let outcome =
                    session
                        .controller
                        .lock()
                        .await
                        .skip(&invocation.caller, &self.authority, invocation.listeners)?;

                Ok(match outcome {
                    SkipOutcome::DjSkipped(track) => format!("DJ skipped **{}**!", track.title),
                    SkipOutcome::VotePassed {
                        skipped,
                        votes,
                        required,
                    } => format!("Vote passed {votes}/{required}, skipping **{}**.", skipped.title),
                    SkipOutcome::VoteRecorded { votes, required } => format!(
                        "<@{}> has voted to skip the song! {votes}/{required}",
                        invocation.caller.id.0
                    ),
                })
            }
            MusicCommand::Clear => {
                let session = self.session(invocation.guild).await;
                session.controller.lock().await.clear(&invocation.caller, &self.authority)?;

                Ok("(ノಠ益ಠ)ノ彡┻━┻".to_string())
            }
            MusicCommand::Shuffle(enabled) => {
                let session = self.session(invocation.guild).await;
                let mut controller = session.controller.lock().await;
                let enabled = enabled.unwrap_or(!controller.shuffle());
                controller.set_shuffle(&invocation.caller, &self.authority, enabled)?;

                Ok(if enabled { "Enabled shuffling." } else { "Disabled shuffling." }.to_string())
            }
            MusicCommand::Repeat(enabled) => {
                let session = self.session(invocation.guild).await;
                let mut controller = session.controller.lock().await;
                let enabled = enabled.unwrap_or(!controller.repeat());
                controller.set_repeat(enabled);

                Ok(if enabled {
                    "Enabled music repeat mode."
                } else {
                    "Disabled music repeat mode."
                }
                .to_string())
            }
            MusicCommand::Pause => {
                let session = self.session(invocation.guild).await;
                session.controller.lock().await.pause(&invocation.caller, &self.authority)?;

                Ok("Paused the music.".to_string())
            }
            MusicCommand::Resume => {
                let session = self.session(invocation.guild).await;
                session.controller.lock().await.resume(&invocation.caller, &self.authority)?;

                Ok("Resumed the music.".to_string())
            }
            MusicCommand::Stop => {
                let session = self.session(invocation.guild).await;
                session.controller.lock().await.stop(&invocation.caller, &self.authority)?;

                Ok("Stopped the music.".to_string())
            }
        }
    }

    /// The bot lost its voice connection: drop everything the guild had going.
    pub async fn disconnected(&self, guild_id: GuildId) {
        if self.sessions.remove(guild_id).await {
            info!("Guild {} session closed after voice disconnect", guild_id.0);
        }
    }

    async fn session(&self, guild_id: GuildId) -> Arc<GuildSession> {
        self.sessions
            .get_or_create(guild_id, || self.voice.sink(guild_id))
            .await
    }

    async fn ensure_voice(&self, invocation: &Invocation) -> Result<()> {
        if self.voice.is_connected(invocation.guild).await {
            return Ok(());
        }

        let channel = invocation.voice_channel.ok_or(MusicError::NotInVoiceChannel)?;
        self.voice.join(invocation.guild, channel).await
    }

    async fn join(&self, invocation: &Invocation) -> Result<String> {
        let channel = invocation.voice_channel.ok_or(MusicError::NotInVoiceChannel)?;
        self.voice.join(invocation.guild, channel).await?;
        self.session(invocation.guild).await;

        Ok(format!("Joined voice channel <#{}>.", channel.0))
    }

    async fn leave(&self, guild_id: GuildId) -> Result<String> {
        self.sessions.remove(guild_id).await;
        self.voice.leave(guild_id).await?;

        Ok("Left voice channel".to_string())
    }

    async fn request(
        &self,
        invocation: &Invocation,
        reference: String,
        start: bool,
    ) -> Result<String> {
        let kind = if is_playlist_url(&reference) {
            RequestKind::Playlist
        } else {
            RequestKind::Track
        };

        self.resolve(invocation, reference, kind, start).await
    }

    async fn resolve(
        &self,
        invocation: &Invocation,
        reference: String,
        kind: RequestKind,
        start: bool,
    ) -> Result<String> {
        let session = self.session(invocation.guild).await;
        let request = ResolveRequest {
            reference,
            kind,
            submitter: invocation.caller.id,
            start,
        };

        let resolved = self
            .resolver
            .submit(request, session.controller.clone(), self.library.clone())
            .await
            .outcome()
            .await?;

        Ok(describe_resolved(&resolved))
    }

    async fn start(&self, invocation: &Invocation) -> Result<String> {
        let session = self.session(invocation.guild).await;
        let mut controller = session.controller.lock().await;

        if controller.state() == PlaybackState::Paused {
            controller.resume(&invocation.caller, &self.authority)?;
            return Ok("Resumed the music.".to_string());
        }

        controller.start()?;

        Ok(match controller.current() {
            Some(track) => format!("Playing song [{}]({})", track.title, track.url),
            None => "Playing.".to_string(),
        })
    }

    async fn play_library_entry(&self, invocation: &Invocation, index: usize) -> Result<String> {
        let source = {
            let library = self.library.lock().await;
            if library.is_empty() {
                return Err(MusicError::LibraryEmpty);
            }

            let entry = library.get(index).ok_or_else(|| {
                MusicError::InvalidArgument(format!(
                    "no library entry {index}, the library has entries 0 to {}",
                    library.len() - 1
                ))
            })?;

            entry.source.to_resolved(&entry.title)
        };

        let track = Track::new(source, invocation.caller.id);
        let session = self.session(invocation.guild).await;
        let position = session.controller.lock().await.enqueue(track.clone(), true);

        Ok(describe_track(&track, &position))
    }

    async fn queue_library(&self, invocation: &Invocation) -> Result<String> {
        let sources: Vec<_> = {
            let library = self.library.lock().await;
            library
                .entries()
                .map(|entry| entry.source.to_resolved(&entry.title))
                .collect()
        };

        if sources.is_empty() {
            return Err(MusicError::LibraryEmpty);
        }

        let session = self.session(invocation.guild).await;
        let mut controller = session.controller.lock().await;
        let count = sources.len();
        for source in sources {
            controller.enqueue(Track::new(source, invocation.caller.id), true);
        }

        Ok(format!("Queued {count} tracks from the library."))
    }

    async fn library_listing(&self) -> Result<String> {
        let listing = self.library.lock().await.listing()?;

        listing.publish(self.paste.as_ref()).await
    }
}

fn describe_track(track: &Track, position: &QueuePosition) -> String {
    let duration = track
        .duration_text()
        .map(|duration| format!(" `{duration}`"))
        .unwrap_or_default();

    match position {
        QueuePosition::NowPlaying => {
            format!("Playing song [{}]({}){duration}", track.title, track.url)
        }
        QueuePosition::Queued(position) => {
            format!("Queued **{}**{duration} at position {position}.", track.title)
        }
    }
}

fn describe_resolved(resolved: &Resolved) -> String {
    match resolved.tracks.as_slice() {
        [track] => describe_track(track, &resolved.position),
        tracks => format!("Queued {} tracks from the playlist.", tracks.len()),
    }
}

pub fn render_queue(snapshot: &QueueSnapshot) -> String {
    let mut response = format!("Current music queue has {} entries.\n\n", snapshot.pending.len());

    if let Some(current) = &snapshot.current {
        response.push_str(&format!("**Current song**: {} <{}>", current.title, current.url));
        if snapshot.state != PlaybackState::Playing {
            response.push_str(&format!(" ({})", snapshot.state));
        }
        response.push('\n');
    }

    for (index, track) in snapshot.pending.iter().take(MAX_LISTED_TRACKS).enumerate() {
        response.push_str(&format!("{} - {}\n", index + 1, track.title));
    }

    if snapshot.pending.len() > MAX_LISTED_TRACKS {
        response.push_str(&format!("...and {} more\n", snapshot.pending.len() - MAX_LISTED_TRACKS));
    }

    let mut modes = Vec::new();
    if snapshot.shuffle {
        modes.push("shuffle");
    }
    if snapshot.repeat {
        modes.push("repeat");
    }
    if !modes.is_empty() {
        response.push_str(&format!("Modes: {}\n", modes.join(", ")));
    }

    if snapshot.votes > 0 {
        response.push_str(&format!("Skip votes: {}\n", snapshot.votes));
    }
    response.push_str(&format!("Volume: {}\n", snapshot.volume));

    response
}
