use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serenity::model::id::{ChannelId, GuildId, RoleId, UserId};

static NEXT_TRACK_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TrackId(u64);

impl TrackId {
    pub fn next() -> Self {
        TrackId(NEXT_TRACK_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Metadata produced by a `TrackSource` before anyone has queued it.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedSource {
    pub title: String,
    pub url: String,
    pub duration: Option<Duration>,
    pub is_live: bool,
}

/// A resolved track owned by exactly one queue. Never mutated after creation.
#[derive(Debug, Clone)]
pub struct Track {
    pub id: TrackId,
    pub title: String,
    pub url: String,
    pub submitter: UserId,
    pub duration: Option<Duration>,
    pub is_live: bool,
}

impl Track {
    pub fn new(source: ResolvedSource, submitter: UserId) -> Self {
        Track {
            id: TrackId::next(),
            title: source.title,
            url: source.url,
            submitter,
            duration: source.duration,
            is_live: source.is_live,
        }
    }

    pub fn duration_text(&self) -> Option<String> {
        self.duration.map(format_duration)
    }
}

pub fn format_duration(duration: Duration) -> String {
    let seconds = duration.as_secs();
    let minutes = seconds / 60;
    let display_seconds = seconds - (minutes * 60);

    format!("{}:{:0>2}", minutes, display_seconds)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Playing,
    Paused,
    Stopped,
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PlaybackState::Idle => "idle",
            PlaybackState::Playing => "playing",
            PlaybackState::Paused => "paused",
            PlaybackState::Stopped => "stopped",
        };

        f.write_str(name)
    }
}

/// The user issuing a command, as seen by the authority checks.
#[derive(Debug, Clone)]
pub struct Caller {
    pub id: UserId,
    pub roles: Vec<RoleId>,
}

impl Caller {
    #[cfg(test)]
    pub fn new(id: UserId) -> Self {
        Caller { id, roles: Vec::new() }
    }
}

/// Everything the music core needs to know about one inbound command.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub guild: GuildId,
    pub caller: Caller,
    /// Voice channel the caller currently sits in.
    pub voice_channel: Option<ChannelId>,
    /// Non-bot members connected to the bot's voice channel right now.
    pub listeners: usize,
}
