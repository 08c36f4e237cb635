use std::collections::VecDeque;
use std::sync::Arc;

use rand::seq::SliceRandom;
use rand::{thread_rng, Rng};
use serenity::model::id::UserId;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::models::{Caller, PlaybackState, Track};
use crate::music::authority::AuthorityResolver;
use crate::music::error::{MusicError, Result};
use crate::music::player::PlaybackHandle;
use crate::music::vote::VoteSkipTracker;

pub const DEFAULT_VOLUME: f32 = 0.25;

struct NowPlaying {
    track: Track,
    generation: u64,
    cancel: CancellationToken,
    started: bool,
    handle: Option<Box<dyn PlaybackHandle>>,
}

/// What the playback task should stream next.
pub struct PlaybackJob {
    pub track: Track,
    pub generation: u64,
    pub cancel: CancellationToken,
    pub volume: f32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueuePosition {
    NowPlaying,
    /// 1-based position among the pending tracks.
    Queued(usize),
}

#[derive(Debug, Clone)]
pub enum SkipOutcome {
    DjSkipped(Track),
    VotePassed { skipped: Track, votes: usize, required: usize },
    VoteRecorded { votes: usize, required: usize },
}

#[derive(Debug, Clone)]
pub struct QueueSnapshot {
    pub current: Option<Track>,
    pub pending: Vec<Track>,
    pub state: PlaybackState,
    pub shuffle: bool,
    pub repeat: bool,
    pub volume: f32,
    pub votes: usize,
}

/// Playback state of one guild. Every method runs under that guild's lock.
pub struct StreamController {
    queue: VecDeque<Track>,
    current: Option<NowPlaying>,
    state: PlaybackState,
    shuffle: bool,
    repeat: bool,
    volume: f32,
    votes: VoteSkipTracker,
    generation: u64,
    resolutions: CancellationToken,
    wake: Arc<Notify>,
}

impl StreamController {
    pub fn new(volume: f32) -> Self {
        StreamController {
            queue: VecDeque::new(),
            current: None,
            state: PlaybackState::Idle,
            shuffle: false,
            repeat: false,
            volume,
            votes: VoteSkipTracker::new(),
            generation: 0,
            resolutions: CancellationToken::new(),
            wake: Arc::new(Notify::new()),
        }
    }

    pub fn wake(&self) -> Arc<Notify> {
        self.wake.clone()
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn current(&self) -> Option<&Track> {
        self.current.as_ref().map(|now| &now.track)
    }

    pub fn dj(&self) -> Option<UserId> {
        self.current().map(|track| track.submitter)
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    #[cfg(test)]
    pub fn vote_count(&self) -> usize {
        self.votes.count()
    }

    #[cfg(test)]
    pub fn has_live_stream(&self) -> bool {
        self.current.as_ref().map_or(false, |now| now.handle.is_some())
    }

    /// Token for a resolution requested now; `stop`, `clear` and teardown cancel it.
    pub fn resolution_token(&self) -> CancellationToken {
        self.resolutions.child_token()
    }

    /// Appends a resolved track. `start` wakes a stopped controller back up.
    pub fn enqueue(&mut self, track: Track, start: bool) -> QueuePosition {
        if start && self.state == PlaybackState::Stopped {
            self.state = PlaybackState::Idle;
        }

        info!("Queued {} - {} {}", track.title, track.url, track.id);
        self.queue.push_back(track);

        if self.current.is_none() && self.state != PlaybackState::Stopped {
            self.advance();
            return QueuePosition::NowPlaying;
        }

        QueuePosition::Queued(self.queue.len())
    }

    /// Applies a finished resolution unless `stop`/`clear` abandoned it meanwhile.
    pub fn accept_resolved(
        &mut self,
        track: Track,
        token: &CancellationToken,
        start: bool,
    ) -> Result<QueuePosition> {
        if token.is_cancelled() {
            debug!("Dropping cancelled resolution of {}", track.title);
            return Err(MusicError::Cancelled);
        }

        Ok(self.enqueue(track, start))
    }

    /// `play` without a reference: restart a stopped controller with what is queued.
    pub fn start(&mut self) -> Result<()> {
        match self.state {
            PlaybackState::Playing | PlaybackState::Paused => Ok(()),
            PlaybackState::Idle | PlaybackState::Stopped => {
                if self.queue.is_empty() {
                    return Err(MusicError::NotPlaying);
                }

                self.state = PlaybackState::Idle;
                self.advance();

                Ok(())
            }
        }
    }

    pub fn pause(&mut self, caller: &Caller, authority: &AuthorityResolver) -> Result<()> {
        if self.state != PlaybackState::Playing || self.current.is_none() {
            return Err(MusicError::NotPlaying);
        }
        self.require_dj(caller, authority)?;

        if let Some(handle) = self.current.as_ref().and_then(|now| now.handle.as_ref()) {
            handle.pause()?;
        }
        self.state = PlaybackState::Paused;

        Ok(())
    }

    pub fn resume(&mut self, caller: &Caller, authority: &AuthorityResolver) -> Result<()> {
        if self.state != PlaybackState::Paused || self.current.is_none() {
            return Err(MusicError::NotPlaying);
        }
        self.require_dj(caller, authority)?;

        match self.current.as_ref().and_then(|now| now.handle.as_ref()) {
            Some(handle) => handle.resume()?,
            // paused before the stream came up; let the playback task start it
            None => self.wake.notify_one(),
        }
        self.state = PlaybackState::Playing;

        Ok(())
    }

    pub fn stop(&mut self, caller: &Caller, authority: &AuthorityResolver) -> Result<()> {
        if self.current.is_none() {
            return Err(MusicError::NotPlaying);
        }
        self.require_dj(caller, authority)?;

        self.reset(PlaybackState::Stopped);

        Ok(())
    }

    pub fn clear(&mut self, caller: &Caller, authority: &AuthorityResolver) -> Result<()> {
        self.require_dj(caller, authority)?;

        self.reset(PlaybackState::Idle);

        Ok(())
    }

    /// Drops everything without an authority check; used when the guild session ends.
    pub fn shutdown(&mut self) {
        self.reset(PlaybackState::Stopped);
    }

    pub fn skip(
        &mut self,
        caller: &Caller,
        authority: &AuthorityResolver,
        listeners: usize,
    ) -> Result<SkipOutcome> {
        let current = match &self.current {
            Some(now) => &now.track,
            None => return Err(MusicError::NotPlaying),
        };

        if authority.is_dj(caller, Some(current)) {
            let skipped = current.clone();
            info!("DJ {} skipped {}", caller.id, skipped.title);
            self.advance();

            return Ok(SkipOutcome::DjSkipped(skipped));
        }

        let votes = self.votes.vote_skip(caller.id)?;
        let required = VoteSkipTracker::threshold(listeners);

        if self.votes.should_skip(listeners) {
            let skipped = current.clone();
            info!("Vote passed ({votes}/{required}), skipping {}", skipped.title);
            self.advance();

            Ok(SkipOutcome::VotePassed { skipped, votes, required })
        } else {
            debug!("Skip vote {votes}/{required} for {}", current.title);

            Ok(SkipOutcome::VoteRecorded { votes, required })
        }
    }

    pub fn set_shuffle(
        &mut self,
        caller: &Caller,
        authority: &AuthorityResolver,
        enabled: bool,
    ) -> Result<()> {
        self.require_dj(caller, authority)?;

        if enabled && !self.shuffle {
            self.queue.make_contiguous().shuffle(&mut thread_rng());
        }
        self.shuffle = enabled;

        Ok(())
    }

    pub fn shuffle(&self) -> bool {
        self.shuffle
    }

    pub fn set_repeat(&mut self, enabled: bool) {
        self.repeat = enabled;
    }

    pub fn repeat(&self) -> bool {
        self.repeat
    }

    pub fn set_volume(&mut self, volume: f32) -> Result<()> {
        if !(0.0..=1.0).contains(&volume) {
            return Err(MusicError::InvalidArgument(format!(
                "volume must be between 0.0 and 1.0, got {volume}"
            )));
        }

        self.volume = volume;
        if let Some(handle) = self.current.as_ref().and_then(|now| now.handle.as_ref()) {
            handle.set_volume(volume);
        }

        Ok(())
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            current: self.current().cloned(),
            pending: self.queue.iter().cloned().collect(),
            state: self.state,
            shuffle: self.shuffle,
            repeat: self.repeat,
            volume: self.volume,
            votes: self.votes.count(),
        }
    }

    /// Hands the current track to the playback task, once.
    pub fn next_job(&mut self) -> Option<PlaybackJob> {
        if self.state != PlaybackState::Playing {
            return None;
        }

        let volume = self.volume;
        let now = self.current.as_mut().filter(|now| !now.started)?;
        now.started = true;

        Some(PlaybackJob {
            track: now.track.clone(),
            generation: now.generation,
            cancel: now.cancel.clone(),
            volume,
        })
    }

    /// Binds a started stream to the current track. A stream for a track
    /// that already departed is stopped on the spot.
    pub fn attach(&mut self, generation: u64, handle: Box<dyn PlaybackHandle>) -> bool {
        let paused = self.state == PlaybackState::Paused;

        match self.current.as_mut().filter(|now| now.generation == generation) {
            Some(now) => {
                if paused {
                    if let Err(why) = handle.pause() {
                        warn!("Could not pause freshly started {}: {why}", now.track.title);
                    }
                }
                now.handle = Some(handle);
                true
            }
            None => {
                handle.stop();
                false
            }
        }
    }

    /// Natural end of a stream, or a stream that failed to start.
    pub fn track_finished(&mut self, generation: u64) {
        if self.current.as_ref().map(|now| now.generation) == Some(generation) {
            self.advance();
        }
    }

    /// The sink has nowhere to play: put the track back and wait for `play`.
    pub fn halt(&mut self, generation: u64) {
        if self.current.as_ref().map(|now| now.generation) != Some(generation) {
            return;
        }

        if let Some(track) = self.depart_current() {
            self.queue.push_front(track);
        }
        self.votes.reset();
        self.state = PlaybackState::Stopped;
    }

    fn require_dj(&self, caller: &Caller, authority: &AuthorityResolver) -> Result<()> {
        if authority.is_dj(caller, self.current()) {
            Ok(())
        } else {
            Err(MusicError::Unauthorized)
        }
    }

    fn depart_current(&mut self) -> Option<Track> {
        let departed = self.current.take()?;
        departed.cancel.cancel();
        if let Some(handle) = &departed.handle {
            handle.stop();
        }

        Some(departed.track)
    }

    /// The single track transition: the departing stream is stopped and the
    /// votes are cleared before the next track becomes current.
    fn advance(&mut self) {
        let departed = self.depart_current();
        self.votes.reset();

        if let Some(track) = departed {
            if self.repeat {
                self.queue.push_back(track);
            }
        }

        let next = if self.shuffle && !self.queue.is_empty() {
            let index = thread_rng().gen_range(0..self.queue.len());
            self.queue.remove(index)
        } else {
            self.queue.pop_front()
        };

        match next {
            Some(track) => {
                self.generation += 1;
                debug!("Now playing {} {}", track.title, track.id);
                self.current = Some(NowPlaying {
                    track,
                    generation: self.generation,
                    cancel: CancellationToken::new(),
                    started: false,
                    handle: None,
                });
                self.state = PlaybackState::Playing;
                self.wake.notify_one();
            }
            None => {
                self.state = PlaybackState::Idle;
            }
        }
    }

    fn reset(&mut self, state: PlaybackState) {
        self.depart_current();
        self.queue.clear();
        self.votes.reset();
        self.resolutions.cancel();
        self.resolutions = CancellationToken::new();
        self.state = state;
    }
}
