use std::sync::Arc;
use std::time::Duration;

use serenity::async_trait;
use serenity::model::id::UserId;
use tokio::sync::{oneshot, Mutex, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn};
use tracing_futures::Instrument;

use crate::models::{ResolvedSource, Track};
use crate::music::controller::{QueuePosition, StreamController};
use crate::music::error::{MusicError, Result};
use crate::music::library::{LibrarySource, SharedLibrary};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Turns a user reference into track metadata. May be slow; never called under a guild lock.
#[async_trait]
pub trait TrackSource: Send + Sync {
    async fn resolve(&self, reference: &str) -> Result<ResolvedSource>;

    async fn resolve_playlist(&self, url: &str) -> Result<Vec<ResolvedSource>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Track,
    Playlist,
}

#[derive(Debug, Clone)]
pub struct ResolveRequest {
    pub reference: String,
    pub kind: RequestKind,
    pub submitter: UserId,
    /// Set by `play`: wakes a stopped controller once the track lands.
    pub start: bool,
}

#[derive(Debug, Clone)]
pub struct Resolved {
    pub tracks: Vec<Track>,
    pub position: QueuePosition,
}

pub struct ResolutionTicket(oneshot::Receiver<Result<Resolved>>);

impl ResolutionTicket {
    pub async fn outcome(self) -> Result<Resolved> {
        self.0
            .await
            .unwrap_or_else(|_| {
                Err(MusicError::ResolutionFailure("resolver task died".to_string()))
            })
    }
}

pub fn default_pool_size() -> usize {
    std::thread::available_parallelism().map(|cores| cores.get()).unwrap_or(1) + 1
}

/// Bounded pool of resolutions running beside, never inside, the guild locks.
pub struct SourceResolver {
    source: Arc<dyn TrackSource>,
    permits: Arc<Semaphore>,
    timeout: Duration,
}

impl SourceResolver {
    pub fn new(source: Arc<dyn TrackSource>, pool_size: usize, timeout: Duration) -> Self {
        SourceResolver {
            source,
            permits: Arc::new(Semaphore::new(pool_size.max(1))),
            timeout,
        }
    }

    /// Starts resolving right away. On success the tracks are queued and
    /// added to the library in one critical section.
    pub async fn submit(
        &self,
        request: ResolveRequest,
        controller: Arc<Mutex<StreamController>>,
        library: Arc<SharedLibrary>,
    ) -> ResolutionTicket {
        let token = controller.lock().await.resolution_token();
        let (sender, receiver) = oneshot::channel();

        let source = self.source.clone();
        let permits = self.permits.clone();
        let timeout = self.timeout;
        let span = info_span!(
            "resolve",
            reference = %request.reference,
            submitter = %request.submitter
        );

        let task = async move {
            let fetched = fetch(source, permits, timeout, &token, &request).await;

            let outcome = match fetched {
                Ok(sources) => apply(&controller, &library, &token, sources, &request).await,
                Err(why) => Err(why),
            };

            match &outcome {
                Ok(resolved) => info!("Resolved {} track(s)", resolved.tracks.len()),
                Err(why) => warn!("Resolution failed: {why}"),
            }

            // the requester may have gone away; the queue is already updated
            let _ = sender.send(outcome);
        };

        tokio::spawn(task.instrument(span));

        ResolutionTicket(receiver)
    }
}

async fn fetch(
    source: Arc<dyn TrackSource>,
    permits: Arc<Semaphore>,
    timeout: Duration,
    token: &CancellationToken,
    request: &ResolveRequest,
) -> Result<Vec<ResolvedSource>> {
    let _permit = tokio::select! {
        _ = token.cancelled() => return Err(MusicError::Cancelled),
        permit = permits.acquire_owned() => permit
            .map_err(|_| MusicError::ResolutionFailure("resolver pool closed".to_string()))?,
    };

    debug!("Resolver permit acquired");

    let kind = request.kind;
    let reference = request.reference.clone();
    let mut work = tokio::spawn(async move {
        match kind {
            RequestKind::Track => source.resolve(&reference).await.map(|resolved| vec![resolved]),
            RequestKind::Playlist => source.resolve_playlist(&reference).await,
        }
    });

    let finished = tokio::select! {
        _ = token.cancelled() => Err(MusicError::Cancelled),
        finished = tokio::time::timeout(timeout, &mut work) => finished.map_err(|_| {
            MusicError::ResolutionFailure(format!("timed out after {}s", timeout.as_secs()))
        }),
    };

    let sources = match finished {
        Err(why) => {
            // the permit is only released once the backend work is really gone
            work.abort();
            let _ = work.await;
            return Err(why);
        }
        Ok(Err(join_error)) => {
            return Err(MusicError::ResolutionFailure(format!("resolver crashed: {join_error}")))
        }
        Ok(Ok(sources)) => sources?,
    };

    match kind {
        RequestKind::Track => {
            if sources.iter().any(|source| source.is_live) {
                return Err(MusicError::UnsupportedLiveSource);
            }
        }
        RequestKind::Playlist => {
            let playable = sources.iter().filter(|source| !source.is_live).count();
            if playable == 0 {
                return Err(MusicError::ResolutionFailure(
                    "playlist has no playable entries".to_string(),
                ));
            }
        }
    }

    Ok(sources.into_iter().filter(|source| !source.is_live).collect())
}

async fn apply(
    controller: &Mutex<StreamController>,
    library: &SharedLibrary,
    token: &CancellationToken,
    sources: Vec<ResolvedSource>,
    request: &ResolveRequest,
) -> Result<Resolved> {
    let tracks: Vec<Track> = sources
        .into_iter()
        .map(|source| Track::new(source, request.submitter))
        .collect();

    // controller before library, always
    let mut queue = controller.lock().await;
    let mut catalog = library.lock().await;

    let mut position = None;
    for track in &tracks {
        let queued = queue.accept_resolved(track.clone(), token, request.start)?;
        position.get_or_insert(queued);
    }
    for track in &tracks {
        catalog.upsert(track.title.clone(), LibrarySource::from(track));
    }

    drop(catalog);
    drop(queue);

    library.persist().await;

    let position =
        position.ok_or_else(|| MusicError::ResolutionFailure("nothing to queue".to_string()))?;

    Ok(Resolved { tracks, position })
}


#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::testing::{source, FakeSource};
    use super::*;
    use crate::models::Caller;
    use crate::music::authority::AuthorityResolver;
    use crate::music::controller::DEFAULT_VOLUME;

    fn request(reference: &str) -> ResolveRequest {
        ResolveRequest {
            reference: reference.to_string(),
            kind: RequestKind::Track,
            submitter: UserId(1),
            start: false,
        }
    }

    type Setup = (SourceResolver, Arc<Mutex<StreamController>>, Arc<SharedLibrary>);

    fn setup(source: FakeSource, pool: usize) -> Setup {
        (
            SourceResolver::new(Arc::new(source), pool, DEFAULT_TIMEOUT),
            Arc::new(Mutex::new(StreamController::new(DEFAULT_VOLUME))),
            Arc::new(SharedLibrary::in_memory()),
        )
    }

    #[tokio::test]
    async fn resolved_track_is_queued_and_catalogued() {
        let (resolver, controller, library) = setup(FakeSource::with_tracks(&["song"]), 2);

        let resolved = resolver
            .submit(request("song"), controller.clone(), library.clone())
            .await
            .outcome()
            .await
            .unwrap();

        assert_eq!(resolved.position, QueuePosition::NowPlaying);
        assert_eq!(resolved.tracks[0].submitter, UserId(1));
        assert_eq!(controller.lock().await.current().unwrap().title, "song");
        assert!(library.lock().await.find("song").is_some());
    }

    #[tokio::test]
    async fn live_source_leaves_queue_and_library_untouched() {
        let fake = FakeSource::default().with_live("live-stream-ref");
        let (resolver, controller, library) = setup(fake, 2);

        let outcome = resolver
            .submit(request("live-stream-ref"), controller.clone(), library.clone())
            .await
            .outcome()
            .await;

        assert_eq!(outcome.unwrap_err(), MusicError::UnsupportedLiveSource);
        assert!(controller.lock().await.snapshot().current.is_none());
        assert!(library.lock().await.is_empty());
    }

    #[tokio::test]
    async fn malformed_reference_reports_diagnostic() {
        let (resolver, controller, library) = setup(FakeSource::default(), 2);

        let outcome = resolver
            .submit(request("not a url"), controller.clone(), library.clone())
            .await
            .outcome()
            .await;

        match outcome {
            Err(MusicError::ResolutionFailure(message)) => {
                assert!(message.contains("unsupported URL"))
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert!(library.lock().await.is_empty());
    }

    #[tokio::test]
    async fn crashing_backend_does_not_stall_the_pool() {
        let (resolver, controller, library) = setup(FakeSource::with_tracks(&["fine"]), 1);

        let crashed = resolver
            .submit(request("panic"), controller.clone(), library.clone())
            .await
            .outcome()
            .await;
        assert!(matches!(crashed, Err(MusicError::ResolutionFailure(_))));

        let next = resolver
            .submit(request("fine"), controller.clone(), library.clone())
            .await
            .outcome()
            .await;
        assert!(next.is_ok());
    }

    #[tokio::test]
    async fn slow_backend_times_out() {
        let mut fake = FakeSource::with_tracks(&["slow"]);
        fake.delay = Some(Duration::from_secs(5));
        let resolver = SourceResolver::new(Arc::new(fake), 1, Duration::from_millis(50));
        let controller = Arc::new(Mutex::new(StreamController::new(DEFAULT_VOLUME)));
        let library = Arc::new(SharedLibrary::in_memory());

        let outcome = resolver.submit(request("slow"), controller, library).await.outcome().await;

        match outcome {
            Err(MusicError::ResolutionFailure(message)) => assert!(message.contains("timed out")),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[tokio::test]
    async fn clear_abandons_in_flight_resolution() {
        let mut fake = FakeSource::with_tracks(&["late"]);
        fake.delay = Some(Duration::from_millis(200));
        let (resolver, controller, library) = setup(fake, 2);
        let authority = AuthorityResolver::new([UserId(1)], []);

        let ticket = resolver.submit(request("late"), controller.clone(), library.clone()).await;
        controller.lock().await.clear(&Caller::new(UserId(1)), &authority).unwrap();

        assert_eq!(ticket.outcome().await.unwrap_err(), MusicError::Cancelled);
        assert!(controller.lock().await.snapshot().current.is_none());
        assert!(library.lock().await.is_empty());
    }

    #[tokio::test]
    async fn cancelled_resolution_frees_its_slot_only_when_the_backend_stops() {
        let mut fake = FakeSource::with_tracks(&["a", "b"]);
        fake.delay = Some(Duration::from_millis(300));
        let fake = Arc::new(fake);
        let resolver = SourceResolver::new(fake.clone(), 1, DEFAULT_TIMEOUT);
        let controller = Arc::new(Mutex::new(StreamController::new(DEFAULT_VOLUME)));
        let library = Arc::new(SharedLibrary::in_memory());
        let authority = AuthorityResolver::new([UserId(1)], []);

        let first = resolver.submit(request("a"), controller.clone(), library.clone()).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        controller.lock().await.clear(&Caller::new(UserId(1)), &authority).unwrap();
        let second = resolver.submit(request("b"), controller.clone(), library.clone()).await;

        assert_eq!(first.outcome().await.unwrap_err(), MusicError::Cancelled);
        second.outcome().await.unwrap();

        assert_eq!(fake.peak.load(Ordering::SeqCst), 1);
        assert_eq!(fake.in_flight.load(Ordering::SeqCst), 0);
        assert_eq!(controller.lock().await.current().unwrap().title, "b");
        assert!(library.lock().await.find("a").is_none());
    }

    #[tokio::test]
    async fn pool_bounds_concurrent_resolutions() {
        let titles: Vec<String> = (0..6).map(|i| format!("t{i}")).collect();
        let refs: Vec<&str> = titles.iter().map(String::as_str).collect();
        let mut fake = FakeSource::with_tracks(&refs);
        fake.delay = Some(Duration::from_millis(30));
        let fake = Arc::new(fake);
        let resolver = SourceResolver::new(fake.clone(), 2, DEFAULT_TIMEOUT);
        let controller = Arc::new(Mutex::new(StreamController::new(DEFAULT_VOLUME)));
        let library = Arc::new(SharedLibrary::in_memory());

        let mut tickets = Vec::new();
        for title in &titles {
            let ticket = resolver.submit(request(title), controller.clone(), library.clone());
            tickets.push(ticket.await);
        }
        for ticket in tickets {
            ticket.outcome().await.unwrap();
        }

        assert!(fake.peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(library.lock().await.len(), 6);
        let snapshot = controller.lock().await.snapshot();
        assert_eq!(snapshot.pending.len() + usize::from(snapshot.current.is_some()), 6);
    }

    #[tokio::test]
    async fn playlist_entries_are_queued_together() {
        let mut fake = FakeSource::default();
        fake.playlists.insert(
            "https://example.com/list".to_string(),
            vec![source("a"), source("b"), source("c")],
        );
        let (resolver, controller, library) = setup(fake, 2);
        let mut playlist = request("https://example.com/list");
        playlist.kind = RequestKind::Playlist;

        let resolved = resolver
            .submit(playlist, controller.clone(), library.clone())
            .await
            .outcome()
            .await
            .unwrap();

        assert_eq!(resolved.tracks.len(), 3);
        let snapshot = controller.lock().await.snapshot();
        assert_eq!(snapshot.current.unwrap().title, "a");
        assert_eq!(snapshot.pending.len(), 2);
        assert_eq!(library.lock().await.len(), 3);
    }

    #[test]
    fn pool_size_exceeds_core_count() {
        assert!(default_pool_size() >= 2);
    }
}
