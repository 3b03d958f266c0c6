//! Playback session: the ordered track queue, favorite-state
//! propagation and play-duration tracking.
//!
//! The session is an explicit owned context rather than module-level
//! state: one instance is shared by every UI surface, and all mutation
//! goes through its API, which notifies subscribers synchronously
//! after each change.

use std::sync::Arc;
use std::thread;
use std::time::{Instant, SystemTime};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::generator::OutputMode;
use crate::io::{FavoriteSink, PlayEvent, PlayEventSink};
use crate::playback::PlayRequest;

/// One entry in the session playlist.
#[derive(Debug, Clone)]
pub struct Track {
    /// Owning post id
    pub id: u64,
    /// Expression source text
    pub expression: String,
    /// Output mode
    pub mode: OutputMode,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Pre-rendered asset URL, if available
    pub prerendered_url: Option<String>,
    /// Asset freshness for decode-cache invalidation
    pub asset_updated_at: Option<SystemTime>,
    /// Whether the current user has favorited this track
    pub favorited: bool,
    /// Total favorite count
    pub favorite_count: u64,
}

impl Track {
    /// Build the engine request for this track.
    pub fn play_request(&self) -> PlayRequest {
        PlayRequest {
            expression: self.expression.clone(),
            mode: self.mode,
            sample_rate: self.sample_rate,
            prerendered_url: self.prerendered_url.clone(),
            asset_updated_at: self.asset_updated_at,
        }
    }
}

/// Notification published to session subscribers after each mutation.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The playlist was replaced
    PlaylistChanged,
    /// The current track changed (None when the list is empty)
    TrackChanged(Option<u64>),
    /// A track's favorite state was updated in place
    FavoriteChanged {
        track_id: u64,
        favorited: bool,
        count: u64,
    },
}

type SessionSubscriber = Box<dyn Fn(&SessionEvent) + Send + Sync>;

struct TrackingRecord {
    post_id: u64,
    started_at: Instant,
}

struct SessionState {
    playlist: Vec<Track>,
    current: Option<usize>,
    tracking: Option<TrackingRecord>,
}

/// The shared playback session.
pub struct PlaybackSession {
    state: Mutex<SessionState>,
    subscribers: Mutex<Vec<Arc<dyn Fn(&SessionEvent) + Send + Sync>>>,
    play_sink: Option<Arc<dyn PlayEventSink>>,
    favorite_sink: Option<Box<dyn FavoriteSink>>,
    user_id: Option<u64>,
}

impl PlaybackSession {
    /// Create an empty session. Sinks are optional so anonymous or
    /// offline sessions still play.
    pub fn new(
        play_sink: Option<Box<dyn PlayEventSink>>,
        favorite_sink: Option<Box<dyn FavoriteSink>>,
        user_id: Option<u64>,
    ) -> Self {
        PlaybackSession {
            state: Mutex::new(SessionState {
                playlist: Vec::new(),
                current: None,
                tracking: None,
            }),
            subscribers: Mutex::new(Vec::new()),
            play_sink: play_sink.map(Arc::from),
            favorite_sink,
            user_id,
        }
    }

    /// Subscribe to session mutations. Subscribers are called
    /// synchronously, in subscription order, after each change, and may
    /// call back into the session.
    pub fn subscribe(&self, subscriber: SessionSubscriber) {
        self.subscribers.lock().push(Arc::from(subscriber));
    }

    fn publish(&self, event: SessionEvent) {
        // Snapshot first so callbacks run outside the lock; a
        // subscriber re-entering the session must not deadlock.
        let subscribers: Vec<_> = self.subscribers.lock().iter().map(Arc::clone).collect();
        for subscriber in &subscribers {
            subscriber(&event);
        }
    }

    /// Replace the playlist. The current index points at the track
    /// matching `start_id`, falling back to 0 when absent and `None`
    /// for an empty list.
    pub fn set_playlist(&self, tracks: Vec<Track>, start_id: Option<u64>) {
        let current_id;
        {
            let mut state = self.state.lock();
            state.current = if tracks.is_empty() {
                None
            } else {
                Some(
                    start_id
                        .and_then(|id| tracks.iter().position(|t| t.id == id))
                        .unwrap_or(0),
                )
            };
            state.playlist = tracks;
            current_id = state.current.map(|i| state.playlist[i].id);
        }
        self.publish(SessionEvent::PlaylistChanged);
        self.publish(SessionEvent::TrackChanged(current_id));
    }

    /// The current track, if any.
    pub fn current(&self) -> Option<Track> {
        let state = self.state.lock();
        state.current.map(|i| state.playlist[i].clone())
    }

    /// Number of tracks in the playlist.
    pub fn len(&self) -> usize {
        self.state.lock().playlist.len()
    }

    /// True when the playlist is empty.
    pub fn is_empty(&self) -> bool {
        self.state.lock().playlist.is_empty()
    }

    /// Advance to the next track, clamped at the end of the list.
    pub fn next(&self) -> Option<Track> {
        self.step(1)
    }

    /// Step back to the previous track, clamped at the start.
    pub fn prev(&self) -> Option<Track> {
        self.step(-1)
    }

    fn step(&self, delta: isize) -> Option<Track> {
        let (track, id) = {
            let mut state = self.state.lock();
            let index = state.current?;
            let last = state.playlist.len().saturating_sub(1);
            let next = index.saturating_add_signed(delta).min(last);
            state.current = Some(next);
            (state.playlist[next].clone(), state.playlist[next].id)
        };
        self.publish(SessionEvent::TrackChanged(Some(id)));
        Some(track)
    }

    /// Update a playlist entry's favorite state in place, so every
    /// surface sharing this session reflects the change without a
    /// re-fetch. No-op when the track isn't in the playlist.
    pub fn update_favorite_state(&self, track_id: u64, favorited: bool, count: u64) {
        let found = {
            let mut state = self.state.lock();
            match state.playlist.iter_mut().find(|t| t.id == track_id) {
                Some(track) => {
                    track.favorited = favorited;
                    track.favorite_count = count;
                    true
                }
                None => false,
            }
        };
        if found {
            self.publish(SessionEvent::FavoriteChanged {
                track_id,
                favorited,
                count,
            });
        }
    }

    /// Toggle the current user's favorite on a track: update the local
    /// state immediately, then tell the sink. Sink failures are logged
    /// and swallowed, the local state stands either way.
    pub fn toggle_favorite(&self, track_id: u64) {
        let target = {
            let state = self.state.lock();
            state
                .playlist
                .iter()
                .find(|t| t.id == track_id)
                .map(|t| (!t.favorited, t.favorite_count))
        };
        let Some((favorited, count)) = target else {
            return;
        };
        let count = if favorited {
            count + 1
        } else {
            count.saturating_sub(1)
        };
        self.update_favorite_state(track_id, favorited, count);

        if let (Some(sink), Some(user_id)) = (&self.favorite_sink, self.user_id) {
            if let Err(err) = sink.set_favorite(user_id, track_id, favorited) {
                warn!(track_id, error = %err, "favorite sink update failed");
            }
        }
    }

    /// Record that playback of `post_id` started now. An active record
    /// for a different post is flushed first, so records never overlap.
    pub fn start_tracking(&self, post_id: u64) {
        self.stop_tracking();
        self.state.lock().tracking = Some(TrackingRecord {
            post_id,
            started_at: Instant::now(),
        });
    }

    /// Finalize the active tracking record, if any. Emits a play event
    /// when at least one whole second elapsed; shorter plays are
    /// dropped. Emission is fire-and-forget on a detached thread, so a
    /// slow or failing sink never stalls the caller.
    pub fn stop_tracking(&self) {
        let record = self.state.lock().tracking.take();
        let Some(record) = record else {
            return;
        };
        let duration_seconds = record.started_at.elapsed().as_secs();
        if duration_seconds < 1 {
            debug!(post_id = record.post_id, "play too short, not recorded");
            return;
        }
        let Some(sink) = &self.play_sink else {
            return;
        };
        let sink = Arc::clone(sink);
        let post_id = record.post_id;
        let event = PlayEvent {
            post_id,
            duration_seconds,
            user_id: self.user_id,
        };
        let spawned = thread::Builder::new()
            .name("bytebeat-play-event".into())
            .spawn(move || {
                if let Err(err) = sink.record(event) {
                    warn!(post_id, error = %err, "play event sink failed");
                }
            });
        if let Err(err) = spawned {
            warn!(post_id, error = %err, "could not emit play event");
        }
    }
}

impl Drop for PlaybackSession {
    fn drop(&mut self) {
        self.stop_tracking();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Result;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn track(id: u64) -> Track {
        Track {
            id,
            expression: "t>>4".into(),
            mode: OutputMode::Uint8,
            sample_rate: 8000,
            prerendered_url: None,
            asset_updated_at: None,
            favorited: false,
            favorite_count: 0,
        }
    }

    fn session() -> PlaybackSession {
        PlaybackSession::new(None, None, None)
    }

    /// Wait for an asynchronously emitted play event to land.
    fn wait_until(cond: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while !cond() {
            assert!(Instant::now() < deadline, "condition not met in time");
            thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn set_playlist_resolves_start_id() {
        let session = session();
        session.set_playlist(vec![track(10), track(20), track(30)], Some(20));
        assert_eq!(session.current().map(|t| t.id), Some(20));

        // Unknown start id falls back to the first track
        session.set_playlist(vec![track(10), track(20)], Some(99));
        assert_eq!(session.current().map(|t| t.id), Some(10));

        session.set_playlist(Vec::new(), Some(10));
        assert!(session.current().is_none());
    }

    #[test]
    fn navigation_clamps_at_both_ends() {
        let session = session();
        session.set_playlist(vec![track(1), track(2), track(3)], None);

        assert_eq!(session.prev().map(|t| t.id), Some(1));
        assert_eq!(session.next().map(|t| t.id), Some(2));
        assert_eq!(session.next().map(|t| t.id), Some(3));
        assert_eq!(session.next().map(|t| t.id), Some(3));
        assert_eq!(session.next().map(|t| t.id), Some(3));
        assert_eq!(session.prev().map(|t| t.id), Some(2));
    }

    #[test]
    fn navigation_on_empty_playlist_returns_none() {
        let session = session();
        assert!(session.next().is_none());
        assert!(session.prev().is_none());
    }

    #[test]
    fn favorite_update_is_in_place_and_published() {
        let session = session();
        session.set_playlist(vec![track(1), track(2)], None);

        let seen = Arc::new(AtomicUsize::new(0));
        let seen_in_sub = Arc::clone(&seen);
        session.subscribe(Box::new(move |event| {
            if matches!(
                event,
                SessionEvent::FavoriteChanged {
                    track_id: 2,
                    favorited: true,
                    count: 5
                }
            ) {
                seen_in_sub.fetch_add(1, Ordering::SeqCst);
            }
        }));

        session.update_favorite_state(2, true, 5);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        session.next();
        let current = session.current().expect("current track");
        assert_eq!(current.id, 2);
        assert!(current.favorited);
        assert_eq!(current.favorite_count, 5);

        // Unknown id publishes nothing
        session.update_favorite_state(99, true, 1);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn toggle_favorite_updates_locally_and_calls_sink() {
        struct RecordingSink(Mutex<Vec<(u64, u64, bool)>>);
        impl FavoriteSink for RecordingSink {
            fn set_favorite(&self, user_id: u64, post_id: u64, favorited: bool) -> Result<()> {
                self.0.lock().push((user_id, post_id, favorited));
                Ok(())
            }
        }
        let sink = Arc::new(RecordingSink(Mutex::new(Vec::new())));
        struct Fwd(Arc<RecordingSink>);
        impl FavoriteSink for Fwd {
            fn set_favorite(&self, user_id: u64, post_id: u64, favorited: bool) -> Result<()> {
                self.0.set_favorite(user_id, post_id, favorited)
            }
        }
        let session =
            PlaybackSession::new(None, Some(Box::new(Fwd(Arc::clone(&sink)))), Some(42));
        session.set_playlist(vec![track(1)], None);

        session.toggle_favorite(1);
        let current = session.current().expect("current track");
        assert!(current.favorited);
        assert_eq!(current.favorite_count, 1);
        assert_eq!(&*sink.0.lock(), &[(42, 1, true)]);

        session.toggle_favorite(1);
        let current = session.current().expect("current track");
        assert!(!current.favorited);
        assert_eq!(current.favorite_count, 0);
    }

    #[test]
    fn tracking_emits_only_after_one_second() {
        struct CountingSink(AtomicUsize, Mutex<Vec<PlayEvent>>);
        impl PlayEventSink for CountingSink {
            fn record(&self, event: PlayEvent) -> Result<()> {
                self.0.fetch_add(1, Ordering::SeqCst);
                self.1.lock().push(event);
                Ok(())
            }
        }

        let sink = Arc::new(CountingSink(AtomicUsize::new(0), Mutex::new(Vec::new())));
        struct Fwd(Arc<CountingSink>);
        impl PlayEventSink for Fwd {
            fn record(&self, event: PlayEvent) -> Result<()> {
                self.0.record(event)
            }
        }
        let session = PlaybackSession::new(Some(Box::new(Fwd(Arc::clone(&sink)))), None, Some(7));

        // Sub-second play is dropped
        session.start_tracking(1);
        session.stop_tracking();
        assert_eq!(sink.0.load(Ordering::SeqCst), 0);

        session.start_tracking(2);
        thread::sleep(Duration::from_millis(1100));
        session.stop_tracking();
        wait_until(|| sink.0.load(Ordering::SeqCst) == 1);
        let events = sink.1.lock();
        assert_eq!(events[0].post_id, 2);
        assert_eq!(events[0].user_id, Some(7));
        assert!(events[0].duration_seconds >= 1);
    }

    #[test]
    fn starting_new_tracking_flushes_previous() {
        struct CollectSink(Mutex<Vec<u64>>);
        impl PlayEventSink for CollectSink {
            fn record(&self, event: PlayEvent) -> Result<()> {
                self.0.lock().push(event.post_id);
                Ok(())
            }
        }

        let sink = Arc::new(CollectSink(Mutex::new(Vec::new())));
        struct Fwd(Arc<CollectSink>);
        impl PlayEventSink for Fwd {
            fn record(&self, event: PlayEvent) -> Result<()> {
                self.0.record(event)
            }
        }
        let session = PlaybackSession::new(Some(Box::new(Fwd(Arc::clone(&sink)))), None, None);

        session.start_tracking(1);
        thread::sleep(Duration::from_millis(1100));
        // Switching tracks without an explicit stop must finalize A
        session.start_tracking(2);
        wait_until(|| !sink.0.lock().is_empty());
        assert_eq!(&*sink.0.lock(), &[1]);
        session.stop_tracking();
        // B was sub-second, no second event
        thread::sleep(Duration::from_millis(100));
        assert_eq!(&*sink.0.lock(), &[1]);
    }

    #[test]
    fn slow_sink_does_not_block_stop_tracking() {
        struct SlowSink(Arc<AtomicUsize>);
        impl PlayEventSink for SlowSink {
            fn record(&self, _event: PlayEvent) -> Result<()> {
                thread::sleep(Duration::from_millis(500));
                self.0.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }

        let recorded = Arc::new(AtomicUsize::new(0));
        let session = PlaybackSession::new(
            Some(Box::new(SlowSink(Arc::clone(&recorded)))),
            None,
            None,
        );
        session.start_tracking(1);
        thread::sleep(Duration::from_millis(1100));

        let before = Instant::now();
        session.stop_tracking();
        // The sink sleeps half a second; the caller must not.
        assert!(before.elapsed() < Duration::from_millis(250));
        wait_until(|| recorded.load(Ordering::SeqCst) == 1);
    }

    #[test]
    fn subscriber_may_reenter_the_session() {
        let session = Arc::new(session());
        let weak = Arc::downgrade(&session);
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_in_sub = Arc::clone(&seen);
        session.subscribe(Box::new(move |event| {
            if matches!(event, SessionEvent::PlaylistChanged) {
                if let Some(session) = weak.upgrade() {
                    // Re-entrant reads and subscription must not deadlock.
                    let _ = session.current();
                    session.subscribe(Box::new(|_| {}));
                }
                seen_in_sub.fetch_add(1, Ordering::SeqCst);
            }
        }));

        session.set_playlist(vec![track(1)], None);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn sink_failure_is_swallowed() {
        struct FailSink;
        impl PlayEventSink for FailSink {
            fn record(&self, _event: PlayEvent) -> Result<()> {
                Err(crate::BytebeatError::Persist("down".into()))
            }
        }
        let session = PlaybackSession::new(Some(Box::new(FailSink)), None, None);
        session.start_tracking(1);
        thread::sleep(Duration::from_millis(1100));
        session.stop_tracking();
    }
}
