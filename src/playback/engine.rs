//! The live playback engine.
//!
//! One engine instance owns the whole audio path: the graph controls,
//! the sample ring buffer, the currently-compiled program and the
//! play/pause state machine. All mutation goes through its API; there
//! is exactly one audio graph per engine, shared by every call site
//! holding a reference.
//!
//! `toggle` is guarded against re-entry: a second toggle arriving while
//! one is in flight is dropped (`Busy`), never queued, so the graph can
//! never be wired twice or left half-connected.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime};

use parking_lot::Mutex;
use tracing::{debug, warn};

use super::graph::{GraphControls, ANALYSER_WINDOW};
use super::ring_buffer::RingBuffer;
use crate::generator::{OutputMode, SampleGenerator};
use crate::io::{AssetFetcher, GainStore};
use crate::{wav, BytebeatError, Result};

/// Samples produced per chunk on the real-time path.
const CHUNK_SAMPLES: usize = 512;
/// Ring buffer allocation (interleaved stereo samples).
const RING_CAPACITY: usize = 16 * 1024;
/// Cadence of the waveform publisher (~12.5 Hz).
const WAVEFORM_INTERVAL: Duration = Duration::from_millis(80);

/// Engine state machine: stopped or playing, nothing in between
/// survives a `toggle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    /// No playback active
    Stopped,
    /// A source is wired and producing samples
    Playing,
}

/// Which source path a started playback is using.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourcePath {
    /// Decoded pre-rendered buffer
    Prerendered,
    /// Real-time sample generator
    Live,
}

/// Result of a toggle call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleOutcome {
    /// Playback started on the given path
    Started(SourcePath),
    /// Playback was running and has been stopped
    Stopped,
    /// Another toggle was in flight; this one was dropped
    Busy,
}

/// Everything needed to start (or stop) playback of one post.
#[derive(Debug, Clone)]
pub struct PlayRequest {
    /// Expression source text
    pub expression: String,
    /// Output mode
    pub mode: OutputMode,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Pre-rendered asset URL, if the post has one
    pub prerendered_url: Option<String>,
    /// When the asset was last updated, for decode-cache invalidation
    pub asset_updated_at: Option<SystemTime>,
}

/// Waveform windows published to visualization subscribers. `None`
/// is published exactly once when playback stops.
pub type WaveformFrame = Option<[f32; ANALYSER_WINDOW]>;

type WaveformSubscriber = Box<dyn Fn(WaveformFrame) + Send + Sync>;
type DiagnosticsSubscriber = Box<dyn Fn(&str) + Send + Sync>;

#[derive(Clone)]
struct CachedDecode {
    samples: Arc<Vec<f32>>,
    sample_rate: u32,
    decoded_at: SystemTime,
}

enum Source {
    Live { generator: SampleGenerator, t: u64 },
    Buffer { samples: Arc<Vec<f32>>, pos: usize },
}

struct ActivePlayback {
    stop: Arc<AtomicBool>,
    producer: JoinHandle<()>,
    waveform: JoinHandle<()>,
    path: SourcePath,
}

/// The process-wide playback engine. Construct one and share it.
pub struct PlaybackEngine {
    fetcher: Arc<dyn AssetFetcher>,
    gain_store: Option<Arc<dyn GainStore>>,
    controls: Arc<GraphControls>,
    ring: Arc<RingBuffer>,
    toggle_busy: AtomicBool,
    active: Mutex<Option<ActivePlayback>>,
    decode_cache: Mutex<HashMap<String, CachedDecode>>,
    waveform_subs: Arc<Mutex<Vec<WaveformSubscriber>>>,
    diagnostics_subs: Arc<Mutex<Vec<DiagnosticsSubscriber>>>,
}

impl PlaybackEngine {
    /// Build an engine. Master gain is restored from the gain store
    /// when one is supplied, defaulting to full volume.
    pub fn new(
        fetcher: Arc<dyn AssetFetcher>,
        gain_store: Option<Arc<dyn GainStore>>,
    ) -> Result<Self> {
        let initial_gain = gain_store
            .as_ref()
            .and_then(|store| store.load())
            .unwrap_or(1.0);
        Ok(PlaybackEngine {
            fetcher,
            gain_store,
            controls: Arc::new(GraphControls::new(initial_gain)),
            ring: Arc::new(RingBuffer::new(RING_CAPACITY)?),
            toggle_busy: AtomicBool::new(false),
            active: Mutex::new(None),
            decode_cache: Mutex::new(HashMap::new()),
            waveform_subs: Arc::new(Mutex::new(Vec::new())),
            diagnostics_subs: Arc::new(Mutex::new(Vec::new())),
        })
    }

    /// Current state machine position.
    pub fn state(&self) -> PlaybackState {
        if self.active.lock().is_some() {
            PlaybackState::Playing
        } else {
            PlaybackState::Stopped
        }
    }

    /// The ring buffer consumed by the audio output device.
    pub fn ring(&self) -> Arc<RingBuffer> {
        Arc::clone(&self.ring)
    }

    /// Graph gain controls (for UI binding).
    pub fn controls(&self) -> Arc<GraphControls> {
        Arc::clone(&self.controls)
    }

    /// Subscribe to waveform windows. Subscribers receive `Some`
    /// frames at ~12.5 Hz while playing and a single `None` on stop.
    pub fn subscribe_waveform(&self, subscriber: WaveformSubscriber) {
        self.waveform_subs.lock().push(subscriber);
    }

    /// Subscribe to out-of-band runtime diagnostics (per-sample
    /// evaluation failures on the live path).
    pub fn subscribe_diagnostics(&self, subscriber: DiagnosticsSubscriber) {
        self.diagnostics_subs.lock().push(subscriber);
    }

    /// Set the durable user volume, [0, 1].
    pub fn set_master_gain(&self, gain: f32) {
        self.controls.set_master_gain(gain);
        if let Some(store) = &self.gain_store {
            if let Err(err) = store.save(self.controls.master_gain()) {
                warn!(error = %err, "failed to persist master gain");
            }
        }
    }

    /// Set the ephemeral ducking gain, [0, 1]. Not persisted.
    pub fn set_fade_gain(&self, gain: f32) {
        self.controls.set_fade_gain(gain);
    }

    /// Start playback if stopped, stop it if playing.
    ///
    /// Only one toggle may be in flight; concurrent calls return
    /// [`ToggleOutcome::Busy`] without touching the graph. A compile
    /// failure on the live path leaves the engine stopped and is
    /// returned to the caller for diagnostics.
    pub fn toggle(&self, request: &PlayRequest) -> Result<ToggleOutcome> {
        if self
            .toggle_busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(ToggleOutcome::Busy);
        }
        let outcome = self.toggle_locked(request);
        self.toggle_busy.store(false, Ordering::Release);
        outcome
    }

    /// Stop playback unconditionally (idempotent). Used on teardown.
    pub fn stop(&self) {
        if self
            .toggle_busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        self.stop_active(&mut self.active.lock());
        self.toggle_busy.store(false, Ordering::Release);
    }

    fn toggle_locked(&self, request: &PlayRequest) -> Result<ToggleOutcome> {
        let mut active = self.active.lock();
        if active.is_some() {
            self.stop_active(&mut active);
            return Ok(ToggleOutcome::Stopped);
        }

        // Path selection: prefer the pre-rendered asset, fall back to
        // real-time synthesis on any fetch or decode failure.
        let (source, path) = match self.prerendered_source(request) {
            Some(source) => (source, SourcePath::Prerendered),
            None => {
                let mut generator = SampleGenerator::compile(&request.expression, request.mode)
                    .map_err(BytebeatError::Compile)?;
                let subs = Arc::clone(&self.diagnostics_subs);
                generator.set_error_sink(Box::new(move |err| {
                    let message = err.to_string();
                    for subscriber in subs.lock().iter() {
                        subscriber(&message);
                    }
                }));
                (
                    Source::Live {
                        generator,
                        t: 0,
                    },
                    SourcePath::Live,
                )
            }
        };

        let stop = Arc::new(AtomicBool::new(false));

        let producer = {
            let ring = Arc::clone(&self.ring);
            let controls = Arc::clone(&self.controls);
            let stop = Arc::clone(&stop);
            thread::Builder::new()
                .name("bytebeat-producer".into())
                .spawn(move || producer_loop(source, ring, controls, stop))
                .map_err(BytebeatError::Io)?
        };

        let waveform = {
            let controls = Arc::clone(&self.controls);
            let subs = Arc::clone(&self.waveform_subs);
            let stop = Arc::clone(&stop);
            let buffer = match path {
                SourcePath::Prerendered => self
                    .decode_cache
                    .lock()
                    .get(request.prerendered_url.as_deref().unwrap_or(""))
                    .map(|entry| (Arc::clone(&entry.samples), request.sample_rate)),
                SourcePath::Live => None,
            };
            thread::Builder::new()
                .name("bytebeat-waveform".into())
                .spawn(move || waveform_loop(buffer, controls, subs, stop))
                .map_err(BytebeatError::Io)?
        };

        *active = Some(ActivePlayback {
            stop,
            producer,
            waveform,
            path,
        });
        Ok(ToggleOutcome::Started(path))
    }

    /// Stop and tear down the active playback: raise the stop flag,
    /// join both threads (the waveform thread publishes its final
    /// `None` before exiting), then clear transient graph state so a
    /// later start isn't corrupted by stale samples.
    fn stop_active(&self, active: &mut Option<ActivePlayback>) {
        if let Some(active) = active.take() {
            active.stop.store(true, Ordering::Release);
            let _ = active.producer.join();
            let _ = active.waveform.join();
            self.ring.clear();
            self.controls.clear_analyser();
            debug!(path = ?active.path, "playback stopped");
        }
    }

    /// Resolve the pre-rendered source for a request, if any. Returns
    /// `None` (falling back to live synthesis) when no URL is given or
    /// when fetch/decode fails.
    fn prerendered_source(&self, request: &PlayRequest) -> Option<Source> {
        let url = request.prerendered_url.as_deref()?;
        match self.decoded_buffer(url, request.sample_rate, request.asset_updated_at) {
            Ok(samples) => Some(Source::Buffer { samples, pos: 0 }),
            Err(err) => {
                debug!(url, error = %err, "pre-rendered path unavailable, using live synthesis");
                None
            }
        }
    }

    /// Fetch+decode with a per-URL cache. An entry is invalidated when
    /// the asset's updated-at timestamp is newer than the decode. The
    /// decoded rate must match the requested one; a stale asset rendered
    /// at another rate would otherwise play at the wrong pitch.
    fn decoded_buffer(
        &self,
        url: &str,
        sample_rate: u32,
        updated_at: Option<SystemTime>,
    ) -> Result<Arc<Vec<f32>>> {
        let mut cache = self.decode_cache.lock();
        let cached = cache.get(url).and_then(|entry| {
            let stale = matches!(updated_at, Some(ts) if ts > entry.decoded_at);
            (!stale).then(|| (Arc::clone(&entry.samples), entry.sample_rate))
        });

        let (samples, rate) = match cached {
            Some(hit) => hit,
            None => {
                let bytes = self.fetcher.fetch(url)?;
                let (samples, rate) = wav::decode_mono(&bytes)?;
                if samples.is_empty() {
                    return Err(BytebeatError::AssetFetch(format!("empty audio at {url}")));
                }
                let samples = Arc::new(samples);
                cache.insert(
                    url.to_string(),
                    CachedDecode {
                        samples: Arc::clone(&samples),
                        sample_rate: rate,
                        decoded_at: SystemTime::now(),
                    },
                );
                (samples, rate)
            }
        };

        if rate != sample_rate {
            return Err(BytebeatError::AssetFetch(format!(
                "asset at {url} decoded at {rate} Hz, expected {sample_rate} Hz"
            )));
        }
        Ok(samples)
    }
}

impl Drop for PlaybackEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Real-time production loop: pull mono samples from the source, apply
/// the gain stages, tap the analyser, duplicate to interleaved stereo
/// and push into the ring buffer with stop-aware backpressure.
fn producer_loop(
    mut source: Source,
    ring: Arc<RingBuffer>,
    controls: Arc<GraphControls>,
    stop: Arc<AtomicBool>,
) {
    let mut mono = [0.0f32; CHUNK_SAMPLES];
    let mut stereo = [0.0f32; CHUNK_SAMPLES * 2];

    while !stop.load(Ordering::Acquire) {
        match &mut source {
            Source::Live { generator, t } => {
                generator.fill(*t, &mut mono);
                *t += CHUNK_SAMPLES as u64;
            }
            Source::Buffer { samples, pos } => {
                for slot in mono.iter_mut() {
                    *slot = samples[*pos];
                    *pos = (*pos + 1) % samples.len();
                }
            }
        }

        let gain = controls.gain();
        for sample in mono.iter_mut() {
            *sample *= gain;
        }
        controls.tap(&mono);

        for (i, &sample) in mono.iter().enumerate() {
            stereo[i * 2] = sample;
            stereo[i * 2 + 1] = sample;
        }

        let mut written = 0;
        while written < stereo.len() && !stop.load(Ordering::Acquire) {
            let n = ring.write(&stereo[written..]);
            if n == 0 {
                // Buffer full: the output device hasn't caught up yet.
                thread::sleep(Duration::from_micros(500));
            } else {
                written += n;
            }
        }
    }
}

/// Waveform publisher: every ~80 ms push a fixed window to all
/// subscribers, then a single `None` once playback stops. The thread
/// exits afterwards, so repeated play/stop cycles never leak timers.
fn waveform_loop(
    buffer: Option<(Arc<Vec<f32>>, u32)>,
    controls: Arc<GraphControls>,
    subs: Arc<Mutex<Vec<WaveformSubscriber>>>,
    stop: Arc<AtomicBool>,
) {
    let started = Instant::now();

    while !stop.load(Ordering::Acquire) {
        let window = match &buffer {
            // Pre-rendered path: slice the decoded buffer at the
            // current elapsed-time offset, wrapping modulo its length.
            Some((samples, sample_rate)) => {
                let offset =
                    (started.elapsed().as_secs_f64() * *sample_rate as f64) as usize % samples.len();
                let mut window = [0.0f32; ANALYSER_WINDOW];
                for (i, slot) in window.iter_mut().enumerate() {
                    *slot = samples[(offset + i) % samples.len()];
                }
                window
            }
            // Live path: snapshot the analyser tap.
            None => controls.waveform(),
        };
        for subscriber in subs.lock().iter() {
            subscriber(Some(window));
        }

        // Sleep in slices so stop stays responsive.
        let mut remaining = WAVEFORM_INTERVAL;
        while !remaining.is_zero() && !stop.load(Ordering::Acquire) {
            let slice = remaining.min(Duration::from_millis(10));
            thread::sleep(slice);
            remaining = remaining.saturating_sub(slice);
        }
    }

    for subscriber in subs.lock().iter() {
        subscriber(None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;

    struct FailingFetcher;

    impl AssetFetcher for FailingFetcher {
        fn fetch(&self, url: &str) -> Result<Vec<u8>> {
            Err(BytebeatError::AssetFetch(format!("unreachable: {url}")))
        }
    }

    struct WavFetcher {
        bytes: Vec<u8>,
        fetches: AtomicUsize,
    }

    impl WavFetcher {
        fn new() -> Self {
            let samples = vec![0.25f32; 8000];
            WavFetcher {
                bytes: wav::encode(&samples, &samples, 8000).unwrap(),
                fetches: AtomicUsize::new(0),
            }
        }
    }

    impl AssetFetcher for WavFetcher {
        fn fetch(&self, _url: &str) -> Result<Vec<u8>> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            Ok(self.bytes.clone())
        }
    }

    /// Fetcher that blocks until released, to hold a toggle in flight.
    struct BlockingFetcher {
        release: Mutex<Option<mpsc::Receiver<()>>>,
    }

    impl AssetFetcher for BlockingFetcher {
        fn fetch(&self, _url: &str) -> Result<Vec<u8>> {
            let rx = self.release.lock().take();
            if let Some(rx) = rx {
                let _ = rx.recv_timeout(Duration::from_secs(5));
            }
            Err(BytebeatError::AssetFetch("released".into()))
        }
    }

    fn live_request() -> PlayRequest {
        PlayRequest {
            expression: "t>>4".into(),
            mode: OutputMode::Uint8,
            sample_rate: 8000,
            prerendered_url: None,
            asset_updated_at: None,
        }
    }

    fn prerendered_request(updated_at: Option<SystemTime>) -> PlayRequest {
        PlayRequest {
            prerendered_url: Some("assets/1.wav".into()),
            asset_updated_at: updated_at,
            ..live_request()
        }
    }

    #[test]
    fn toggle_starts_and_stops_live_playback() {
        let engine = PlaybackEngine::new(Arc::new(FailingFetcher), None).unwrap();
        assert_eq!(engine.state(), PlaybackState::Stopped);

        let outcome = engine.toggle(&live_request()).unwrap();
        assert_eq!(outcome, ToggleOutcome::Started(SourcePath::Live));
        assert_eq!(engine.state(), PlaybackState::Playing);

        // The producer should be filling the ring buffer.
        thread::sleep(Duration::from_millis(50));
        assert!(engine.ring().available_read() > 0);

        let outcome = engine.toggle(&live_request()).unwrap();
        assert_eq!(outcome, ToggleOutcome::Stopped);
        assert_eq!(engine.state(), PlaybackState::Stopped);
        assert_eq!(engine.ring().available_read(), 0);
    }

    #[test]
    fn compile_error_leaves_engine_stopped() {
        let engine = PlaybackEngine::new(Arc::new(FailingFetcher), None).unwrap();
        let request = PlayRequest {
            expression: "t >> >>".into(),
            ..live_request()
        };
        assert!(matches!(
            engine.toggle(&request),
            Err(BytebeatError::Compile(_))
        ));
        assert_eq!(engine.state(), PlaybackState::Stopped);
        // And the engine still works afterwards.
        assert!(matches!(
            engine.toggle(&live_request()).unwrap(),
            ToggleOutcome::Started(SourcePath::Live)
        ));
        engine.stop();
    }

    #[test]
    fn fetch_failure_falls_back_to_live_path() {
        let engine = PlaybackEngine::new(Arc::new(FailingFetcher), None).unwrap();
        let outcome = engine.toggle(&prerendered_request(None)).unwrap();
        assert_eq!(outcome, ToggleOutcome::Started(SourcePath::Live));
        engine.stop();
    }

    #[test]
    fn prerendered_path_uses_decode_cache() {
        let fetcher = Arc::new(WavFetcher::new());
        let engine = PlaybackEngine::new(Arc::clone(&fetcher) as Arc<dyn AssetFetcher>, None)
            .unwrap();

        let outcome = engine.toggle(&prerendered_request(None)).unwrap();
        assert_eq!(outcome, ToggleOutcome::Started(SourcePath::Prerendered));
        engine.toggle(&prerendered_request(None)).unwrap(); // stop
        engine.toggle(&prerendered_request(None)).unwrap(); // start again
        engine.stop();
        assert_eq!(fetcher.fetches.load(Ordering::SeqCst), 1);

        // A newer asset timestamp invalidates the cached decode.
        let newer = Some(SystemTime::now() + Duration::from_secs(60));
        engine.toggle(&prerendered_request(newer)).unwrap();
        engine.stop();
        assert_eq!(fetcher.fetches.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn decoded_rate_mismatch_falls_back_to_live() {
        // The fixture asset is 8000 Hz; asking for 16000 must not play
        // it at double pitch.
        let fetcher = Arc::new(WavFetcher::new());
        let engine =
            PlaybackEngine::new(Arc::clone(&fetcher) as Arc<dyn AssetFetcher>, None).unwrap();
        let request = PlayRequest {
            sample_rate: 16000,
            ..prerendered_request(None)
        };
        assert_eq!(
            engine.toggle(&request).unwrap(),
            ToggleOutcome::Started(SourcePath::Live)
        );
        engine.stop();

        // The matching rate still takes the pre-rendered path.
        assert_eq!(
            engine.toggle(&prerendered_request(None)).unwrap(),
            ToggleOutcome::Started(SourcePath::Prerendered)
        );
        engine.stop();
    }

    #[test]
    fn concurrent_toggle_is_dropped_not_queued() {
        let (tx, rx) = mpsc::channel();
        let fetcher = Arc::new(BlockingFetcher {
            release: Mutex::new(Some(rx)),
        });
        let engine = Arc::new(
            PlaybackEngine::new(fetcher as Arc<dyn AssetFetcher>, None).unwrap(),
        );

        let first = {
            let engine = Arc::clone(&engine);
            thread::spawn(move || engine.toggle(&prerendered_request(None)).unwrap())
        };

        // Wait until the first toggle is parked inside fetch().
        thread::sleep(Duration::from_millis(100));
        assert_eq!(engine.toggle(&live_request()).unwrap(), ToggleOutcome::Busy);

        tx.send(()).unwrap();
        // Fetch fails, first toggle falls back to the live path.
        assert_eq!(
            first.join().unwrap(),
            ToggleOutcome::Started(SourcePath::Live)
        );
        assert_eq!(engine.state(), PlaybackState::Playing);
        engine.stop();
    }

    #[test]
    fn waveform_publishes_frames_then_none_on_stop() {
        let engine = PlaybackEngine::new(Arc::new(FailingFetcher), None).unwrap();
        let (tx, rx) = mpsc::channel();
        engine.subscribe_waveform(Box::new(move |frame| {
            let _ = tx.send(frame);
        }));

        engine.toggle(&live_request()).unwrap();
        let first = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(first.is_some());
        engine.stop();

        // Drain: the last published frame must be None, exactly once.
        let mut frames: Vec<WaveformFrame> = Vec::new();
        while let Ok(frame) = rx.recv_timeout(Duration::from_millis(200)) {
            frames.push(frame);
        }
        assert_eq!(frames.iter().filter(|f| f.is_none()).count(), 1);
        assert!(frames.last().unwrap().is_none());
    }

    #[test]
    fn master_gain_persists_and_clamps() {
        struct MemGain(Mutex<Option<f32>>);
        impl GainStore for MemGain {
            fn load(&self) -> Option<f32> {
                *self.0.lock()
            }
            fn save(&self, gain: f32) -> Result<()> {
                *self.0.lock() = Some(gain);
                Ok(())
            }
        }

        let store = Arc::new(MemGain(Mutex::new(Some(0.4))));
        let engine = PlaybackEngine::new(
            Arc::new(FailingFetcher),
            Some(Arc::clone(&store) as Arc<dyn GainStore>),
        )
        .unwrap();
        assert_eq!(engine.controls().master_gain(), 0.4);

        engine.set_master_gain(2.0);
        assert_eq!(engine.controls().master_gain(), 1.0);
        assert_eq!(store.0.lock().unwrap(), 1.0);

        // Fade gain is ephemeral: never written to the store.
        engine.set_fade_gain(0.3);
        assert_eq!(store.0.lock().unwrap(), 1.0);
    }
}
