// ==========================================
// AUDIO PLAYBACK ENGINE (rodio)
// ==========================================
// Production MediaBackend built on rodio. It handles:
// - Connecting to the default audio output device
// - Fetching episode audio over HTTP and decoding it in memory
// - Reading a live stream through a prefix-buffered reader
// - Play / pause / seek / volume / speed
// - Reporting progress and end-of-media as MediaEvents
//
// Rodio exposes neither position nor end-of-track callbacks, so a
// watcher task samples the sink every 250ms.

use async_trait::async_trait;
use rodio::{Decoder, OutputStream, Sink, Source};
use std::io::{self, Cursor, Read, Seek, SeekFrom};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::error::{PlayerError, Result};
use crate::events::Notifier;
use crate::player::backend::{MediaBackend, MediaEvent, MediaInfo, SourceKind};

const WATCH_INTERVAL: Duration = Duration::from_millis(250);

// Sink reports empty for a moment right after a source is appended
const END_GUARD_SECONDS: f64 = 0.5;

// How much of a live stream stays rewindable while rodio probes the format
const PROBE_BUFFER_BYTES: usize = 256 * 1024;

const LIVE_CHUNK_QUEUE: usize = 64;

// ==========================================
// PLAYER STATE
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq)]
enum Phase {
    Stopped,
    Loading,
    Ready,
    Playing,
    Paused,
    Ended,
}

enum LoadedSource {
    // Whole file kept in memory so seeking can rebuild the decoder
    OnDemand(Arc<[u8]>),
    Live,
}

// Position tracking: rodio does not report where it is, so we measure
// wall time since the last anchor and scale it by the playback rate.
#[derive(Debug, Clone, Copy)]
struct PlaybackClock {
    base: f64,
    anchor: Option<Instant>,
    rate: f64,
}

impl PlaybackClock {
    fn new() -> Self {
        PlaybackClock {
            base: 0.0,
            anchor: None,
            rate: 1.0,
        }
    }

    fn position(&self) -> f64 {
        let running = self
            .anchor
            .map(|anchor| anchor.elapsed().as_secs_f64() * self.rate)
            .unwrap_or(0.0);
        self.base + running
    }

    fn start(&mut self) {
        if self.anchor.is_none() {
            self.anchor = Some(Instant::now());
        }
    }

    fn pause(&mut self) {
        self.base = self.position();
        self.anchor = None;
    }

    fn set(&mut self, position: f64) {
        self.base = position;
        if self.anchor.is_some() {
            self.anchor = Some(Instant::now());
        }
    }

    fn set_rate(&mut self, rate: f64) {
        let running = self.anchor.is_some();
        self.pause();
        self.rate = rate;
        if running {
            self.start();
        }
    }

    fn reset(&mut self) {
        self.base = 0.0;
        self.anchor = None;
    }
}

struct AudioState {
    sink: Option<Sink>,
    phase: Phase,
    source: Option<LoadedSource>,
    kind: SourceKind,
    duration: Option<f64>,
    clock: PlaybackClock,
    volume: f64,
    muted: bool,
    // Download task feeding a live stream; aborted on release
    live_feed: Option<JoinHandle<()>>,
}

impl AudioState {
    fn apply_volume(&self) {
        if let Some(sink) = &self.sink {
            let level = if self.muted { 0.0 } else { self.volume };
            sink.set_volume(level as f32);
        }
    }

    fn clear_output(&mut self) {
        if let Some(sink) = &self.sink {
            sink.stop();
        }
        if let Some(feed) = self.live_feed.take() {
            feed.abort();
        }
        self.source = None;
        self.duration = None;
        self.clock.reset();
    }
}

// ==========================================
// RODIO BACKEND
// ==========================================
pub struct RodioBackend {
    state: Mutex<AudioState>,
    http: reqwest::Client,
    load_ticket: AtomicU64,
    events: Notifier<MediaEvent>,
}

impl Drop for RodioBackend {
    fn drop(&mut self) {
        self.lock().clear_output();
    }
}

impl RodioBackend {
    /// Opens the default output device and starts the watcher task.
    ///
    /// Without an audio device the backend still works as a state machine,
    /// but `play()` is rejected.
    pub fn spawn(request_timeout: Duration) -> Result<Arc<Self>> {
        // Connect timeout only: episode downloads and live bodies run long
        let http = reqwest::Client::builder()
            .connect_timeout(request_timeout)
            .build()?;

        let sink = match OutputStream::try_default() {
            Ok((stream, handle)) => match Sink::try_new(&handle) {
                Ok(sink) => {
                    // OutputStream is !Send; leak it so the device stays open
                    // for the life of the process
                    std::mem::forget(stream);
                    Some(sink)
                }
                Err(e) => {
                    tracing::warn!("Failed to create audio sink: {}", e);
                    None
                }
            },
            Err(e) => {
                tracing::warn!("No audio output device: {}", e);
                None
            }
        };

        let backend = Arc::new(RodioBackend {
            state: Mutex::new(AudioState {
                sink,
                phase: Phase::Stopped,
                source: None,
                kind: SourceKind::OnDemand,
                duration: None,
                clock: PlaybackClock::new(),
                volume: 1.0,
                muted: false,
                live_feed: None,
            }),
            http,
            load_ticket: AtomicU64::new(0),
            events: Notifier::new(),
        });

        let weak = Arc::downgrade(&backend);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(WATCH_INTERVAL);
            loop {
                ticker.tick().await;
                match weak.upgrade() {
                    Some(backend) => backend.watch_tick(),
                    None => break,
                }
            }
        });

        Ok(backend)
    }

    fn lock(&self) -> MutexGuard<'_, AudioState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_current(&self, ticket: u64) -> bool {
        self.load_ticket.load(Ordering::SeqCst) == ticket
    }

    // Called by the watcher: progress while playing, end-of-media when
    // the sink drains
    fn watch_tick(&self) {
        let event = {
            let mut state = self.lock();
            if state.phase != Phase::Playing {
                return;
            }
            let drained = state.sink.as_ref().map(|sink| sink.empty()).unwrap_or(false);
            let position = state.clock.position();
            if drained && position >= END_GUARD_SECONDS {
                state.phase = Phase::Ended;
                state.clock.pause();
                match state.kind {
                    SourceKind::OnDemand => MediaEvent::Ended,
                    SourceKind::Live => MediaEvent::Error("Live stream ended unexpectedly".to_string()),
                }
            } else {
                let position = match state.duration {
                    Some(duration) => position.min(duration),
                    None => position,
                };
                MediaEvent::Progress {
                    position,
                    duration: state.duration,
                }
            }
        };
        self.events.emit(event);
    }

    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| PlayerError::load(format!("Failed to fetch {}: {}", url, e)))?;
        let response = response
            .error_for_status()
            .map_err(|e| PlayerError::load(e.to_string()))?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| PlayerError::load(format!("Download interrupted: {}", e)))?;
        Ok(bytes.to_vec())
    }

    // Helper to decode an in-memory file; returns the decoder and duration
    fn decode_from_memory(data: Arc<[u8]>) -> Result<(Decoder<Cursor<Arc<[u8]>>>, Option<f64>)> {
        let decoder = Decoder::new(Cursor::new(data)).map_err(|e| {
            PlayerError::load(format!("Audio decode failed: {}. File may be corrupted or invalid format.", e))
        })?;
        let duration = decoder.total_duration().map(|d| d.as_secs_f64());
        Ok((decoder, duration))
    }

    async fn load_on_demand(&self, url: &str, ticket: u64) -> Result<MediaInfo> {
        let bytes = self.fetch_bytes(url).await?;
        if !self.is_current(ticket) {
            return Err(PlayerError::Superseded);
        }

        let data: Arc<[u8]> = bytes.into();
        let (decoder, duration) = Self::decode_from_memory(data.clone())?;

        let mut state = self.lock();
        if !self.is_current(ticket) {
            return Err(PlayerError::Superseded);
        }
        state.clear_output();
        if let Some(sink) = &state.sink {
            sink.pause();
            sink.append(decoder);
        }
        state.source = Some(LoadedSource::OnDemand(data));
        state.kind = SourceKind::OnDemand;
        state.duration = duration;
        state.phase = Phase::Ready;
        state.apply_volume();
        Ok(MediaInfo { duration })
    }

    async fn load_live(&self, url: &str, ticket: u64) -> Result<MediaInfo> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| PlayerError::network(format!("Failed to connect to stream: {}", e)))?;

        let (tx, rx) = mpsc::channel::<Vec<u8>>(LIVE_CHUNK_QUEUE);
        let events = self.events.clone();
        let feed = tokio::spawn(async move {
            let mut response = response;
            loop {
                match response.chunk().await {
                    Ok(Some(chunk)) => {
                        if tx.send(chunk.to_vec()).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        events.emit(MediaEvent::Error(format!("Stream connection lost: {}", e)));
                        break;
                    }
                }
            }
        });

        // Format probing blocks on the first chunks, so keep it off the runtime
        let reader = LiveReader::new(rx, self.events.clone());
        let decoded = tokio::task::spawn_blocking(move || Decoder::new(reader)).await;
        let decoder = match decoded {
            Ok(Ok(decoder)) => decoder,
            Ok(Err(e)) => {
                feed.abort();
                return Err(PlayerError::load(format!("Unsupported stream format: {}", e)));
            }
            Err(e) => {
                feed.abort();
                return Err(PlayerError::load(format!("Stream decoder task failed: {}", e)));
            }
        };

        let mut state = self.lock();
        if !self.is_current(ticket) {
            feed.abort();
            return Err(PlayerError::Superseded);
        }
        state.clear_output();
        if let Some(sink) = &state.sink {
            sink.pause();
            sink.append(decoder);
        }
        state.source = Some(LoadedSource::Live);
        state.kind = SourceKind::Live;
        state.live_feed = Some(feed);
        state.phase = Phase::Ready;
        state.apply_volume();
        Ok(MediaInfo { duration: None })
    }
}

#[async_trait]
impl MediaBackend for RodioBackend {
    async fn load(&self, url: &str, kind: SourceKind) -> Result<MediaInfo> {
        let ticket = self.load_ticket.fetch_add(1, Ordering::SeqCst) + 1;
        {
            // Set state to Loading BEFORE stopping so the watcher does not
            // mistake the emptied sink for a finished track
            let mut state = self.lock();
            state.phase = Phase::Loading;
            state.clear_output();
        }
        tracing::debug!("Loading {:?} source {}", kind, url);

        let result = match kind {
            SourceKind::OnDemand => self.load_on_demand(url, ticket).await,
            SourceKind::Live => self.load_live(url, ticket).await,
        };
        if result.is_err() && self.is_current(ticket) {
            self.lock().phase = Phase::Stopped;
        }
        result
    }

    async fn play(&self) -> Result<()> {
        let mut state = self.lock();
        if state.source.is_none() {
            return Err(PlayerError::NoSource);
        }
        let Some(sink) = &state.sink else {
            return Err(PlayerError::rejected("No audio output device available"));
        };
        sink.play();
        state.clock.start();
        state.phase = Phase::Playing;
        Ok(())
    }

    fn pause(&self) {
        let mut state = self.lock();
        if let Some(sink) = &state.sink {
            sink.pause();
        }
        if state.phase == Phase::Playing {
            state.clock.pause();
            state.phase = Phase::Paused;
        }
    }

    fn release(&self) -> Result<()> {
        // Invalidate any in-flight load as well
        self.load_ticket.fetch_add(1, Ordering::SeqCst);
        let mut state = self.lock();
        state.clear_output();
        state.phase = Phase::Stopped;
        Ok(())
    }

    // Rodio 0.17 cannot seek a playing source, so we rebuild the decoder
    // from the cached bytes and skip ahead to the target
    fn seek(&self, position: f64) -> Result<()> {
        let mut state = self.lock();
        let data = match &state.source {
            Some(LoadedSource::OnDemand(data)) => data.clone(),
            Some(LoadedSource::Live) => return Ok(()),
            None => return Err(PlayerError::NoSource),
        };
        let position = position.max(0.0);
        let (decoder, _) = Self::decode_from_memory(data)?;
        if let Some(sink) = &state.sink {
            let playing = !sink.is_paused();
            sink.stop();
            if !playing {
                sink.pause();
            }
            sink.append(decoder.skip_duration(Duration::from_secs_f64(position)));
        }
        state.clock.set(position);
        if state.phase == Phase::Ended {
            state.phase = Phase::Paused;
        }
        Ok(())
    }

    fn position(&self) -> f64 {
        self.lock().clock.position()
    }

    fn set_volume(&self, volume: f64) {
        let mut state = self.lock();
        state.volume = volume;
        state.apply_volume();
    }

    fn set_muted(&self, muted: bool) {
        let mut state = self.lock();
        state.muted = muted;
        state.apply_volume();
    }

    fn set_rate(&self, rate: f64) {
        let mut state = self.lock();
        state.clock.set_rate(rate);
        if let Some(sink) = &state.sink {
            sink.set_speed(rate as f32);
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<MediaEvent> {
        self.events.subscribe()
    }
}

// ==========================================
// LIVE STREAM READER
// ==========================================
// Rodio's decoder wants Read + Seek. A live stream cannot seek, but the
// format probe rewinds to the start a few times, so the first
// PROBE_BUFFER_BYTES are kept and seeks inside them are allowed. Past
// that point only "seek to where we already are" succeeds.
struct LiveReader {
    chunks: Mutex<mpsc::Receiver<Vec<u8>>>,
    events: Notifier<MediaEvent>,
    prefix: Vec<u8>,
    pending: Vec<u8>,
    pending_offset: usize,
    pos: u64,
    total_read: u64,
}

impl LiveReader {
    fn new(chunks: mpsc::Receiver<Vec<u8>>, events: Notifier<MediaEvent>) -> Self {
        LiveReader {
            chunks: Mutex::new(chunks),
            events,
            prefix: Vec::new(),
            pending: Vec::new(),
            pending_offset: 0,
            pos: 0,
            total_read: 0,
        }
    }

    // Blocks the audio thread until the next chunk arrives
    fn next_chunk(&mut self) -> Option<Vec<u8>> {
        let chunks = self.chunks.get_mut().unwrap_or_else(PoisonError::into_inner);
        match chunks.try_recv() {
            Ok(chunk) => Some(chunk),
            Err(mpsc::error::TryRecvError::Disconnected) => None,
            Err(mpsc::error::TryRecvError::Empty) => {
                self.events.emit(MediaEvent::Buffering);
                let chunk = chunks.blocking_recv();
                if chunk.is_some() {
                    self.events.emit(MediaEvent::Resumed);
                }
                chunk
            }
        }
    }
}

impl Read for LiveReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        let pos = self.pos as usize;
        if pos < self.prefix.len() {
            let n = buf.len().min(self.prefix.len() - pos);
            buf[..n].copy_from_slice(&self.prefix[pos..pos + n]);
            self.pos += n as u64;
            return Ok(n);
        }

        if self.pending_offset >= self.pending.len() {
            match self.next_chunk() {
                Some(chunk) => {
                    self.pending = chunk;
                    self.pending_offset = 0;
                }
                None => return Ok(0),
            }
        }

        let available = &self.pending[self.pending_offset..];
        let n = buf.len().min(available.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.pending_offset += n;

        let still_probing = self.total_read == self.prefix.len() as u64;
        if still_probing && self.prefix.len() + n <= PROBE_BUFFER_BYTES {
            self.prefix.extend_from_slice(&buf[..n]);
        }
        self.pos += n as u64;
        self.total_read += n as u64;
        Ok(n)
    }
}

impl Seek for LiveReader {
    fn seek(&mut self, target: SeekFrom) -> io::Result<u64> {
        let target = match target {
            SeekFrom::Start(offset) => offset as i64,
            SeekFrom::Current(delta) => self.pos as i64 + delta,
            SeekFrom::End(_) => {
                return Err(io::Error::new(io::ErrorKind::Unsupported, "live stream has no end"));
            }
        };
        if target < 0 {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "seek before start"));
        }

        let target = target as u64;
        let prefix_complete = self.total_read == self.prefix.len() as u64;
        if target == self.total_read || (prefix_complete && target <= self.prefix.len() as u64) {
            self.pos = target;
            Ok(target)
        } else {
            Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "live stream can only rewind within the probe buffer",
            ))
        }
    }
}
