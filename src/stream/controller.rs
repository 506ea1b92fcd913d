// ==========================================
// STREAMING CONTROLLER
// ==========================================
// Owns the single live-stream connection and the metadata poller.
//
// State machine:
//   Idle -> ResolvingUrl -> Ready -> Connecting -> Playing <-> Buffering
//   Playing/Buffering -> Paused (user pause, connection torn down)
//                     -> Error  (hard failure, retry prompt opened)
//
// The resolved stream URL is the licence to play. A user pause releases
// the connection and drops the URL, so the next play always resolves a
// fresh one. Live audio has no position to resume from.
//
// URL resolution and metadata fetches are single-flight: a second
// request while one is outstanding is suppressed, never queued.
//
// A pause or shutdown while a resolution is outstanding cancels it: the
// late URL is discarded and nothing connects. Shutdown also keeps the
// late result from restarting the poller.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::config::StreamConfig;
use crate::error::{PlayerError, Result};
use crate::events::{ConnectionState, Notifier, StreamEvent};
use crate::format::clamp_volume;
use crate::persistence::PersistenceStore;
use crate::player::backend::{MediaBackend, MediaEvent, SourceKind};
use crate::scheduler::{RepeatingTask, TaskSlot};
use crate::stream::api::StreamEndpoints;
use crate::stream::metadata::MetadataSnapshot;

/// Storage key of the persisted stream settings
pub const SETTINGS_KEY: &str = "stream_settings";

const METADATA_ERROR_STATUS: &str = "Unable to refresh metadata";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StreamSettings {
    pub volume: f64,
}

/// Read-only view of the stream session
#[derive(Debug, Clone, PartialEq)]
pub struct StreamSession {
    pub stream_url: Option<String>,
    pub connection_state: ConnectionState,
    pub volume: f64,
    pub muted: bool,
}

// Outcome of one resolve() call
enum Resolution {
    Resolved(String),
    // Another resolution was already outstanding
    InFlight,
    // Paused or shut down while the request was outstanding
    Cancelled,
}

/// Result of one metadata poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataOutcome {
    /// New `current` block, now-playing fields replaced
    Updated,
    /// Same `current` block as before; only the refresh time moved
    Unchanged,
    /// Another fetch was still in flight
    Skipped,
}

struct StreamState {
    stream_url: Option<String>,
    connection: ConnectionState,
    volume: f64,
    muted: bool,
    status: String,
    metadata: Option<MetadataSnapshot>,
    last_refreshed: Option<DateTime<Utc>>,
    retry_prompt: Option<String>,
    // play() arrived while another caller was resolving the URL
    play_pending: bool,
}

// Clears a single-flight flag on every exit path
struct FlightGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> FlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| FlightGuard { flag })
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

struct Inner {
    api: Arc<dyn StreamEndpoints>,
    backend: Arc<dyn MediaBackend>,
    store: PersistenceStore,
    config: StreamConfig,
    state: Mutex<StreamState>,
    resolving: AtomicBool,
    fetching_metadata: AtomicBool,
    connect_generation: AtomicU64,
    // Bumped by pause and shutdown to cancel an outstanding resolution
    resolve_epoch: AtomicU64,
    closed: AtomicBool,
    poller: TaskSlot,
    events: Notifier<StreamEvent>,
    event_pump: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.poller.stop();
        if let Some(pump) = self.event_pump.get_mut().unwrap_or_else(PoisonError::into_inner).take() {
            pump.abort();
        }
        if let Err(e) = self.backend.release() {
            tracing::warn!("{}", PlayerError::teardown(e.to_string()));
        }
    }
}

#[derive(Clone)]
pub struct StreamingController {
    inner: Arc<Inner>,
}

impl StreamingController {
    pub fn new(
        api: Arc<dyn StreamEndpoints>,
        backend: Arc<dyn MediaBackend>,
        store: PersistenceStore,
        config: StreamConfig,
    ) -> Self {
        let volume = clamp_volume(config.default_volume);
        StreamingController {
            inner: Arc::new(Inner {
                api,
                backend,
                store,
                config,
                state: Mutex::new(StreamState {
                    stream_url: None,
                    connection: ConnectionState::Idle,
                    volume,
                    muted: false,
                    status: String::new(),
                    metadata: None,
                    last_refreshed: None,
                    retry_prompt: None,
                    play_pending: false,
                }),
                resolving: AtomicBool::new(false),
                fetching_metadata: AtomicBool::new(false),
                connect_generation: AtomicU64::new(0),
                resolve_epoch: AtomicU64::new(0),
                closed: AtomicBool::new(false),
                poller: TaskSlot::new(),
                events: Notifier::new(),
                event_pump: Mutex::new(None),
            }),
        }
    }

    fn downgrade(&self) -> Weak<Inner> {
        Arc::downgrade(&self.inner)
    }

    fn from_inner(inner: Arc<Inner>) -> Self {
        StreamingController { inner }
    }

    fn state(&self) -> MutexGuard<'_, StreamState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: StreamEvent) {
        self.inner.events.emit(event);
    }

    fn set_connection(&self, connection: ConnectionState) {
        let previous = std::mem::replace(&mut self.state().connection, connection);
        if previous != connection {
            tracing::debug!("Stream connection {:?} -> {:?}", previous, connection);
            self.emit(StreamEvent::ConnectionChanged(connection));
        }
    }

    fn set_status(&self, status: impl Into<String>) {
        let status = status.into();
        self.state().status = status.clone();
        self.emit(StreamEvent::Status(status));
    }

    fn is_current(&self, generation: u64) -> bool {
        self.inner.connect_generation.load(Ordering::SeqCst) == generation
    }

    // ==========================================
    // INITIALIZATION
    // ==========================================

    /// Applies the saved volume, resolves the stream URL once and starts
    /// metadata polling. A failed resolution leaves the controller in
    /// Error with a status message; there is no automatic retry.
    pub async fn initialize(&self) -> Result<()> {
        self.inner.closed.store(false, Ordering::SeqCst);
        if let Some(settings) = self.inner.store.load::<StreamSettings>(SETTINGS_KEY) {
            self.state().volume = clamp_volume(settings.volume);
        }
        let (volume, muted) = {
            let state = self.state();
            (state.volume, state.muted)
        };
        self.inner.backend.set_volume(volume);
        self.inner.backend.set_muted(muted);
        self.attach_backend_events();

        match self.resolve().await {
            Ok(Resolution::Resolved(_)) => {}
            Ok(Resolution::InFlight) => return Ok(()),
            Ok(Resolution::Cancelled) if self.is_closed() => return Ok(()),
            Ok(Resolution::Cancelled) => {}
            Err(e) => {
                tracing::error!("Initial stream resolution failed: {}", e);
                self.set_connection(ConnectionState::Error);
                self.set_status(format!("Stream unavailable: {}", e));
                return Err(e);
            }
        }

        // First poll now, the rest on the timer
        if let Err(e) = self.refresh_metadata().await {
            tracing::warn!("Initial metadata fetch failed: {}", e);
        }
        Ok(())
    }

    fn attach_backend_events(&self) {
        let mut rx = self.inner.backend.subscribe();
        let weak = self.downgrade();
        let pump = tokio::spawn(async move {
            loop {
                let event = match rx.recv().await {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                StreamingController::from_inner(inner).handle_media_event(event);
            }
        });

        let previous = self
            .inner
            .event_pump
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(pump);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    // ==========================================
    // URL RESOLUTION
    // ==========================================

    async fn resolve(&self) -> Result<Resolution> {
        let Some(_guard) = FlightGuard::acquire(&self.inner.resolving) else {
            tracing::debug!("Stream URL resolution already in flight");
            return Ok(Resolution::InFlight);
        };

        let epoch = self.inner.resolve_epoch.load(Ordering::SeqCst);
        self.set_connection(ConnectionState::ResolvingUrl);
        self.set_status("Resolving stream...");
        let result = self.inner.api.resolve_stream_url().await;

        // A play() that arrived after the cancellation still wants audio
        let pending = std::mem::take(&mut self.state().play_pending);
        if self.inner.resolve_epoch.load(Ordering::SeqCst) != epoch && !pending {
            tracing::info!("Stream resolution finished after pause or shutdown, discarded");
            if result.is_ok() && !self.is_closed() {
                self.ensure_polling();
            }
            return Ok(Resolution::Cancelled);
        }
        let url = result?;

        tracing::info!("Resolved stream URL: {}", url);
        self.state().stream_url = Some(url.clone());
        self.set_connection(ConnectionState::Ready);
        self.set_status("Ready");
        self.ensure_polling();

        if pending {
            // Connecting is entered here so a pause before the task runs cancels it
            let generation = self.begin_connect();
            let controller = self.clone();
            let url = url.clone();
            tokio::spawn(async move {
                if let Err(e) = controller.connect(url, generation).await {
                    tracing::warn!("Deferred stream start failed: {}", e);
                }
            });
        }
        Ok(Resolution::Resolved(url))
    }

    fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    // ==========================================
    // TRANSPORT
    // ==========================================

    /// Starts the live stream, resolving a URL first when none is held
    pub async fn play(&self) -> Result<()> {
        let (connection, url) = {
            let state = self.state();
            (state.connection, state.stream_url.clone())
        };
        if connection.is_active() {
            return Ok(());
        }
        self.inner.closed.store(false, Ordering::SeqCst);

        let url = match url {
            Some(url) => url,
            None => match self.resolve().await {
                Ok(Resolution::Resolved(url)) => url,
                Ok(Resolution::InFlight) => {
                    self.state().play_pending = true;
                    self.set_connection(ConnectionState::ResolvingUrl);
                    return Ok(());
                }
                Ok(Resolution::Cancelled) => return Ok(()),
                Err(e) => {
                    tracing::error!("Stream resolution failed: {}", e);
                    self.fail(&e);
                    return Err(e);
                }
            },
        };

        let generation = self.begin_connect();
        self.connect(url, generation).await
    }

    fn begin_connect(&self) -> u64 {
        let generation = self.inner.connect_generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.state().retry_prompt = None;
        self.set_connection(ConnectionState::Connecting);
        self.set_status("Connecting...");
        generation
    }

    async fn connect(&self, url: String, generation: u64) -> Result<()> {
        if !self.is_current(generation) {
            return Ok(());
        }

        match self.inner.backend.load(&url, SourceKind::Live).await {
            Ok(_) => {}
            Err(PlayerError::Superseded) => return Ok(()),
            Err(e) => {
                if !self.is_current(generation) {
                    return Ok(());
                }
                tracing::error!("Stream connection failed: {}", e);
                self.fail(&e);
                return Err(e);
            }
        }
        if !self.is_current(generation) {
            return Ok(());
        }

        let (volume, muted) = {
            let state = self.state();
            (state.volume, state.muted)
        };
        self.inner.backend.set_volume(volume);
        self.inner.backend.set_muted(muted);

        let result = self.inner.backend.play().await;
        if !self.is_current(generation) {
            return Ok(());
        }
        match result {
            Ok(()) => {
                self.set_connection(ConnectionState::Playing);
                self.set_status("Live");
                Ok(())
            }
            Err(e) => {
                tracing::warn!("Stream playback rejected: {}", e);
                self.fail(&e);
                Err(e)
            }
        }
    }

    /// User pause: releases the connection and drops the stream URL.
    /// An outstanding resolution is cancelled and will not connect.
    pub fn pause(&self) {
        let connection = self.connection_state();
        let resolving = connection == ConnectionState::ResolvingUrl || self.state().play_pending;
        if !connection.is_active() && !resolving {
            return;
        }
        if resolving {
            self.cancel_resolution();
        }
        self.teardown();
        self.set_connection(ConnectionState::Paused);
        self.set_status("Paused");
        tracing::info!("Stream paused, connection released");
    }

    pub async fn toggle_play_pause(&self) -> Result<()> {
        if self.connection_state().is_active() {
            self.pause();
            Ok(())
        } else {
            self.play().await
        }
    }

    /// Explicit user retry: resolution and playback from scratch
    pub async fn retry(&self) -> Result<()> {
        tracing::info!("Retrying stream");
        self.teardown();
        self.state().retry_prompt = None;
        self.set_connection(ConnectionState::Idle);
        self.play().await
    }

    /// Stops polling and releases the stream
    pub fn shutdown(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.cancel_resolution();
        self.inner.poller.stop();
        self.teardown();
        self.set_connection(ConnectionState::Idle);
        tracing::info!("Streaming controller shut down");
    }

    fn cancel_resolution(&self) {
        self.inner.resolve_epoch.fetch_add(1, Ordering::SeqCst);
        self.state().play_pending = false;
    }

    // Releases the audio resource on every exit path; failures only log
    fn teardown(&self) {
        self.inner.connect_generation.fetch_add(1, Ordering::SeqCst);
        if let Err(e) = self.inner.backend.release() {
            tracing::warn!("{}", PlayerError::teardown(e.to_string()));
        }
        self.state().stream_url = None;
    }

    fn fail(&self, err: &PlayerError) {
        self.teardown();
        let message = err.to_string();
        self.state().retry_prompt = Some(message.clone());
        self.set_connection(ConnectionState::Error);
        self.set_status(message.clone());
        self.emit(StreamEvent::RetryPrompt(message));
    }

    // ==========================================
    // VOLUME
    // ==========================================

    pub fn set_volume(&self, level: f64) {
        let volume = clamp_volume(level);
        let muted = {
            let mut state = self.state();
            state.volume = volume;
            state.muted
        };
        self.inner.backend.set_volume(volume);
        if let Err(e) = self.inner.store.save(SETTINGS_KEY, &StreamSettings { volume }) {
            tracing::warn!("Failed to persist stream settings: {}", e);
        }
        self.emit(StreamEvent::VolumeChanged { volume, muted });
    }

    pub fn toggle_mute(&self) -> bool {
        let (volume, muted) = {
            let mut state = self.state();
            state.muted = !state.muted;
            (state.volume, state.muted)
        };
        self.inner.backend.set_muted(muted);
        self.emit(StreamEvent::VolumeChanged { volume, muted });
        muted
    }

    // ==========================================
    // METADATA POLLING
    // ==========================================

    fn ensure_polling(&self) {
        if self.inner.poller.is_active() {
            return;
        }
        let period = self.inner.config.poll_interval();
        let weak = self.downgrade();
        self.inner.poller.start(RepeatingTask::spawn(period, move || {
            let weak = weak.clone();
            async move {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                let controller = StreamingController::from_inner(inner);
                if let Err(e) = controller.refresh_metadata().await {
                    tracing::debug!("Metadata poll failed: {}", e);
                }
            }
        }));
        tracing::debug!("Metadata polling every {:?}", period);
    }

    /// Fetches metadata once. Identical `current` blocks only bump the
    /// refresh time; a failure changes the status line, never the audio.
    pub async fn refresh_metadata(&self) -> Result<MetadataOutcome> {
        let Some(_guard) = FlightGuard::acquire(&self.inner.fetching_metadata) else {
            return Ok(MetadataOutcome::Skipped);
        };

        let snapshot = match self.inner.api.fetch_metadata().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!("Metadata fetch failed: {}", e);
                self.set_status(METADATA_ERROR_STATUS);
                return Err(e);
            }
        };

        let now = Utc::now();
        let changed = {
            let mut state = self.state();
            state.last_refreshed = Some(now);
            let changed = !state
                .metadata
                .as_ref()
                .is_some_and(|previous| previous.same_show(&snapshot));
            if changed {
                state.metadata = Some(snapshot.clone());
            }
            changed
        };

        let recovered = self.state().status == METADATA_ERROR_STATUS;
        if recovered {
            self.set_status(self.connection_status_line());
        }

        if changed {
            tracing::debug!("Now playing: {}", snapshot.now_playing_line());
            self.emit(StreamEvent::NowPlayingChanged(snapshot));
        }
        self.emit(StreamEvent::MetadataRefreshed(now));

        Ok(if changed {
            MetadataOutcome::Updated
        } else {
            MetadataOutcome::Unchanged
        })
    }

    fn connection_status_line(&self) -> &'static str {
        match self.connection_state() {
            ConnectionState::Idle => "",
            ConnectionState::ResolvingUrl => "Resolving stream...",
            ConnectionState::Ready => "Ready",
            ConnectionState::Connecting => "Connecting...",
            ConnectionState::Playing => "Live",
            ConnectionState::Buffering => "Buffering...",
            ConnectionState::Paused => "Paused",
            ConnectionState::Error => "Stream error",
        }
    }

    // ==========================================
    // MEDIA SUBSYSTEM EVENTS
    // ==========================================

    /// Buffering stalls are status text only; decode or network failures
    /// tear the stream down and open a retry prompt.
    pub fn handle_media_event(&self, event: MediaEvent) {
        let connection = self.connection_state();
        match event {
            MediaEvent::Buffering if connection == ConnectionState::Playing => {
                self.set_connection(ConnectionState::Buffering);
                self.set_status("Buffering...");
            }
            MediaEvent::Resumed | MediaEvent::Progress { .. } if connection == ConnectionState::Buffering => {
                self.set_connection(ConnectionState::Playing);
                self.set_status("Live");
            }
            MediaEvent::Error(message) if connection.is_active() => {
                tracing::error!("Stream playback error: {}", message);
                self.fail(&PlayerError::network(message));
            }
            MediaEvent::Ended if connection.is_active() => {
                tracing::error!("Live stream ended unexpectedly");
                self.fail(&PlayerError::network("stream ended"));
            }
            _ => {}
        }
    }

    // ==========================================
    // QUERIES AND SUBSCRIPTIONS
    // ==========================================

    pub fn subscribe(&self) -> broadcast::Receiver<StreamEvent> {
        self.inner.events.subscribe()
    }

    pub fn session(&self) -> StreamSession {
        let state = self.state();
        StreamSession {
            stream_url: state.stream_url.clone(),
            connection_state: state.connection,
            volume: state.volume,
            muted: state.muted,
        }
    }

    pub fn stream_url(&self) -> Option<String> {
        self.state().stream_url.clone()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.state().connection
    }

    pub fn is_playing(&self) -> bool {
        self.connection_state().is_active()
    }

    pub fn volume(&self) -> f64 {
        self.state().volume
    }

    pub fn is_muted(&self) -> bool {
        self.state().muted
    }

    pub fn status_text(&self) -> String {
        self.state().status.clone()
    }

    pub fn metadata(&self) -> Option<MetadataSnapshot> {
        self.state().metadata.clone()
    }

    pub fn last_refreshed(&self) -> Option<DateTime<Utc>> {
        self.state().last_refreshed
    }

    pub fn retry_prompt(&self) -> Option<String> {
        self.state().retry_prompt.clone()
    }

    pub fn is_polling(&self) -> bool {
        self.inner.poller.is_active()
    }
}
