// ==========================================
// PLAYBACK CONTROLLER
// ==========================================
// Owns on-demand episode playback for one session: the playlist, the
// current episode, transport state, volume and speed.
//
// State machine:
//   Idle -> Loading -> Playing <-> Paused -> Ended -> Loading (auto-advance)
//                                                  -> Idle (end of playlist)
//   any state -> Error on load/playback failure; a new load recovers.
//
// The controller is a cheap cloneable handle. All clones share one
// session; state sits behind a mutex that is never held across an await.
//
// Loads are ordered by a generation counter: every load (and stop)
// bumps it, and a load whose generation is no longer current when its
// await resolves throws its result away.
//
// Analytics go out on `subscribe_analytics`. `set_podcast_context` and
// `record_download` are hooks for the host's podcast page and download
// manager; the terminal front-end has neither and does not call them.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::config::PlaybackConfig;
use crate::error::{PlayerError, Result};
use crate::events::{AnalyticsEvent, Notifier, PlaybackStatus, PlayerEvent};
use crate::format::{clamp_position, clamp_volume, known_duration};
use crate::persistence::PersistenceStore;
use crate::player::backend::{MediaBackend, MediaEvent, SourceKind};
use crate::player::episode::{Episode, Playlist, PodcastContext};
use crate::player::media_session::MediaSessionBridge;
use crate::player::speed::PlaybackSpeed;

/// Storage key of the persisted playback session
pub const SESSION_KEY: &str = "playback_session";

/// What gets written to the PersistenceStore
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub episode: Option<Episode>,
    pub current_time: f64,
    pub volume: f64,
    pub playback_speed: PlaybackSpeed,
}

/// Read-only view of the session for display surfaces
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackSession {
    pub current_episode: Option<Episode>,
    pub current_index: Option<usize>,
    pub status: PlaybackStatus,
    pub is_playing: bool,
    pub is_muted: bool,
    pub volume: f64,
    pub speed: PlaybackSpeed,
    pub position: f64,
    pub duration: Option<f64>,
}

/// How a load request finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    Playing,
    /// A newer load or a stop replaced this one; nothing was changed
    Superseded,
}

struct PlayerState {
    status: PlaybackStatus,
    playlist: Playlist,
    current_episode: Option<Episode>,
    current_index: Option<usize>,
    has_source: bool,
    position: f64,
    duration: Option<f64>,
    volume: f64,
    muted: bool,
    speed: PlaybackSpeed,
    last_persisted_position: f64,
    podcast: Option<PodcastContext>,
    // EpisodeStarted goes out once per load, not on every resume
    start_reported: bool,
}

impl PlayerState {
    fn new(volume: f64) -> Self {
        PlayerState {
            status: PlaybackStatus::Idle,
            playlist: Playlist::default(),
            current_episode: None,
            current_index: None,
            has_source: false,
            position: 0.0,
            duration: None,
            volume,
            muted: false,
            speed: PlaybackSpeed::Normal,
            last_persisted_position: 0.0,
            podcast: None,
            start_reported: false,
        }
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            episode: self.current_episode.clone(),
            current_time: self.position,
            volume: self.volume,
            playback_speed: self.speed,
        }
    }
}

struct Inner {
    backend: Arc<dyn MediaBackend>,
    store: PersistenceStore,
    bridge: MediaSessionBridge,
    config: PlaybackConfig,
    state: Mutex<PlayerState>,
    load_generation: AtomicU64,
    events: Notifier<PlayerEvent>,
    analytics: Notifier<AnalyticsEvent>,
    event_pump: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(pump) = self.event_pump.get_mut().unwrap_or_else(PoisonError::into_inner).take() {
            pump.abort();
        }
    }
}

#[derive(Clone)]
pub struct PlaybackController {
    inner: Arc<Inner>,
}

/// Non-owning handle used by background tasks
#[derive(Clone)]
pub struct WeakPlaybackController {
    inner: Weak<Inner>,
}

impl WeakPlaybackController {
    pub fn upgrade(&self) -> Option<PlaybackController> {
        self.inner.upgrade().map(|inner| PlaybackController { inner })
    }
}

impl PlaybackController {
    pub fn new(
        backend: Arc<dyn MediaBackend>,
        store: PersistenceStore,
        bridge: MediaSessionBridge,
        config: PlaybackConfig,
    ) -> Self {
        let volume = clamp_volume(config.default_volume);
        PlaybackController {
            inner: Arc::new(Inner {
                backend,
                store,
                bridge,
                config,
                state: Mutex::new(PlayerState::new(volume)),
                load_generation: AtomicU64::new(0),
                events: Notifier::new(),
                analytics: Notifier::new(),
                event_pump: Mutex::new(None),
            }),
        }
    }

    pub fn downgrade(&self) -> WeakPlaybackController {
        WeakPlaybackController {
            inner: Arc::downgrade(&self.inner),
        }
    }

    fn state(&self) -> MutexGuard<'_, PlayerState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: PlayerEvent) {
        self.inner.events.emit(event);
    }

    fn current_generation(&self) -> u64 {
        self.inner.load_generation.load(Ordering::SeqCst)
    }

    fn is_current(&self, generation: u64) -> bool {
        self.current_generation() == generation
    }

    // ==========================================
    // INITIALIZATION
    // ==========================================

    /// Reapplies persisted volume and speed, then starts listening to the
    /// backend. The persisted episode is deliberately not resumed.
    pub fn initialize(&self) {
        let restored = self.inner.store.load::<SessionSnapshot>(SESSION_KEY);
        let (volume, speed) = {
            let mut state = self.state();
            if let Some(snapshot) = &restored {
                state.volume = clamp_volume(snapshot.volume);
                state.speed = snapshot.playback_speed;
            }
            (state.volume, state.speed)
        };
        if restored.is_some() {
            tracing::info!("Restored volume {:.2} and speed {}", volume, speed.label());
        }

        self.inner.backend.set_volume(volume);
        self.inner.backend.set_rate(speed.rate());
        self.attach_backend_events();
    }

    /// Pumps backend MediaEvents into `handle_media_event` until the
    /// controller is dropped. Replaces any earlier pump.
    pub fn attach_backend_events(&self) {
        let mut rx = self.inner.backend.subscribe();
        let weak = self.downgrade();
        let pump = tokio::spawn(async move {
            loop {
                let event = match rx.recv().await {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::debug!("Dropped {} media events", skipped);
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                let Some(controller) = weak.upgrade() else {
                    break;
                };
                controller.handle_media_event(event);
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
    // LOADING
    // ==========================================

    /// Makes `episode` current, with `playlist` as the new navigation
    /// order, and starts playing it.
    ///
    /// The latest call wins: if another load or a stop happens while this
    /// one is resolving, this returns `LoadOutcome::Superseded` and leaves
    /// the newer state alone.
    pub async fn load_episode(&self, episode: Episode, playlist: Vec<Episode>) -> Result<LoadOutcome> {
        let generation = self.inner.load_generation.fetch_add(1, Ordering::SeqCst) + 1;

        {
            let mut state = self.state();
            state.playlist = Playlist::new(playlist);
            state.current_index = state.playlist.index_of(&episode.id);
            state.current_episode = Some(episode.clone());
            state.status = PlaybackStatus::Loading;
            state.has_source = false;
            state.position = 0.0;
            state.duration = known_duration(episode.duration_seconds);
            state.last_persisted_position = 0.0;
            state.start_reported = false;
        }
        tracing::info!("Loading episode '{}' ({})", episode.title, episode.id);
        self.emit(PlayerEvent::EpisodeChanged(Some(episode.clone())));
        self.emit(PlayerEvent::StateChanged(PlaybackStatus::Loading));
        self.inner.bridge.publish_episode(&episode);
        self.persist();

        let info = match self.inner.backend.load(&episode.audio_url, SourceKind::OnDemand).await {
            Ok(info) => info,
            Err(PlayerError::Superseded) => return Ok(LoadOutcome::Superseded),
            Err(e) => {
                if !self.is_current(generation) {
                    return Ok(LoadOutcome::Superseded);
                }
                tracing::error!("Failed to load '{}': {}", episode.title, e);
                self.fail(&e);
                return Err(e);
            }
        };

        if !self.is_current(generation) {
            tracing::debug!("Discarding stale load of '{}'", episode.title);
            return Ok(LoadOutcome::Superseded);
        }

        let (volume, muted, speed) = {
            let mut state = self.state();
            state.has_source = true;
            if let Some(duration) = known_duration(info.duration) {
                state.duration = Some(duration);
            }
            (state.volume, state.muted, state.speed)
        };
        self.inner.backend.set_volume(volume);
        self.inner.backend.set_muted(muted);
        self.inner.backend.set_rate(speed.rate());

        if self.start_playback(generation).await? {
            Ok(LoadOutcome::Playing)
        } else {
            Ok(LoadOutcome::Superseded)
        }
    }

    // Asks the backend to start and records the result. Returns false if
    // a newer load took over while waiting.
    async fn start_playback(&self, generation: u64) -> Result<bool> {
        let result = self.inner.backend.play().await;
        if !self.is_current(generation) {
            return Ok(false);
        }

        match result {
            Ok(()) => {
                let started = {
                    let mut state = self.state();
                    state.status = PlaybackStatus::Playing;
                    let first = !state.start_reported;
                    state.start_reported = true;
                    if first {
                        state.current_episode.clone()
                    } else {
                        None
                    }
                };
                self.emit(PlayerEvent::StateChanged(PlaybackStatus::Playing));
                self.inner.bridge.publish_playing(true);

                if let Some(episode) = started {
                    let podcast = self.podcast_for(&episode);
                    self.inner
                        .analytics
                        .emit(AnalyticsEvent::EpisodeStarted { episode, podcast });
                }
                Ok(true)
            }
            Err(e) => {
                // Never retried: the user has to press play again
                tracing::warn!("Playback start rejected: {}", e);
                self.state().status = PlaybackStatus::Paused;
                self.emit(PlayerEvent::StateChanged(PlaybackStatus::Paused));
                self.emit(PlayerEvent::error(&e));
                self.inner.bridge.publish_playing(false);
                Err(e)
            }
        }
    }

    fn fail(&self, err: &PlayerError) {
        if let Err(e) = self.inner.backend.release() {
            tracing::warn!("{}", PlayerError::teardown(e.to_string()));
        }
        {
            let mut state = self.state();
            state.status = PlaybackStatus::Error;
            state.has_source = false;
        }
        self.emit(PlayerEvent::StateChanged(PlaybackStatus::Error));
        self.emit(PlayerEvent::error(err));
        self.inner.bridge.publish_playing(false);
    }

    // ==========================================
    // TRANSPORT
    // ==========================================

    /// Starts or resumes playback. No-op without a source or when already
    /// playing.
    pub async fn play(&self) -> Result<()> {
        let generation = self.current_generation();
        let (status, has_source) = {
            let state = self.state();
            (state.status, state.has_source && state.current_episode.is_some())
        };
        if !has_source || matches!(status, PlaybackStatus::Playing | PlaybackStatus::Loading) {
            return Ok(());
        }

        // Finished episodes start over
        if matches!(status, PlaybackStatus::Ended | PlaybackStatus::Idle) {
            self.inner.backend.seek(0.0)?;
            self.state().position = 0.0;
        }

        self.start_playback(generation).await.map(|_| ())
    }

    /// Pauses playback. No-op unless playing.
    pub fn pause(&self) {
        if self.state().status != PlaybackStatus::Playing {
            return;
        }
        self.inner.backend.pause();
        let position = self.inner.backend.position();
        {
            let mut state = self.state();
            state.status = PlaybackStatus::Paused;
            state.position = clamp_position(position, state.duration);
        }
        self.emit(PlayerEvent::StateChanged(PlaybackStatus::Paused));
        self.inner.bridge.publish_playing(false);
        self.persist();
    }

    pub async fn toggle_play_pause(&self) -> Result<()> {
        if self.is_playing() {
            self.pause();
            Ok(())
        } else {
            self.play().await
        }
    }

    /// Back to Idle: releases the audio source, forgets the episode,
    /// resets speed and clears the persisted session.
    pub fn stop(&self) {
        // Any load still resolving is now stale
        self.inner.load_generation.fetch_add(1, Ordering::SeqCst);
        if let Err(e) = self.inner.backend.release() {
            tracing::warn!("{}", PlayerError::teardown(e.to_string()));
        }
        self.inner.backend.set_rate(PlaybackSpeed::Normal.rate());

        {
            let mut state = self.state();
            state.status = PlaybackStatus::Idle;
            state.playlist = Playlist::default();
            state.current_episode = None;
            state.current_index = None;
            state.has_source = false;
            state.position = 0.0;
            state.duration = None;
            state.speed = PlaybackSpeed::Normal;
            state.last_persisted_position = 0.0;
        }
        self.inner.store.clear(SESSION_KEY);
        self.inner.bridge.clear();
        tracing::info!("Playback stopped");

        self.emit(PlayerEvent::StateChanged(PlaybackStatus::Idle));
        self.emit(PlayerEvent::EpisodeChanged(None));
        self.emit(PlayerEvent::SpeedChanged(PlaybackSpeed::Normal));
    }

    // ==========================================
    // SEEKING
    // ==========================================

    /// Seeks to `percentage` (0-100) of the duration. No-op while the
    /// duration is unknown.
    pub fn seek_to(&self, percentage: f64) -> Result<()> {
        let Some(duration) = known_duration(self.state().duration) else {
            return Ok(());
        };
        let percentage = if percentage.is_nan() { 0.0 } else { percentage.clamp(0.0, 100.0) };
        self.seek_absolute(percentage / 100.0 * duration)
    }

    /// Seeks to an absolute position in seconds, clamped to [0, duration]
    pub fn seek_absolute(&self, position: f64) -> Result<()> {
        let (has_source, duration, rate, playing) = {
            let state = self.state();
            (
                state.has_source,
                state.duration,
                state.speed.rate(),
                state.status == PlaybackStatus::Playing,
            )
        };
        if !has_source {
            return Ok(());
        }

        let position = clamp_position(position, duration);
        self.inner.backend.seek(position)?;
        {
            let mut state = self.state();
            state.position = position;
            if state.status == PlaybackStatus::Ended {
                state.status = PlaybackStatus::Paused;
            }
        }
        self.emit(PlayerEvent::Progress { position, duration });
        if playing {
            self.inner.bridge.publish_position(duration, rate, position);
        }
        Ok(())
    }

    pub fn skip_forward(&self, seconds: f64) -> Result<()> {
        self.seek_absolute(self.position() + seconds)
    }

    pub fn skip_backward(&self, seconds: f64) -> Result<()> {
        self.seek_absolute(self.position() - seconds)
    }

    /// Configured skip step in seconds
    pub fn skip_step(&self) -> f64 {
        self.inner.config.skip_seconds
    }

    // ==========================================
    // VOLUME AND SPEED
    // ==========================================

    /// Sets volume, clamped to [0, 1], and persists it
    pub fn set_volume(&self, level: f64) {
        let volume = clamp_volume(level);
        let muted = {
            let mut state = self.state();
            state.volume = volume;
            state.muted
        };
        self.inner.backend.set_volume(volume);
        self.emit(PlayerEvent::VolumeChanged { volume, muted });
        self.persist();
    }

    pub fn toggle_mute(&self) -> bool {
        let (volume, muted) = {
            let mut state = self.state();
            state.muted = !state.muted;
            (state.volume, state.muted)
        };
        self.inner.backend.set_muted(muted);
        self.emit(PlayerEvent::VolumeChanged { volume, muted });
        muted
    }

    pub fn set_playback_speed(&self, speed: PlaybackSpeed) {
        self.state().speed = speed;
        self.inner.backend.set_rate(speed.rate());
        self.emit(PlayerEvent::SpeedChanged(speed));
        self.persist();
    }

    /// Moves to the next speed, wrapping from 2x back to 0.5x
    pub fn cycle_playback_speed(&self) -> PlaybackSpeed {
        let next = self.speed().next();
        self.set_playback_speed(next);
        next
    }

    // ==========================================
    // PLAYLIST NAVIGATION
    // ==========================================

    /// Loads the following episode. `Ok(None)` at the end of the playlist.
    pub async fn next_episode(&self) -> Result<Option<LoadOutcome>> {
        let target = {
            let state = self.state();
            state
                .current_index
                .filter(|_| state.playlist.has_next(state.current_index))
                .and_then(|index| state.playlist.get(index + 1).cloned())
                .map(|episode| (episode, state.playlist.episodes().to_vec()))
        };
        match target {
            Some((episode, playlist)) => self.load_episode(episode, playlist).await.map(Some),
            None => Ok(None),
        }
    }

    /// Loads the preceding episode. `Ok(None)` at the start of the playlist.
    pub async fn previous_episode(&self) -> Result<Option<LoadOutcome>> {
        let target = {
            let state = self.state();
            state
                .current_index
                .filter(|_| state.playlist.has_previous(state.current_index))
                .and_then(|index| state.playlist.get(index - 1).cloned())
                .map(|episode| (episode, state.playlist.episodes().to_vec()))
        };
        match target {
            Some((episode, playlist)) => self.load_episode(episode, playlist).await.map(Some),
            None => Ok(None),
        }
    }

    // ==========================================
    // MEDIA SUBSYSTEM EVENTS
    // ==========================================

    /// Reacts to one notification from the media backend.
    ///
    /// Returns the auto-advance task when end-of-media schedules one.
    pub fn handle_media_event(&self, event: MediaEvent) -> Option<JoinHandle<()>> {
        match event {
            MediaEvent::Progress { position, duration } => {
                self.on_progress(position, duration);
                None
            }
            MediaEvent::Ended => self.on_ended(),
            MediaEvent::Error(message) => {
                let active = matches!(
                    self.status(),
                    PlaybackStatus::Loading | PlaybackStatus::Playing | PlaybackStatus::Paused
                );
                if active {
                    tracing::error!("Playback error: {}", message);
                    self.fail(&PlayerError::load(message));
                }
                None
            }
            MediaEvent::Buffering | MediaEvent::Resumed => {
                tracing::trace!("Buffering state: {:?}", event);
                None
            }
        }
    }

    fn on_progress(&self, position: f64, duration: Option<f64>) {
        let (position, duration, rate, playing, persist_due) = {
            let mut state = self.state();
            if !matches!(state.status, PlaybackStatus::Playing | PlaybackStatus::Paused) {
                return;
            }
            if let Some(duration) = known_duration(duration) {
                state.duration = Some(duration);
            }
            state.position = clamp_position(position, state.duration);
            let moved = (state.position - state.last_persisted_position).abs();
            (
                state.position,
                state.duration,
                state.speed.rate(),
                state.status == PlaybackStatus::Playing,
                moved >= self.inner.config.progress_persist_interval_secs,
            )
        };

        self.emit(PlayerEvent::Progress { position, duration });
        if playing {
            self.inner.bridge.publish_position(duration, rate, position);
        }
        if persist_due {
            self.persist();
        }
    }

    fn on_ended(&self) -> Option<JoinHandle<()>> {
        let has_next = {
            let mut state = self.state();
            if state.status != PlaybackStatus::Playing {
                return None;
            }
            state.status = PlaybackStatus::Ended;
            if let Some(duration) = state.duration {
                state.position = duration;
            }
            state.playlist.has_next(state.current_index)
        };
        self.emit(PlayerEvent::StateChanged(PlaybackStatus::Ended));
        self.inner.bridge.publish_playing(false);
        self.persist();

        if !has_next {
            // End of the playlist: no wraparound
            self.state().status = PlaybackStatus::Idle;
            self.emit(PlayerEvent::StateChanged(PlaybackStatus::Idle));
            tracing::info!("Reached end of playlist");
            return None;
        }

        let generation = self.current_generation();
        let delay = self.inner.config.auto_advance_delay();
        let weak = self.downgrade();
        Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(controller) = weak.upgrade() else {
                return;
            };
            // User loaded or stopped something during the delay
            if !controller.is_current(generation) || controller.status() != PlaybackStatus::Ended {
                return;
            }
            if let Err(e) = controller.next_episode().await {
                tracing::warn!("Auto-advance failed: {}", e);
            }
        }))
    }

    // ==========================================
    // ANALYTICS AND CONTEXT
    // ==========================================

    /// Podcast reported in analytics instead of the episode's own
    pub fn set_podcast_context(&self, podcast: Option<PodcastContext>) {
        self.state().podcast = podcast;
    }

    fn podcast_for(&self, episode: &Episode) -> PodcastContext {
        self.state().podcast.clone().unwrap_or_else(|| episode.podcast())
    }

    /// Reports that the user downloaded `episode`
    pub fn record_download(&self, episode: &Episode) {
        let podcast = self.podcast_for(episode);
        self.inner.analytics.emit(AnalyticsEvent::EpisodeDownloaded {
            episode: episode.clone(),
            podcast,
        });
    }

    fn persist(&self) {
        let snapshot = {
            let mut state = self.state();
            state.last_persisted_position = state.position;
            state.snapshot()
        };
        if let Err(e) = self.inner.store.save(SESSION_KEY, &snapshot) {
            tracing::warn!("Failed to persist playback session: {}", e);
        }
    }

    // ==========================================
    // QUERIES AND SUBSCRIPTIONS
    // ==========================================

    pub fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.inner.events.subscribe()
    }

    pub fn subscribe_analytics(&self) -> broadcast::Receiver<AnalyticsEvent> {
        self.inner.analytics.subscribe()
    }

    pub fn bridge(&self) -> &MediaSessionBridge {
        &self.inner.bridge
    }

    pub fn session(&self) -> PlaybackSession {
        let state = self.state();
        PlaybackSession {
            current_episode: state.current_episode.clone(),
            current_index: state.current_index,
            status: state.status,
            is_playing: state.status == PlaybackStatus::Playing,
            is_muted: state.muted,
            volume: state.volume,
            speed: state.speed,
            position: state.position,
            duration: state.duration,
        }
    }

    pub fn current_episode(&self) -> Option<Episode> {
        self.state().current_episode.clone()
    }

    pub fn current_index(&self) -> Option<usize> {
        self.state().current_index
    }

    pub fn playlist(&self) -> Vec<Episode> {
        self.state().playlist.episodes().to_vec()
    }

    pub fn status(&self) -> PlaybackStatus {
        self.state().status
    }

    pub fn is_playing(&self) -> bool {
        self.status() == PlaybackStatus::Playing
    }

    pub fn is_muted(&self) -> bool {
        self.state().muted
    }

    pub fn volume(&self) -> f64 {
        self.state().volume
    }

    pub fn speed(&self) -> PlaybackSpeed {
        self.state().speed
    }

    /// Live position while playing, last known otherwise
    pub fn position(&self) -> f64 {
        let (status, position, duration) = {
            let state = self.state();
            (state.status, state.position, state.duration)
        };
        if status == PlaybackStatus::Playing {
            clamp_position(self.inner.backend.position(), duration)
        } else {
            position
        }
    }

    pub fn duration(&self) -> Option<f64> {
        self.state().duration
    }
}
