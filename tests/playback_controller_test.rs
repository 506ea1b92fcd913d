//! Integration tests for the on-demand playback controller
//!
//! Every test drives the public controller API against a scriptable fake
//! backend, so load ordering and end-of-media can be controlled exactly.

mod common;

use common::*;
use podplay::error::{ErrorKind, PlayerError};
use podplay::events::{AnalyticsEvent, PlaybackStatus, PlayerEvent};
use podplay::persistence::PersistenceStore;
use podplay::player::backend::{MediaBackend, MediaEvent};
use podplay::player::controller::{LoadOutcome, SessionSnapshot, SESSION_KEY};
use podplay::player::episode::PodcastContext;
use podplay::player::speed::PlaybackSpeed;
use tokio::sync::broadcast;

fn drain<T: Clone>(rx: &mut broadcast::Receiver<T>) -> Vec<T> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

// ===== Loading =====

#[tokio::test]
async fn load_sets_current_episode_and_index() {
    let backend = FakeBackend::new();
    let player = player(backend.clone());
    let playlist = episodes(4);

    for (index, episode) in playlist.iter().enumerate() {
        let outcome = player.load_episode(episode.clone(), playlist.clone()).await.unwrap();
        assert_eq!(outcome, LoadOutcome::Playing);
        assert_eq!(player.current_episode().as_ref(), Some(episode));
        assert_eq!(player.current_index(), Some(index));
        assert_eq!(player.status(), PlaybackStatus::Playing);
        assert_eq!(backend.source().as_deref(), Some(episode.audio_url.as_str()));
    }
}

#[tokio::test]
async fn episode_outside_playlist_has_no_index() {
    let player = player(FakeBackend::new());

    player.load_episode(episode(9), episodes(3)).await.unwrap();

    assert_eq!(player.current_episode().map(|e| e.id), Some("ep9".to_string()));
    assert_eq!(player.current_index(), None);
    assert_eq!(player.next_episode().await.unwrap(), None);
}

#[tokio::test]
async fn load_replaces_the_playlist() {
    let player = player(FakeBackend::new());
    player.load_episode(episode(1), episodes(5)).await.unwrap();
    assert_eq!(player.playlist().len(), 5);

    player.load_episode(episode(2), vec![episode(2)]).await.unwrap();
    assert_eq!(player.playlist().len(), 1);
    assert_eq!(player.current_index(), Some(0));
}

#[tokio::test]
async fn stale_load_never_overwrites_newer_one() {
    let backend = FakeBackend::new();
    let player = player(backend.clone());
    let playlist = episodes(2);
    let (a, b) = (playlist[0].clone(), playlist[1].clone());
    backend.gate(&a.audio_url);

    let slow = {
        let player = player.clone();
        let playlist = playlist.clone();
        spawn_and_settle(async move { player.load_episode(a, playlist).await }).await
    };
    assert_eq!(player.status(), PlaybackStatus::Loading);

    let outcome = player.load_episode(b.clone(), playlist.clone()).await.unwrap();
    assert_eq!(outcome, LoadOutcome::Playing);

    backend.open_gate(&playlist[0].audio_url);
    let stale = slow.await.unwrap().unwrap();

    assert_eq!(stale, LoadOutcome::Superseded);
    assert_eq!(player.current_episode(), Some(b));
    assert_eq!(player.current_index(), Some(1));
    assert_eq!(player.status(), PlaybackStatus::Playing);
}

#[tokio::test]
async fn load_error_surfaces_and_does_not_skip_ahead() {
    let backend = FakeBackend::new();
    let player = player(backend.clone());
    let playlist = episodes(3);
    backend.fail_loads_of(&playlist[0].audio_url);
    let mut rx = player.subscribe();

    let err = player.load_episode(playlist[0].clone(), playlist.clone()).await.unwrap_err();

    assert!(matches!(err, PlayerError::Load(_)));
    assert_eq!(player.status(), PlaybackStatus::Error);
    assert_eq!(player.current_index(), Some(0));
    assert_eq!(backend.count_calls("load"), 1);
    assert!(backend.releases() >= 1);
    assert!(drain(&mut rx)
        .iter()
        .any(|e| matches!(e, PlayerEvent::Error { kind: ErrorKind::Load, .. })));

    // A new load recovers from Error
    player.load_episode(playlist[1].clone(), playlist).await.unwrap();
    assert_eq!(player.status(), PlaybackStatus::Playing);
}

#[tokio::test]
async fn rejected_play_is_reported_once_and_not_retried() {
    let backend = FakeBackend::new();
    let player = player(backend.clone());
    backend.reject_play(true);
    let mut rx = player.subscribe();

    let err = player.load_episode(episode(1), episodes(2)).await.unwrap_err();

    assert!(matches!(err, PlayerError::PlaybackRejected(_)));
    assert_eq!(player.status(), PlaybackStatus::Paused);
    assert_eq!(backend.count_calls("play"), 1);
    assert!(drain(&mut rx).iter().any(|e| matches!(
        e,
        PlayerEvent::Error {
            kind: ErrorKind::PlaybackRejected,
            ..
        }
    )));

    // The user presses play again
    backend.reject_play(false);
    player.play().await.unwrap();
    assert_eq!(player.status(), PlaybackStatus::Playing);
    assert_eq!(backend.count_calls("play"), 2);
}

// ===== Transport =====

#[tokio::test]
async fn play_and_pause_are_idempotent() {
    let backend = FakeBackend::new();
    let player = player(backend.clone());
    player.load_episode(episode(1), episodes(1)).await.unwrap();

    let plays = backend.count_calls("play");
    player.play().await.unwrap();
    assert_eq!(backend.count_calls("play"), plays);
    assert_eq!(player.status(), PlaybackStatus::Playing);

    player.pause();
    let pauses = backend.count_calls("pause");
    let session = player.session();
    player.pause();
    assert_eq!(backend.count_calls("pause"), pauses);
    assert_eq!(player.session(), session);
    assert_eq!(player.status(), PlaybackStatus::Paused);
}

#[tokio::test]
async fn play_without_source_does_nothing() {
    let backend = FakeBackend::new();
    let player = player(backend.clone());

    player.play().await.unwrap();

    assert_eq!(player.status(), PlaybackStatus::Idle);
    assert!(backend.calls().is_empty());
}

#[tokio::test]
async fn toggle_switches_between_playing_and_paused() {
    let player = player(FakeBackend::new());
    player.load_episode(episode(1), episodes(1)).await.unwrap();

    player.toggle_play_pause().await.unwrap();
    assert_eq!(player.status(), PlaybackStatus::Paused);
    player.toggle_play_pause().await.unwrap();
    assert!(player.is_playing());
}

#[tokio::test]
async fn stop_resets_everything() {
    let backend = FakeBackend::new();
    let store = PersistenceStore::in_memory();
    let player = player_with(backend.clone(), store.clone());
    player.load_episode(episode(1), episodes(2)).await.unwrap();
    player.set_playback_speed(PlaybackSpeed::OneAndHalf);
    backend.set_position(120.0);
    player.pause();
    assert!(store.load::<SessionSnapshot>(SESSION_KEY).is_some());

    player.stop();

    assert_eq!(player.status(), PlaybackStatus::Idle);
    assert_eq!(player.current_episode(), None);
    assert_eq!(player.current_index(), None);
    assert_eq!(player.position(), 0.0);
    assert_eq!(player.speed(), PlaybackSpeed::Normal);
    assert_eq!(backend.rate(), 1.0);
    assert_eq!(backend.source(), None);
    assert!(store.load::<SessionSnapshot>(SESSION_KEY).is_none());

    // Nothing to play any more
    player.play().await.unwrap();
    assert_eq!(player.status(), PlaybackStatus::Idle);
}

// ===== Seeking =====

#[tokio::test]
async fn seek_to_percentage_of_duration() {
    let backend = FakeBackend::new();
    let player = player(backend.clone());
    player.load_episode(episode(1), episodes(1)).await.unwrap();

    player.seek_to(50.0).unwrap();
    assert_eq!(backend.position(), 300.0);

    player.seek_to(250.0).unwrap();
    assert_eq!(backend.position(), 600.0);
}

#[tokio::test]
async fn seek_to_without_duration_is_ignored() {
    let backend = FakeBackend::new();
    backend.set_duration(None);
    let player = player(backend.clone());
    let mut unknown = episode(1);
    unknown.duration_seconds = None;
    player.load_episode(unknown.clone(), vec![unknown]).await.unwrap();

    player.seek_to(50.0).unwrap();

    assert_eq!(backend.count_calls("seek"), 0);
}

#[tokio::test]
async fn skips_clamp_to_episode_bounds() {
    let backend = FakeBackend::new();
    let player = player(backend.clone());
    player.load_episode(episode(1), episodes(1)).await.unwrap();
    backend.set_position(590.0);

    player.skip_forward(player.skip_step()).unwrap();
    assert_eq!(backend.position(), 600.0);

    backend.set_position(5.0);
    player.skip_backward(15.0).unwrap();
    assert_eq!(backend.position(), 0.0);

    backend.set_position(100.0);
    player.skip_forward(15.0).unwrap();
    assert_eq!(backend.position(), 115.0);
}

// ===== Volume and speed =====

#[tokio::test]
async fn volume_is_clamped_applied_and_persisted() {
    let backend = FakeBackend::new();
    let store = PersistenceStore::in_memory();
    let player = player_with(backend.clone(), store.clone());

    player.set_volume(-1.0);
    assert_eq!(player.volume(), 0.0);

    player.set_volume(5.0);
    assert_eq!(player.volume(), 1.0);
    assert_eq!(backend.volume(), 1.0);

    player.set_volume(0.35);
    let saved: SessionSnapshot = store.load(SESSION_KEY).unwrap();
    assert_eq!(saved.volume, 0.35);
}

#[tokio::test]
async fn mute_toggles_without_touching_volume() {
    let backend = FakeBackend::new();
    let player = player(backend.clone());
    player.set_volume(0.6);

    assert!(player.toggle_mute());
    assert!(player.is_muted());
    assert!(backend.muted());
    assert_eq!(player.volume(), 0.6);

    assert!(!player.toggle_mute());
    assert!(!backend.muted());
}

#[tokio::test]
async fn speed_cycle_wraps_after_six_steps() {
    let backend = FakeBackend::new();
    let player = player(backend.clone());
    player.set_playback_speed(PlaybackSpeed::Half);

    let mut seen = Vec::new();
    for _ in 0..6 {
        seen.push(player.cycle_playback_speed().rate());
    }

    assert_eq!(seen, vec![0.75, 1.0, 1.25, 1.5, 2.0, 0.5]);
    assert_eq!(player.speed(), PlaybackSpeed::Half);
    assert_eq!(backend.rate(), 0.5);
}

// ===== Navigation =====

#[tokio::test]
async fn next_and_previous_stop_at_boundaries() {
    let backend = FakeBackend::new();
    let player = player(backend.clone());
    let playlist = episodes(2);
    player.load_episode(playlist[0].clone(), playlist.clone()).await.unwrap();

    assert_eq!(player.previous_episode().await.unwrap(), None);
    assert_eq!(player.current_index(), Some(0));

    assert_eq!(player.next_episode().await.unwrap(), Some(LoadOutcome::Playing));
    assert_eq!(player.current_index(), Some(1));

    assert_eq!(player.next_episode().await.unwrap(), None);
    assert_eq!(player.current_index(), Some(1));
    assert_eq!(backend.count_calls("load"), 2);

    assert_eq!(player.previous_episode().await.unwrap(), Some(LoadOutcome::Playing));
    assert_eq!(player.current_episode(), Some(playlist[0].clone()));
}

// ===== End of media =====

#[tokio::test]
async fn natural_end_advances_after_delay() {
    let backend = FakeBackend::new();
    let player = player(backend.clone());
    let playlist = episodes(2);
    player.load_episode(playlist[0].clone(), playlist.clone()).await.unwrap();

    let advance = player.handle_media_event(MediaEvent::Ended).expect("advance scheduled");

    // Nothing moves before the delay
    assert_eq!(player.status(), PlaybackStatus::Ended);
    assert_eq!(player.current_episode(), Some(playlist[0].clone()));

    advance.await.unwrap();
    assert_eq!(player.current_episode(), Some(playlist[1].clone()));
    assert_eq!(player.current_index(), Some(1));
    assert_eq!(player.status(), PlaybackStatus::Playing);
}

#[tokio::test]
async fn natural_end_of_last_episode_stays_stopped() {
    let backend = FakeBackend::new();
    let player = player(backend.clone());
    let only = episode(1);
    player.load_episode(only.clone(), vec![only.clone()]).await.unwrap();

    assert!(player.handle_media_event(MediaEvent::Ended).is_none());
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    assert_eq!(player.status(), PlaybackStatus::Idle);
    assert_eq!(player.current_episode(), Some(only));
    assert_eq!(backend.count_calls("load"), 1);

    // Play starts the finished episode over
    player.play().await.unwrap();
    assert!(backend.calls().contains(&"seek 0".to_string()));
    assert!(player.is_playing());
}

#[tokio::test]
async fn stop_during_advance_delay_cancels_it() {
    let backend = FakeBackend::new();
    let player = player(backend.clone());
    let playlist = episodes(2);
    player.load_episode(playlist[0].clone(), playlist.clone()).await.unwrap();

    let advance = player.handle_media_event(MediaEvent::Ended).unwrap();
    player.stop();
    advance.await.unwrap();

    assert_eq!(player.current_episode(), None);
    assert_eq!(backend.count_calls("load"), 1);
}

#[tokio::test]
async fn media_error_halts_without_advancing() {
    let backend = FakeBackend::new();
    let player = player(backend.clone());
    let playlist = episodes(3);
    player.load_episode(playlist[0].clone(), playlist).await.unwrap();

    let advance = player.handle_media_event(MediaEvent::Error("decoder gave up".to_string()));

    assert!(advance.is_none());
    assert_eq!(player.status(), PlaybackStatus::Error);
    assert_eq!(player.current_index(), Some(0));
    assert_eq!(backend.count_calls("load"), 1);
}

// ===== Persistence =====

#[tokio::test]
async fn progress_is_persisted_every_ten_seconds_of_movement() {
    let backend = FakeBackend::new();
    let store = PersistenceStore::in_memory();
    let player = player_with(backend.clone(), store.clone());
    player.load_episode(episode(1), episodes(1)).await.unwrap();

    player.handle_media_event(MediaEvent::Progress {
        position: 4.0,
        duration: Some(600.0),
    });
    let saved: SessionSnapshot = store.load(SESSION_KEY).unwrap();
    assert_eq!(saved.current_time, 0.0);

    // Ticks rarely land on exact multiples of ten
    player.handle_media_event(MediaEvent::Progress {
        position: 10.3,
        duration: Some(600.0),
    });
    let saved: SessionSnapshot = store.load(SESSION_KEY).unwrap();
    assert_eq!(saved.current_time, 10.3);
    assert_eq!(saved.episode.map(|e| e.id), Some("ep1".to_string()));
}

#[tokio::test]
async fn initialize_restores_settings_but_not_the_episode() {
    let store = PersistenceStore::in_memory();
    store
        .save(
            SESSION_KEY,
            &SessionSnapshot {
                episode: Some(episode(3)),
                current_time: 42.0,
                volume: 0.3,
                playback_speed: PlaybackSpeed::OneAndHalf,
            },
        )
        .unwrap();

    let backend = FakeBackend::new();
    let player = player_with(backend.clone(), store);
    player.initialize();

    assert_eq!(player.volume(), 0.3);
    assert_eq!(player.speed(), PlaybackSpeed::OneAndHalf);
    assert_eq!(backend.volume(), 0.3);
    assert_eq!(backend.rate(), 1.5);
    assert_eq!(player.current_episode(), None);
    assert_eq!(player.status(), PlaybackStatus::Idle);
    assert_eq!(backend.count_calls("load"), 0);
}

#[tokio::test]
async fn backend_events_reach_the_controller_after_initialize() {
    let backend = FakeBackend::new();
    let player = player(backend.clone());
    player.initialize();
    let playlist = episodes(2);
    player.load_episode(playlist[0].clone(), playlist.clone()).await.unwrap();

    backend.emit(MediaEvent::Ended);

    let advanced = wait_until(|| player.current_index() == Some(1)).await;
    assert!(advanced);
}

// ===== Analytics =====

#[tokio::test]
async fn episode_start_is_reported_once_per_load() {
    let player = player(FakeBackend::new());
    let mut analytics = player.subscribe_analytics();

    player.load_episode(episode(1), episodes(1)).await.unwrap();
    player.pause();
    player.play().await.unwrap();

    let events = drain(&mut analytics);
    assert_eq!(events.len(), 1);
    match &events[0] {
        AnalyticsEvent::EpisodeStarted { episode, podcast } => {
            assert_eq!(episode.id, "ep1");
            assert_eq!(podcast.id, "pod1");
        }
        other => panic!("unexpected event {:?}", other),
    }
}

#[tokio::test]
async fn explicit_podcast_context_wins() {
    let player = player(FakeBackend::new());
    let mut analytics = player.subscribe_analytics();
    let context = PodcastContext {
        id: "featured".to_string(),
        title: "Featured Shows".to_string(),
    };
    player.set_podcast_context(Some(context.clone()));

    player.record_download(&episode(2));

    match drain(&mut analytics).pop() {
        Some(AnalyticsEvent::EpisodeDownloaded { episode, podcast }) => {
            assert_eq!(episode.id, "ep2");
            assert_eq!(podcast, context);
        }
        other => panic!("unexpected event {:?}", other),
    }
}
