// Terminal stand-in for a system media-control surface.
// Now-playing metadata goes to the window title; hardware media keys the
// terminal reports (play, pause, next, ...) come back as MediaActions.

use crossterm::event::MediaKeyCode;
use crossterm::{execute, terminal::SetTitle};
use std::io;
use std::sync::{Mutex, PoisonError};
use tokio::sync::mpsc;

use crate::player::media_session::{MediaAction, MediaControlSurface, MediaMetadata, PositionState};

const IDLE_TITLE: &str = "podplay";

#[derive(Default)]
pub struct TerminalSurface {
    actions: Mutex<Option<mpsc::UnboundedSender<MediaAction>>>,
    title: Mutex<Option<String>>,
}

impl TerminalSurface {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forwards a media key to whoever attached to this surface.
    /// Returns false when the key has no transport meaning.
    pub fn press(&self, key: MediaKeyCode) -> bool {
        match action_for(key) {
            Some(action) => self.send(action),
            None => false,
        }
    }

    pub fn send(&self, action: MediaAction) -> bool {
        let actions = self.actions.lock().unwrap_or_else(PoisonError::into_inner);
        match actions.as_ref() {
            Some(tx) => tx.send(action).is_ok(),
            None => false,
        }
    }

    fn write_title(&self, title: &str) {
        // Title updates are cosmetic
        let _ = execute!(io::stdout(), SetTitle(title));
    }
}

/// Transport action of a hardware media key, if it has one
pub fn action_for(key: MediaKeyCode) -> Option<MediaAction> {
    let action = match key {
        MediaKeyCode::Play => MediaAction::Play,
        MediaKeyCode::Pause | MediaKeyCode::Stop => MediaAction::Pause,
        MediaKeyCode::TrackNext => MediaAction::NextTrack,
        MediaKeyCode::TrackPrevious => MediaAction::PreviousTrack,
        MediaKeyCode::FastForward => MediaAction::SeekForward(None),
        MediaKeyCode::Rewind => MediaAction::SeekBackward(None),
        _ => return None,
    };
    Some(action)
}

impl MediaControlSurface for TerminalSurface {
    fn set_metadata(&self, metadata: Option<&MediaMetadata>) {
        let title = metadata.map(|m| format!("{} - {}", m.title, m.artist));
        self.write_title(title.as_deref().unwrap_or(IDLE_TITLE));
        *self.title.lock().unwrap_or_else(PoisonError::into_inner) = title;
    }

    fn set_playing(&self, playing: bool) {
        let title = self.title.lock().unwrap_or_else(PoisonError::into_inner).clone();
        if let Some(title) = title {
            let marker = if playing { "▶" } else { "⏸" };
            self.write_title(&format!("{} {}", marker, title));
        }
    }

    fn set_position_state(&self, _state: PositionState) {
        // Terminals have no scrubber
    }

    fn attach_actions(&self, actions: mpsc::UnboundedSender<MediaAction>) {
        *self.actions.lock().unwrap_or_else(PoisonError::into_inner) = Some(actions);
    }
}
