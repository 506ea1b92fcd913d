// ==========================================
// EPISODES AND PLAYLISTS
// ==========================================
// An Episode is one playable audio item, already parsed from a feed by
// whoever hands it to us. A Playlist is the ordered list of episodes
// that defines next/previous navigation for one playback session.
//
// Playlists are replaced wholesale on each load; nothing here mutates an
// episode once it has been loaded.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Episode {
    pub id: String,
    pub title: String,
    pub audio_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    pub podcast_id: String,
    pub podcast_title: String,
}

impl Episode {
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        audio_url: impl Into<String>,
        podcast_id: impl Into<String>,
        podcast_title: impl Into<String>,
    ) -> Self {
        Episode {
            id: id.into(),
            title: title.into(),
            audio_url: audio_url.into(),
            duration_seconds: None,
            image_url: None,
            podcast_id: podcast_id.into(),
            podcast_title: podcast_title.into(),
        }
    }

    pub fn with_duration(mut self, seconds: f64) -> Self {
        self.duration_seconds = Some(seconds);
        self
    }

    pub fn with_image(mut self, url: impl Into<String>) -> Self {
        self.image_url = Some(url.into());
        self
    }

    /// The podcast this episode belongs to, from its own fields
    pub fn podcast(&self) -> PodcastContext {
        PodcastContext {
            id: self.podcast_id.clone(),
            title: self.podcast_title.clone(),
        }
    }
}

/// The podcast currently shown by the surrounding app.
///
/// Handed to the controller explicitly instead of being looked up from
/// whatever page component happens to be on screen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodcastContext {
    pub id: String,
    pub title: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Playlist {
    episodes: Vec<Episode>,
}

impl Playlist {
    pub fn new(episodes: Vec<Episode>) -> Self {
        Playlist { episodes }
    }

    /// Position of the first episode with this id
    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.episodes.iter().position(|episode| episode.id == id)
    }

    pub fn get(&self, index: usize) -> Option<&Episode> {
        self.episodes.get(index)
    }

    pub fn len(&self) -> usize {
        self.episodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.episodes.is_empty()
    }

    pub fn episodes(&self) -> &[Episode] {
        &self.episodes
    }

    /// True if there is an episode after `index`
    pub fn has_next(&self, index: Option<usize>) -> bool {
        matches!(index, Some(i) if i + 1 < self.episodes.len())
    }

    pub fn has_previous(&self, index: Option<usize>) -> bool {
        matches!(index, Some(i) if i > 0 && i <= self.episodes.len())
    }
}

impl From<Vec<Episode>> for Playlist {
    fn from(episodes: Vec<Episode>) -> Self {
        Playlist::new(episodes)
    }
}
