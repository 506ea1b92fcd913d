// ==========================================
// LIVE STREAM METADATA
// ==========================================
// What is airing now and next, as returned by the metadata endpoint.
// Each successful poll replaces the snapshot wholesale. Polls are
// compared on `current` only, so a station that re-sends the same show
// does not make the display reflow.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Station {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub image: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentShow {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub artist: String,
    #[serde(default)]
    pub show: String,
    #[serde(default)]
    pub hosts: String,
    #[serde(default)]
    pub start: String,
    #[serde(default)]
    pub end: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pledge_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub song_summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artist_summary: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NextShow {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub start: String,
    #[serde(default)]
    pub end: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataSnapshot {
    #[serde(default)]
    pub station: Station,
    #[serde(default)]
    pub current: CurrentShow,
    #[serde(default)]
    pub next: NextShow,
}

impl MetadataSnapshot {
    /// Field-by-field comparison of the `current` blocks, whatever the
    /// station or next fields say.
    pub fn same_show(&self, other: &MetadataSnapshot) -> bool {
        self.current == other.current
    }

    /// One-line summary for status bars
    pub fn now_playing_line(&self) -> String {
        let current = &self.current;
        match (current.title.is_empty(), current.artist.is_empty()) {
            (false, false) => format!("{} - {}", current.artist, current.title),
            (false, true) => current.title.clone(),
            (true, false) => current.artist.clone(),
            (true, true) if !current.show.is_empty() => current.show.clone(),
            _ => self.station.name.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(title: &str) -> MetadataSnapshot {
        MetadataSnapshot {
            station: Station {
                name: "KPOD".to_string(),
                image: "https://radio.test/logo.png".to_string(),
            },
            current: CurrentShow {
                title: title.to_string(),
                artist: "The Band".to_string(),
                show: "Morning Mix".to_string(),
                hosts: "Sam".to_string(),
                start: "08:00".to_string(),
                end: "10:00".to_string(),
                ..Default::default()
            },
            next: NextShow {
                title: "Noon News".to_string(),
                start: "10:00".to_string(),
                end: "11:00".to_string(),
            },
        }
    }

    #[test]
    fn comparison_only_looks_at_current() {
        let a = snapshot("Song A");
        let mut b = snapshot("Song A");
        b.next.title = "Something else".to_string();
        b.station.name = "Renamed".to_string();

        assert!(a.same_show(&b));
        assert!(!a.same_show(&snapshot("Song B")));
    }

    #[test]
    fn optional_fields_count_as_a_change() {
        let a = snapshot("Song A");
        let mut b = a.clone();
        b.current.song_summary = Some("A summary".to_string());
        assert!(!a.same_show(&b));
    }

    #[test]
    fn parses_partial_payload() {
        let json = r#"{
            "station": {"name": "KPOD"},
            "current": {"title": "Song A", "artist": "The Band", "pledge_url": "https://give.test"}
        }"#;
        let parsed: MetadataSnapshot = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.station.name, "KPOD");
        assert_eq!(parsed.current.pledge_url.as_deref(), Some("https://give.test"));
        assert!(parsed.next.title.is_empty());
    }

    #[test]
    fn now_playing_line_falls_back() {
        assert_eq!(snapshot("Song A").now_playing_line(), "The Band - Song A");

        let mut empty = MetadataSnapshot::default();
        empty.station.name = "KPOD".to_string();
        assert_eq!(empty.now_playing_line(), "KPOD");
    }
}
