// Playback speeds. Only these six values exist; cycling wraps from the
// fastest back to the slowest.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub enum PlaybackSpeed {
    Half,
    ThreeQuarters,
    #[default]
    Normal,
    OneAndQuarter,
    OneAndHalf,
    Double,
}

impl PlaybackSpeed {
    /// Ascending order
    pub const ALL: [PlaybackSpeed; 6] = [
        PlaybackSpeed::Half,
        PlaybackSpeed::ThreeQuarters,
        PlaybackSpeed::Normal,
        PlaybackSpeed::OneAndQuarter,
        PlaybackSpeed::OneAndHalf,
        PlaybackSpeed::Double,
    ];

    pub fn rate(self) -> f64 {
        match self {
            PlaybackSpeed::Half => 0.5,
            PlaybackSpeed::ThreeQuarters => 0.75,
            PlaybackSpeed::Normal => 1.0,
            PlaybackSpeed::OneAndQuarter => 1.25,
            PlaybackSpeed::OneAndHalf => 1.5,
            PlaybackSpeed::Double => 2.0,
        }
    }

    pub fn next(self) -> PlaybackSpeed {
        let index = Self::ALL.iter().position(|s| *s == self).unwrap_or(2);
        Self::ALL[(index + 1) % Self::ALL.len()]
    }

    /// Exact match against the supported rates
    pub fn from_rate(rate: f64) -> Option<PlaybackSpeed> {
        Self::ALL.iter().copied().find(|s| (s.rate() - rate).abs() < 1e-9)
    }

    pub fn label(self) -> String {
        format!("{}x", self.rate())
    }
}

impl From<PlaybackSpeed> for f64 {
    fn from(speed: PlaybackSpeed) -> f64 {
        speed.rate()
    }
}

impl TryFrom<f64> for PlaybackSpeed {
    type Error = String;

    fn try_from(rate: f64) -> Result<Self, Self::Error> {
        PlaybackSpeed::from_rate(rate).ok_or_else(|| format!("unsupported playback speed {}", rate))
    }
}
