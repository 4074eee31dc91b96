//! Asset references supplied by callers

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Priority level attached to a reference
///
/// Informational at this layer; `load_all` only uses it to order submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Needed for immediate playback
    High = 0,
    /// Standard priority
    #[default]
    Medium = 1,
    /// Prefetch/background
    Low = 2,
}

impl Priority {
    /// Get numeric priority (lower = higher priority)
    pub fn as_u8(&self) -> u8 {
        *self as u8
    }
}

impl PartialOrd for Priority {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Priority {
    fn cmp(&self, other: &Self) -> Ordering {
        // Lower value = higher priority, so reverse the comparison
        other.as_u8().cmp(&self.as_u8())
    }
}

/// Payload kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum AssetKind {
    /// MIDI-like note sequence
    NoteSequence,
    /// Encoded audio
    #[default]
    Audio,
}

/// Category tag driving bucket resolution
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum AssetCategory {
    RhythmTrack,
    BassSample,
    LowFrequencySample,
    PercussionSample,
    Ambience,
    /// Any tag without a dedicated variant
    Other(String),
}

impl AssetCategory {
    /// Canonical kebab-case tag
    pub fn as_str(&self) -> &str {
        match self {
            AssetCategory::RhythmTrack => "rhythm-track",
            AssetCategory::BassSample => "bass-sample",
            AssetCategory::LowFrequencySample => "low-frequency-sample",
            AssetCategory::PercussionSample => "percussion-sample",
            AssetCategory::Ambience => "ambience",
            AssetCategory::Other(tag) => tag,
        }
    }
}

impl From<&str> for AssetCategory {
    fn from(tag: &str) -> Self {
        match tag.trim().to_ascii_lowercase().as_str() {
            "rhythm-track" => AssetCategory::RhythmTrack,
            "bass-sample" => AssetCategory::BassSample,
            "low-frequency-sample" => AssetCategory::LowFrequencySample,
            "percussion-sample" => AssetCategory::PercussionSample,
            "ambience" => AssetCategory::Ambience,
            other => AssetCategory::Other(other.to_string()),
        }
    }
}

impl From<String> for AssetCategory {
    fn from(tag: String) -> Self {
        AssetCategory::from(tag.as_str())
    }
}

impl From<AssetCategory> for String {
    fn from(category: AssetCategory) -> Self {
        category.as_str().to_string()
    }
}

impl FromStr for AssetCategory {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(AssetCategory::from(s))
    }
}

impl fmt::Display for AssetCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a thing to load
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssetReference {
    /// Stable key, typically a storage path or URL
    pub id: String,
    /// Category tag
    pub category: AssetCategory,
    /// Payload kind
    #[serde(default)]
    pub kind: AssetKind,
    /// Priority
    #[serde(default)]
    pub priority: Priority,
}

impl AssetReference {
    /// Create a new audio reference with medium priority
    pub fn new(id: impl Into<String>, category: impl Into<AssetCategory>) -> Self {
        Self {
            id: id.into(),
            category: category.into(),
            kind: AssetKind::Audio,
            priority: Priority::Medium,
        }
    }

    /// Set kind
    pub fn with_kind(mut self, kind: AssetKind) -> Self {
        self.kind = kind;
        self
    }

    /// Set priority
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }
}
