use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, LazyLock};

use regex::Regex;

/// A candidate series entry returned by search. Dedup key is the URL.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Subject {
    /// Internal id, stable within one fetch invocation only.
    pub internal_id: String,
    pub name: String,
    /// Absolute URL of the subject's details page.
    pub url: String,
}

/// A single installment belonging to a [`Subject`].
#[derive(Debug, Clone, PartialEq)]
pub struct Episode {
    /// Owning subject, shared for lookup only.
    pub subject: Arc<Subject>,
    pub name: String,
    /// Absolute URL of the episode's play page.
    pub url: String,
    /// Optional channel/quality grouping label.
    pub channel: Option<String>,
    /// Ordinal parsed from the episode name, when recognisable.
    pub sort: Option<EpisodeSort>,
}

/// Episode extracted from a page, before it is tied to a subject.
#[derive(Debug, Clone, PartialEq)]
pub struct EpisodeInfo {
    pub name: String,
    pub url: String,
    pub channel: Option<String>,
    pub sort: Option<EpisodeSort>,
}

/// Episode ordinal: a number for regular installments, a raw label for
/// specials ("OVA", "SP") that carry no number.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(untagged)]
pub enum EpisodeSort {
    Number(u32),
    Special(String),
}

static SORT_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"第(\d+)[集话]",
        r"(?i)EP\s*(\d+)",
        r"(?i)Episode\s*(\d+)",
        r"(\d+)[集话]",
        r"^(\d+)$",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("static episode pattern"))
    .collect()
});

impl EpisodeSort {
    /// Parse an ordinal out of an episode name (第3集, EP03, Episode 3,
    /// bare "3"). Returns `None` when no number is recognisable.
    pub fn parse(name: &str) -> Option<Self> {
        let name = name.trim();
        for pattern in SORT_PATTERNS.iter() {
            if let Some(caps) = pattern.captures(name) {
                if let Ok(n) = caps[1].parse::<u32>() {
                    return Some(EpisodeSort::Number(n));
                }
            }
        }
        None
    }

    /// Build a sort from a user-supplied value: numeric strings become
    /// numbers, anything else is kept verbatim as a special label.
    pub fn from_value(value: &str) -> Self {
        match value.trim().parse::<u32>() {
            Ok(n) => EpisodeSort::Number(n),
            Err(_) => EpisodeSort::Special(value.trim().to_string()),
        }
    }
}

impl fmt::Display for EpisodeSort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EpisodeSort::Number(n) => write!(f, "{n}"),
            EpisodeSort::Special(s) => write!(f, "{s}"),
        }
    }
}

/// Outcome of matching one page against the video patterns.
#[derive(Debug, Clone, PartialEq)]
pub enum VideoMatch {
    /// A playable URL, with the configured headers attached.
    Matched {
        url: String,
        headers: HashMap<String, String>,
    },
    /// An intermediate page that must be fetched once more.
    Nested { url: String },
    NoMatch,
}

/// Where and how to download a resolved video.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct DownloadInfo {
    pub url: String,
    pub headers: HashMap<String, String>,
    pub cookies: String,
}

/// A fully resolved, playable media record.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Media {
    pub media_id: String,
    pub original_title: String,
    pub subject_name: String,
    pub episode_name: String,
    pub channel: Option<String>,
    pub download: DownloadInfo,
    pub resolution: String,
    pub subtitle_language: String,
    pub episode_sort: Option<EpisodeSort>,
}

/// What the caller is asking for.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct MediaFetchRequest {
    /// Candidate subject names, treated as unordered alternatives.
    pub subject_names: Vec<String>,
    /// Optional episode ordinal used for filtering.
    pub episode_sort: Option<EpisodeSort>,
}

/// Result of the lightweight connection probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionStatus {
    Success,
    Failed,
    NoMedia,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionStatus::Success => write!(f, "SUCCESS"),
            ConnectionStatus::Failed => write!(f, "FAILED"),
            ConnectionStatus::NoMedia => write!(f, "NO_MEDIA"),
        }
    }
}
