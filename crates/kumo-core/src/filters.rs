//! Media filter pipeline.
//!
//! Predicates are combined by logical AND in configured order and
//! short-circuit per item. The pipeline is resolved from configuration
//! when the source is built; an unknown predicate name fails fast.

use std::collections::HashMap;
use std::sync::LazyLock;

use crate::config::SearchConfig;
use crate::error::SourceError;
use crate::models::{EpisodeSort, Media};

/// Request-side context predicates are evaluated against.
#[derive(Debug, Clone, Default)]
pub struct FilterContext {
    pub subject_names: Vec<String>,
    pub episode_sort: Option<EpisodeSort>,
}

/// A single media predicate.
pub trait MediaFilter: Send + Sync {
    fn keep(&self, media: &Media, ctx: &FilterContext) -> bool;
}

/// Language-id → title keywords, used both by the language predicate and
/// by subtitle-language guessing during media assembly.
pub(crate) static LANGUAGE_KEYWORDS: LazyLock<HashMap<&'static str, &'static [&'static str]>> =
    LazyLock::new(|| {
        HashMap::from([
            ("CHS", &["简", "简中", "简体"] as &[&str]),
            ("CHT", &["繁", "繁中", "繁体"]),
            ("JPN", &["日语", "日文"]),
            ("ENG", &["英语", "英文", "eng"]),
        ])
    });

/// Guess a subtitle-language id from channel and episode text.
pub(crate) fn guess_subtitle_language(channel: Option<&str>, episode_name: &str) -> Option<String> {
    let mut haystack = episode_name.to_string();
    if let Some(ch) = channel {
        haystack.push(' ');
        haystack.push_str(ch);
    }
    // CHT first: "简" would also substring-match inside mixed labels.
    for lang in ["CHT", "CHS", "JPN", "ENG"] {
        let keywords = LANGUAGE_KEYWORDS[lang];
        if keywords.iter().any(|k| haystack.contains(k)) {
            return Some(lang.to_string());
        }
    }
    None
}

/// Keeps media whose title contains every word of at least one of the
/// requested subject names.
struct ContainsSubjectName;

impl MediaFilter for ContainsSubjectName {
    fn keep(&self, media: &Media, ctx: &FilterContext) -> bool {
        if ctx.subject_names.is_empty() {
            return true;
        }
        let title = media.original_title.to_lowercase();
        ctx.subject_names.iter().any(|name| {
            let mut words = name.to_lowercase();
            words.retain(|c| c.is_alphanumeric() || c.is_whitespace());
            !words.trim().is_empty()
                && words.split_whitespace().all(|word| title.contains(word))
        })
    }
}

/// Keeps media compatible with the requested episode ordinal. Passes
/// everything when the request carries no episode criteria.
struct ContainsEpisodeInfo;

impl MediaFilter for ContainsEpisodeInfo {
    fn keep(&self, media: &Media, ctx: &FilterContext) -> bool {
        let Some(wanted) = &ctx.episode_sort else {
            return true;
        };
        if media.episode_sort.as_ref() == Some(wanted) {
            return true;
        }
        let title = media.original_title.to_lowercase();
        let n = wanted.to_string().to_lowercase();
        [
            format!("第{n}集"),
            format!("第{n}话"),
            format!("ep{n}"),
            format!("episode {n}"),
            format!(" {n} "),
        ]
        .iter()
        .any(|p| title.contains(p))
    }
}

/// Keeps media whose resolution or title matches one of the allowed
/// quality labels. An empty whitelist passes everything.
struct QualityIn {
    allowed: Vec<String>,
}

impl MediaFilter for QualityIn {
    fn keep(&self, media: &Media, _ctx: &FilterContext) -> bool {
        if self.allowed.is_empty() {
            return true;
        }
        let title = media.original_title.to_lowercase();
        let resolution = media.resolution.to_lowercase();
        self.allowed
            .iter()
            .any(|q| resolution == *q || title.contains(q))
    }
}

/// Keeps media whose subtitle language is in the allowed set, matching
/// either the language id or its title keywords.
struct LanguageIn {
    allowed: Vec<String>,
}

impl MediaFilter for LanguageIn {
    fn keep(&self, media: &Media, _ctx: &FilterContext) -> bool {
        if self.allowed.is_empty() {
            return true;
        }
        let title = media.original_title.to_lowercase();
        self.allowed.iter().any(|lang| {
            if media.subtitle_language.eq_ignore_ascii_case(lang) {
                return true;
            }
            match LANGUAGE_KEYWORDS.get(lang.to_uppercase().as_str()) {
                Some(keywords) => keywords.iter().any(|k| title.contains(k)),
                None => title.contains(&lang.to_lowercase()),
            }
        })
    }
}

/// Ordered AND-combination of predicates.
pub struct FilterPipeline {
    filters: Vec<Box<dyn MediaFilter>>,
}

impl std::fmt::Debug for FilterPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterPipeline")
            .field("filters", &self.filters.len())
            .finish()
    }
}

impl FilterPipeline {
    /// Resolve the pipeline from configuration. The explicit `filters`
    /// list wins; otherwise the two legacy toggles decide. Unknown
    /// predicate names are a config error.
    pub fn from_config(config: &SearchConfig) -> Result<Self, SourceError> {
        let names: Vec<String> = match &config.filters {
            Some(list) => list.clone(),
            None => {
                let mut names = Vec::new();
                if config.filter_by_subject_name {
                    names.push("contains_subject_name".to_string());
                }
                if config.filter_by_episode_sort {
                    names.push("contains_episode_info".to_string());
                }
                names
            }
        };

        let mut filters: Vec<Box<dyn MediaFilter>> = Vec::with_capacity(names.len());
        for name in &names {
            let filter: Box<dyn MediaFilter> = match name.as_str() {
                "contains_subject_name" => Box::new(ContainsSubjectName),
                "contains_episode_info" => Box::new(ContainsEpisodeInfo),
                "quality" => Box::new(QualityIn {
                    allowed: lowered(&config.filter_qualities),
                }),
                "language" => Box::new(LanguageIn {
                    allowed: config.filter_languages.clone(),
                }),
                other => {
                    return Err(SourceError::Config(format!(
                        "unknown filter predicate '{other}'"
                    )));
                }
            };
            filters.push(filter);
        }
        Ok(Self { filters })
    }

    /// Apply all predicates; an item survives only if every predicate
    /// keeps it. Order is preserved.
    pub fn apply(&self, media: Vec<Media>, ctx: &FilterContext) -> Vec<Media> {
        media
            .into_iter()
            .filter(|m| self.filters.iter().all(|f| f.keep(m, ctx)))
            .collect()
    }
}

fn lowered(values: &[String]) -> Vec<String> {
    values.iter().map(|v| v.to_lowercase()).collect()
}
