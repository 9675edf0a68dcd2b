//! Declarative per-site configuration and its validated, compiled form.
//!
//! Raw [`SearchConfig`] is plain serde data the way users write it (JSON
//! file, API payload). [`SearchConfig::compile`] turns it into a frozen
//! [`CompiledSearch`] — parsed selectors, compiled patterns, resolved base
//! URL — failing fast with [`SourceError::Config`] so a bad selector can
//! never surface mid-fetch.

use std::collections::HashMap;
use std::time::Duration;

use regex::Regex;
use scraper::Selector;
use url::Url;

use crate::error::SourceError;
use crate::models::VideoMatch;

fn default_true() -> bool {
    true
}

fn default_one() -> usize {
    1
}

fn default_interval() -> f64 {
    3.0
}

fn default_resolution() -> String {
    "1080P".to_string()
}

fn default_subtitle_language() -> String {
    "CHS".to_string()
}

fn default_video_url_pattern() -> String {
    r#"(https?://[^\s'"<>]+(\.mp4|\.mkv|m3u8)[^\s'"<>]*)|akamaized|bilivideo\.com"#.to_string()
}

fn default_nested_url_pattern() -> String {
    r#"https?://[^\s'"<>]+(m3u8|vip|xigua\.php)[^\s'"<>]*\?[^\s'"<>]*"#.to_string()
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) \
     Chrome/58.0.3029.110 Safari/537.3"
        .to_string()
}

/// Strategy identifier for subject extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectFormatId {
    /// Selector triple: container, name text, url href.
    SubjectFormatA,
    /// Attribute-driven: name and url read from item attributes.
    SubjectFormatIndexed,
}

impl Default for SubjectFormatId {
    fn default() -> Self {
        SubjectFormatId::SubjectFormatA
    }
}

/// Strategy identifier for episode extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelFormatId {
    /// Flat episode list; channel label selected per episode, if at all.
    ChannelFormatNoChannel,
    /// Channel containers, each holding its own episode list.
    ChannelFormatIndexGrouped,
}

impl Default for ChannelFormatId {
    fn default() -> Self {
        ChannelFormatId::ChannelFormatNoChannel
    }
}

/// Selectors for pulling subjects out of a search-result page.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct SubjectFormatConfig {
    pub subject_selector: String,
    pub name_selector: String,
    pub url_selector: String,
    /// Attribute carrying the name in the indexed format (default `title`).
    pub name_attr: Option<String>,
    /// Attribute carrying the url in the indexed format (default `href`).
    pub url_attr: Option<String>,
}

/// Selectors for pulling episodes out of a subject page.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ChannelFormatConfig {
    pub episode_selector: String,
    pub name_selector: String,
    pub url_selector: String,
    /// Flat format: per-episode channel label node. Grouped format: the
    /// channel container selector.
    pub channel_selector: Option<String>,
    /// Grouped format only: channel label node within each container.
    pub channel_name_selector: Option<String>,
}

/// Static headers attached to every resolved video.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct VideoHeaders {
    pub referer: String,
    pub user_agent: String,
}

impl Default for VideoHeaders {
    fn default() -> Self {
        Self {
            referer: String::new(),
            user_agent: default_user_agent(),
        }
    }
}

/// Video URL matching configuration.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct MatchVideoConfig {
    pub enable_nested_url: bool,
    pub match_video_url: String,
    pub match_nested_url: String,
    pub cookies: String,
    pub add_headers_to_video: VideoHeaders,
}

impl Default for MatchVideoConfig {
    fn default() -> Self {
        Self {
            enable_nested_url: true,
            match_video_url: default_video_url_pattern(),
            match_nested_url: default_nested_url_pattern(),
            cookies: "quality=1080".to_string(),
            add_headers_to_video: VideoHeaders::default(),
        }
    }
}

/// Full per-site configuration, as written by users.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Search URL template; must contain `{keyword}`.
    pub search_url: String,
    pub search_use_only_first_word: bool,
    pub search_remove_special: bool,
    /// Maximum number of name variants tried per request.
    pub search_use_subject_names_count: usize,
    /// Base URL for resolving relative links; guessed from `search_url`
    /// when absent.
    pub base_url: Option<String>,
    /// Minimum spacing between outbound fetches, in seconds.
    pub request_interval_secs: f64,

    pub subject_format_id: SubjectFormatId,
    pub subject_format_config: SubjectFormatConfig,
    pub channel_format_id: ChannelFormatId,
    pub channel_format_config: ChannelFormatConfig,

    pub match_video: MatchVideoConfig,

    pub default_resolution: String,
    pub default_subtitle_language: String,
    pub only_supports_players: Vec<String>,

    /// Explicit ordered predicate list; when absent, derived from the
    /// two toggles below.
    pub filters: Option<Vec<String>>,
    pub filter_by_subject_name: bool,
    pub filter_by_episode_sort: bool,
    /// Quality whitelist for the `quality` predicate.
    pub filter_qualities: Vec<String>,
    /// Language-id whitelist for the `language` predicate.
    pub filter_languages: Vec<String>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            search_url: String::new(),
            search_use_only_first_word: default_true(),
            search_remove_special: default_true(),
            search_use_subject_names_count: default_one(),
            base_url: None,
            request_interval_secs: default_interval(),
            subject_format_id: SubjectFormatId::default(),
            subject_format_config: SubjectFormatConfig::default(),
            channel_format_id: ChannelFormatId::default(),
            channel_format_config: ChannelFormatConfig::default(),
            match_video: MatchVideoConfig::default(),
            default_resolution: default_resolution(),
            default_subtitle_language: default_subtitle_language(),
            only_supports_players: Vec::new(),
            filters: None,
            filter_by_subject_name: default_true(),
            filter_by_episode_sort: default_true(),
            filter_qualities: Vec::new(),
            filter_languages: Vec::new(),
        }
    }
}

/// Compiled subject-extraction strategy, resolved once at validation.
#[derive(Debug, Clone)]
pub enum SubjectFormat {
    Selectors {
        container: Selector,
        name: Selector,
        url: Selector,
    },
    Indexed {
        item: Selector,
        name_attr: String,
        url_attr: String,
    },
}

/// Compiled episode-extraction strategy.
#[derive(Debug, Clone)]
pub enum ChannelFormat {
    Flat {
        episode: Selector,
        name: Selector,
        url: Selector,
        channel: Option<Selector>,
    },
    Grouped {
        channel: Selector,
        channel_name: Option<Selector>,
        episode: Selector,
        name: Selector,
        url: Selector,
    },
}

/// Compiled video matching: patterns plus the static headers/cookies
/// attached to every match.
#[derive(Debug, Clone)]
pub struct VideoMatcher {
    direct: Regex,
    nested: Option<Regex>,
    headers: HashMap<String, String>,
    pub cookies: String,
}

impl VideoMatcher {
    /// Match page content: first direct hit wins, then a nested hit if
    /// nesting is enabled, otherwise no match.
    pub fn match_page(&self, content: &str) -> VideoMatch {
        if let Some(m) = self.direct.find(content) {
            return VideoMatch::Matched {
                url: expand_token(content, m.start(), m.end()).to_string(),
                headers: self.headers.clone(),
            };
        }
        if let Some(nested) = &self.nested {
            if let Some(m) = nested.find(content) {
                return VideoMatch::Nested {
                    url: expand_token(content, m.start(), m.end()).to_string(),
                };
            }
        }
        VideoMatch::NoMatch
    }

    /// Match with the direct pattern only. Used on the page behind a
    /// nested URL, where re-nesting is not allowed.
    pub fn match_direct(&self, content: &str) -> VideoMatch {
        if let Some(m) = self.direct.find(content) {
            return VideoMatch::Matched {
                url: expand_token(content, m.start(), m.end()).to_string(),
                headers: self.headers.clone(),
            };
        }
        VideoMatch::NoMatch
    }
}

/// Widen a pattern match to the surrounding token, so `\.mp4` hitting
/// `video.mp4` yields the whole file name rather than the bare suffix.
fn expand_token(content: &str, start: usize, end: usize) -> &str {
    const DELIMS: &[char] = &['"', '\'', '<', '>', '(', ')', '`', ','];
    let is_delim = |c: char| c.is_whitespace() || DELIMS.contains(&c);
    let token_start = content[..start]
        .rfind(is_delim)
        .map(|i| i + content[i..].chars().next().map_or(1, char::len_utf8))
        .unwrap_or(0);
    let token_end = content[end..]
        .find(is_delim)
        .map(|i| end + i)
        .unwrap_or(content.len());
    &content[token_start..token_end]
}

/// Frozen, validated configuration used by the engine.
#[derive(Debug, Clone)]
pub struct CompiledSearch {
    pub search_url: String,
    pub base_url: Url,
    pub interval: Duration,
    pub variant_limit: usize,
    pub use_only_first_word: bool,
    pub remove_special: bool,
    pub subject_format: SubjectFormat,
    pub channel_format: ChannelFormat,
    pub video: VideoMatcher,
}

impl SearchConfig {
    /// Validate and freeze this configuration.
    pub fn compile(&self) -> Result<CompiledSearch, SourceError> {
        if self.search_url.is_empty() {
            return Err(SourceError::Config("search_url is required".into()));
        }
        if !self.search_url.contains("{keyword}") {
            return Err(SourceError::Config(
                "search_url must contain a {keyword} placeholder".into(),
            ));
        }
        if !self.request_interval_secs.is_finite() || self.request_interval_secs < 0.0 {
            return Err(SourceError::Config(format!(
                "request_interval_secs must be a finite value >= 0, got {}",
                self.request_interval_secs
            )));
        }
        if self.search_use_subject_names_count == 0 {
            return Err(SourceError::Config(
                "search_use_subject_names_count must be >= 1".into(),
            ));
        }

        let base_url = self.resolve_base_url()?;
        let subject_format = self.compile_subject_format()?;
        let channel_format = self.compile_channel_format()?;
        let video = self.compile_video_matcher()?;

        Ok(CompiledSearch {
            search_url: self.search_url.clone(),
            base_url,
            interval: Duration::from_secs_f64(self.request_interval_secs),
            variant_limit: self.search_use_subject_names_count,
            use_only_first_word: self.search_use_only_first_word,
            remove_special: self.search_remove_special,
            subject_format,
            channel_format,
            video,
        })
    }

    fn resolve_base_url(&self) -> Result<Url, SourceError> {
        let raw = match &self.base_url {
            Some(explicit) => explicit.clone(),
            // Guess scheme://host from the search template.
            None => self.search_url.replace("{keyword}", "probe"),
        };
        let mut url = Url::parse(&raw)
            .map_err(|e| SourceError::Config(format!("invalid base URL '{raw}': {e}")))?;
        if self.base_url.is_none() {
            url.set_path("");
            url.set_query(None);
            url.set_fragment(None);
        }
        Ok(url)
    }

    fn compile_subject_format(&self) -> Result<SubjectFormat, SourceError> {
        let cfg = &self.subject_format_config;
        match self.subject_format_id {
            SubjectFormatId::SubjectFormatA => Ok(SubjectFormat::Selectors {
                container: parse_selector("subject_selector", &cfg.subject_selector)?,
                name: parse_selector("name_selector", &cfg.name_selector)?,
                url: parse_selector("url_selector", &cfg.url_selector)?,
            }),
            SubjectFormatId::SubjectFormatIndexed => Ok(SubjectFormat::Indexed {
                item: parse_selector("subject_selector", &cfg.subject_selector)?,
                name_attr: cfg.name_attr.clone().unwrap_or_else(|| "title".into()),
                url_attr: cfg.url_attr.clone().unwrap_or_else(|| "href".into()),
            }),
        }
    }

    fn compile_channel_format(&self) -> Result<ChannelFormat, SourceError> {
        let cfg = &self.channel_format_config;
        let name = parse_selector("name_selector", &cfg.name_selector)?;
        let url = parse_selector("url_selector", &cfg.url_selector)?;
        let episode = parse_selector("episode_selector", &cfg.episode_selector)?;
        match self.channel_format_id {
            ChannelFormatId::ChannelFormatNoChannel => Ok(ChannelFormat::Flat {
                episode,
                name,
                url,
                channel: parse_optional_selector("channel_selector", &cfg.channel_selector)?,
            }),
            ChannelFormatId::ChannelFormatIndexGrouped => {
                let channel = cfg.channel_selector.as_deref().ok_or_else(|| {
                    SourceError::Config(
                        "channel_format_index_grouped requires channel_selector".into(),
                    )
                })?;
                Ok(ChannelFormat::Grouped {
                    channel: parse_selector("channel_selector", channel)?,
                    channel_name: parse_optional_selector(
                        "channel_name_selector",
                        &cfg.channel_name_selector,
                    )?,
                    episode,
                    name,
                    url,
                })
            }
        }
    }

    fn compile_video_matcher(&self) -> Result<VideoMatcher, SourceError> {
        let mv = &self.match_video;
        let direct = Regex::new(&mv.match_video_url).map_err(|e| {
            SourceError::Config(format!("invalid match_video_url pattern: {e}"))
        })?;
        let nested = if mv.enable_nested_url && !mv.match_nested_url.is_empty() {
            Some(Regex::new(&mv.match_nested_url).map_err(|e| {
                SourceError::Config(format!("invalid match_nested_url pattern: {e}"))
            })?)
        } else {
            None
        };

        let mut headers = HashMap::new();
        if !mv.add_headers_to_video.user_agent.is_empty() {
            headers.insert(
                "User-Agent".to_string(),
                mv.add_headers_to_video.user_agent.clone(),
            );
        }
        if !mv.add_headers_to_video.referer.is_empty() {
            headers.insert(
                "Referer".to_string(),
                mv.add_headers_to_video.referer.clone(),
            );
        }

        Ok(VideoMatcher {
            direct,
            nested,
            headers,
            cookies: mv.cookies.clone(),
        })
    }
}

fn parse_selector(field: &str, value: &str) -> Result<Selector, SourceError> {
    if value.trim().is_empty() {
        return Err(SourceError::Config(format!("{field} is required")));
    }
    Selector::parse(value)
        .map_err(|e| SourceError::Config(format!("invalid {field} '{value}': {e}")))
}

fn parse_optional_selector(
    field: &str,
    value: &Option<String>,
) -> Result<Option<Selector>, SourceError> {
    match value.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(v) => Ok(Some(parse_selector(field, v)?)),
    }
}
