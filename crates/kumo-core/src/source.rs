//! Three-phase selector engine: search subjects, list episodes, resolve
//! playable video URLs.
//!
//! One [`SelectorSource`] instance is one configured site. All outbound
//! requests of an instance share a single [`RequestPacer`], so the site
//! is never hit faster than its configured interval regardless of how
//! the phases interleave. Transport failures never abort a whole fetch:
//! they degrade to empty contributions from the failing subject or
//! episode, logged and skipped.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::config::{CompiledSearch, SearchConfig};
use crate::error::SourceError;
use crate::extract::{extract_episodes, extract_subjects};
use crate::filters::{FilterContext, FilterPipeline, guess_subtitle_language};
use crate::models::{
    ConnectionStatus, DownloadInfo, Episode, EpisodeSort, Media, MediaFetchRequest, Subject,
    VideoMatch,
};
use crate::throttle::RequestPacer;
use crate::traits::{Fetcher, HeaderMap};

/// Parallelism for independent page requests (search variants, subject
/// pages). Actual wire concurrency is still bounded by the pacer.
const PAGE_CONCURRENCY: usize = 4;

const MAX_FETCH_ATTEMPTS: u32 = 3;
const RETRY_BACKOFF: Duration = Duration::from_millis(500);

/// A configured selector source bound to a transport.
pub struct SelectorSource<F: Fetcher> {
    source_id: String,
    fetcher: F,
    compiled: CompiledSearch,
    pipeline: FilterPipeline,
    pacer: RequestPacer,
    /// Headers sent with every page request.
    page_headers: HeaderMap,
    cookies: String,
    default_resolution: String,
    default_subtitle_language: String,
    only_supports_players: Vec<String>,
    /// Skip episodes whose parsed ordinal conflicts with the request
    /// before paying for video resolution. Mirrors the episode filter.
    sort_prefilter: bool,
}

impl<F: Fetcher> SelectorSource<F> {
    /// Build a source from raw configuration. This is the only place a
    /// [`SourceError`] escapes: selectors, patterns and URLs are
    /// validated here, and fetch-time failures degrade instead.
    pub fn new(source_id: &str, config: &SearchConfig, fetcher: F) -> Result<Self, SourceError> {
        let compiled = config.compile()?;
        let pipeline = FilterPipeline::from_config(config)?;
        let pacer = RequestPacer::new(compiled.interval);

        let mut page_headers = HeaderMap::new();
        if !config.match_video.add_headers_to_video.user_agent.is_empty() {
            page_headers.insert(
                "User-Agent".to_string(),
                config.match_video.add_headers_to_video.user_agent.clone(),
            );
        }

        let sort_prefilter = match &config.filters {
            Some(list) => list.iter().any(|f| f == "contains_episode_info"),
            None => config.filter_by_episode_sort,
        };

        Ok(Self {
            source_id: source_id.to_string(),
            fetcher,
            compiled,
            pipeline,
            pacer,
            page_headers,
            cookies: config.match_video.cookies.clone(),
            default_resolution: config.default_resolution.clone(),
            default_subtitle_language: config.default_subtitle_language.clone(),
            only_supports_players: config.only_supports_players.clone(),
            sort_prefilter,
        })
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    /// Whether the resolved streams are playable by `player`. An empty
    /// whitelist means no restriction.
    pub fn supports_player(&self, player: &str) -> bool {
        self.only_supports_players.is_empty()
            || self
                .only_supports_players
                .iter()
                .any(|p| p.eq_ignore_ascii_case(player))
    }

    /// Run the full pipeline for one request. Never fails: transport
    /// errors shrink the result, and cancellation returns whatever was
    /// assembled so far (after filtering).
    pub async fn fetch(&self, request: &MediaFetchRequest, cancel: &CancellationToken) -> Vec<Media> {
        let ctx = FilterContext {
            subject_names: request.subject_names.clone(),
            episode_sort: request.episode_sort.clone(),
        };
        if request.subject_names.is_empty() || cancel.is_cancelled() {
            return Vec::new();
        }

        let subjects = tokio::select! {
            _ = cancel.cancelled() => Vec::new(),
            subjects = self.search_subjects(&request.subject_names) => subjects,
        };
        tracing::debug!(source = %self.source_id, count = subjects.len(), "search finished");

        // Subject pages run concurrently but bounded; `buffered` keeps
        // episode lists in subject order.
        let subjects: Vec<Arc<Subject>> = subjects.into_iter().map(Arc::new).collect();
        let episode_lists: Vec<Vec<Episode>> = tokio::select! {
            _ = cancel.cancelled() => Vec::new(),
            lists = stream::iter(subjects)
                .map(|subject| async move { self.list_episodes(&subject).await })
                .buffered(PAGE_CONCURRENCY)
                .collect::<Vec<_>>() => lists,
        };

        let mut media = Vec::new();
        'episodes: for episode in episode_lists.into_iter().flatten() {
            if self.sort_prefilter && conflicting_sort(&episode.sort, &request.episode_sort) {
                continue;
            }
            let resolved = tokio::select! {
                _ = cancel.cancelled() => break 'episodes,
                resolved = self.resolve_video(&episode.url) => resolved,
            };
            if let Some((url, headers)) = resolved {
                media.push(self.build_media(&episode.subject, &episode, url, headers));
            }
        }

        self.pipeline.apply(media, &ctx)
    }

    /// Phase one: run every keyword variant and merge the results,
    /// deduplicated by subject URL, first occurrence wins.
    pub async fn search_subjects(&self, names: &[String]) -> Vec<Subject> {
        let variants = self.search_keywords(names);
        let pages: Vec<Vec<Subject>> = stream::iter(variants)
            .map(|keyword| async move {
                let url = self
                    .compiled
                    .search_url
                    .replace("{keyword}", &encode_keyword(&keyword));
                match self.fetch_page(&url).await {
                    Ok(body) => extract_subjects(
                        &body,
                        &self.compiled.base_url,
                        &self.compiled.subject_format,
                    ),
                    Err(error) => {
                        tracing::warn!(%keyword, %error, "search request failed");
                        Vec::new()
                    }
                }
            })
            .buffered(PAGE_CONCURRENCY)
            .collect()
            .await;

        let mut seen = Vec::new();
        let mut out = Vec::new();
        for subject in pages.into_iter().flatten() {
            if !seen.contains(&subject.url) {
                seen.push(subject.url.clone());
                out.push(subject);
            }
        }
        out
    }

    /// Phase two: fetch a subject page and extract its episodes.
    /// Relative links resolve against the subject page itself.
    pub async fn list_episodes(&self, subject: &Arc<Subject>) -> Vec<Episode> {
        let body = match self.fetch_page(&subject.url).await {
            Ok(body) => body,
            Err(error) => {
                tracing::warn!(subject = %subject.name, %error, "subject page failed");
                return Vec::new();
            }
        };
        let base = Url::parse(&subject.url).unwrap_or_else(|_| self.compiled.base_url.clone());
        extract_episodes(&body, &base, &self.compiled.channel_format)
            .into_iter()
            .map(|info| Episode {
                subject: Arc::clone(subject),
                name: info.name,
                url: info.url,
                channel: info.channel,
                sort: info.sort,
            })
            .collect()
    }

    /// Phase three: fetch a play page and match it against the video
    /// patterns. A nested hit is followed exactly one level deep, and
    /// only the direct pattern applies on the inner page.
    pub async fn resolve_video(&self, page_url: &str) -> Option<(String, HashMap<String, String>)> {
        let body = match self.fetch_page(page_url).await {
            Ok(body) => body,
            Err(error) => {
                tracing::warn!(url = %page_url, %error, "play page failed");
                return None;
            }
        };
        match self.compiled.video.match_page(&body) {
            VideoMatch::Matched { url, headers } => Some((url, headers)),
            VideoMatch::Nested { url } => {
                let url = self.absolutize(page_url, &url);
                tracing::debug!(nested = %url, "following nested video url");
                let body = match self.fetch_page(&url).await {
                    Ok(body) => body,
                    Err(error) => {
                        tracing::warn!(url = %url, %error, "nested page failed");
                        return None;
                    }
                };
                match self.compiled.video.match_direct(&body) {
                    VideoMatch::Matched { url, headers } => Some((url, headers)),
                    _ => None,
                }
            }
            VideoMatch::NoMatch => None,
        }
    }

    /// Probe the site root. Any body counts as reachable; an empty one
    /// suggests the site is up but serving nothing.
    pub async fn check_connection(&self) -> ConnectionStatus {
        match self.fetch_page(self.compiled.base_url.as_str()).await {
            Ok(body) if body.trim().is_empty() => ConnectionStatus::NoMedia,
            Ok(_) => ConnectionStatus::Success,
            Err(error) => {
                tracing::warn!(source = %self.source_id, %error, "connection check failed");
                ConnectionStatus::Failed
            }
        }
    }

    /// Paced fetch with bounded retry on transient errors.
    async fn fetch_page(&self, url: &str) -> Result<String, SourceError> {
        let mut backoff = RETRY_BACKOFF;
        let mut attempt = 1;
        loop {
            self.pacer.acquire().await;
            match self.fetcher.fetch(url, &self.page_headers, &self.cookies).await {
                Ok(body) => return Ok(body),
                Err(error) if error.is_retryable() && attempt < MAX_FETCH_ATTEMPTS => {
                    tracing::debug!(%url, attempt, %error, "retrying fetch");
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }

    /// Keyword variants tried for a request: cleaned, deduplicated,
    /// capped at the configured variant limit.
    fn search_keywords(&self, names: &[String]) -> Vec<String> {
        let mut out = Vec::new();
        for name in names {
            let mut keyword = name.trim().to_string();
            if self.compiled.remove_special {
                keyword = keyword
                    .chars()
                    .map(|c| {
                        if c.is_alphanumeric() || c.is_whitespace() {
                            c
                        } else {
                            ' '
                        }
                    })
                    .collect();
            }
            if self.compiled.use_only_first_word {
                keyword = keyword.split_whitespace().next().unwrap_or("").to_string();
            }
            let keyword = keyword.trim().to_string();
            if !keyword.is_empty() && !out.contains(&keyword) {
                out.push(keyword);
            }
            if out.len() >= self.compiled.variant_limit {
                break;
            }
        }
        out
    }

    /// Resolve a link found on `page` against that page, the way a
    /// browser would; absolute inputs pass through unchanged.
    fn absolutize(&self, page: &str, url: &str) -> String {
        let base = Url::parse(page).unwrap_or_else(|_| self.compiled.base_url.clone());
        base.join(url)
            .map(|u| u.to_string())
            .unwrap_or_else(|_| url.to_string())
    }

    fn build_media(
        &self,
        subject: &Subject,
        episode: &Episode,
        url: String,
        headers: HashMap<String, String>,
    ) -> Media {
        let sort_tag = episode
            .sort
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_else(|| "0".to_string());
        let mut media_id = format!("{}.{}-{}", self.source_id, subject.internal_id, sort_tag);
        let mut original_title = format!("{} {}", subject.name, episode.name);
        if let Some(channel) = &episode.channel {
            media_id.push('-');
            media_id.push_str(channel);
            original_title.push_str(&format!(" [{channel}]"));
        }
        let subtitle_language = guess_subtitle_language(episode.channel.as_deref(), &episode.name)
            .unwrap_or_else(|| self.default_subtitle_language.clone());
        Media {
            media_id,
            original_title,
            subject_name: subject.name.clone(),
            episode_name: episode.name.clone(),
            channel: episode.channel.clone(),
            download: DownloadInfo {
                url,
                headers,
                cookies: self.cookies.clone(),
            },
            resolution: self.default_resolution.clone(),
            subtitle_language,
            episode_sort: episode.sort.clone(),
        }
    }
}

/// True when both sides carry an ordinal and they disagree.
fn conflicting_sort(have: &Option<EpisodeSort>, want: &Option<EpisodeSort>) -> bool {
    matches!((have, want), (Some(h), Some(w)) if h != w)
}

/// Form-encode a keyword for URL substitution (spaces become `+`).
fn encode_keyword(keyword: &str) -> String {
    url::form_urlencoded::byte_serialize(keyword.as_bytes()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ChannelFormatConfig, SubjectFormatConfig};
    use crate::testutil::MockFetcher;

    fn test_config() -> SearchConfig {
        SearchConfig {
            search_url: "https://test.example/search?q={keyword}".into(),
            request_interval_secs: 0.0,
            subject_format_config: SubjectFormatConfig {
                subject_selector: ".item".into(),
                name_selector: ".title".into(),
                url_selector: "a".into(),
                ..Default::default()
            },
            channel_format_config: ChannelFormatConfig {
                episode_selector: ".ep".into(),
                name_selector: ".n".into(),
                url_selector: "a".into(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn source(config: SearchConfig, fetcher: MockFetcher) -> SelectorSource<MockFetcher> {
        SelectorSource::new("test", &config, fetcher).unwrap()
    }

    fn request(name: &str, sort: Option<u32>) -> MediaFetchRequest {
        MediaFetchRequest {
            subject_names: vec![name.to_string()],
            episode_sort: sort.map(EpisodeSort::Number),
        }
    }

    const SEARCH_PAGE: &str = r#"
        <div class="item"><span class="title">Attack on Titan</span><a href="/subject/1">go</a></div>
    "#;
    const SUBJECT_PAGE: &str = r#"
        <li class="ep"><span class="n">第1集</span><a href="/play/1">p</a></li>
        <li class="ep"><span class="n">第2集</span><a href="/play/2">p</a></li>
    "#;

    #[tokio::test]
    async fn full_pipeline_resolves_direct_video() {
        let fetcher = MockFetcher::new("")
            .route("https://test.example/search?q=Attack", SEARCH_PAGE)
            .route("https://test.example/subject/1", SUBJECT_PAGE)
            .route(
                "https://test.example/play/1",
                r#"var src = "https://cdn.example.com/att/1.mp4";"#,
            )
            .route(
                "https://test.example/play/2",
                r#"var src = "https://cdn.example.com/att/2.mp4";"#,
            );
        let source = source(test_config(), fetcher);

        let media = source
            .fetch(&request("Attack on Titan", None), &CancellationToken::new())
            .await;

        assert_eq!(media.len(), 2);
        assert_eq!(media[0].download.url, "https://cdn.example.com/att/1.mp4");
        assert_eq!(media[0].subject_name, "Attack on Titan");
        assert_eq!(media[0].episode_name, "第1集");
        assert_eq!(media[0].episode_sort, Some(EpisodeSort::Number(1)));
        assert_eq!(media[0].resolution, "1080P");
        assert_eq!(media[0].download.cookies, "quality=1080");
        assert!(media[0].download.headers.contains_key("User-Agent"));
        assert!(media[0].media_id.starts_with("test."));
        assert!(media[0].media_id.ends_with("-1"));
    }

    #[tokio::test]
    async fn episode_sort_request_filters_and_skips_resolution() {
        let fetcher = MockFetcher::new("")
            .route("https://test.example/search?q=Attack", SEARCH_PAGE)
            .route("https://test.example/subject/1", SUBJECT_PAGE)
            .route(
                "https://test.example/play/2",
                r#"<source src="https://cdn.example.com/att/2.m3u8">"#,
            );
        let source = source(test_config(), fetcher.clone());

        let media = source
            .fetch(&request("Attack on Titan", Some(2)), &CancellationToken::new())
            .await;

        assert_eq!(media.len(), 1);
        assert_eq!(media[0].episode_sort, Some(EpisodeSort::Number(2)));
        // play/1 conflicts with the requested ordinal, so it is never fetched
        assert!(!fetcher.calls().contains(&"https://test.example/play/1".to_string()));
    }

    #[tokio::test]
    async fn nested_url_is_followed_exactly_one_level() {
        let fetcher = MockFetcher::new("")
            .route(
                "https://test.example/search?q=Show",
                r#"<div class="item"><span class="title">Show</span><a href="/subject/7">x</a></div>"#,
            )
            .route(
                "https://test.example/subject/7",
                r#"<li class="ep"><span class="n">EP1</span><a href="/play/7">p</a></li>"#,
            )
            .route(
                "https://test.example/play/7",
                r#"window.open('https://test.example/player/vip?id=9')"#,
            )
            .route(
                "https://test.example/player/vip?id=9",
                r#"<video src="https://cdn.example.com/7.mp4">"#,
            );
        let source = source(test_config(), fetcher.clone());

        let media = source.fetch(&request("Show", None), &CancellationToken::new()).await;

        assert_eq!(media.len(), 1);
        assert_eq!(media[0].download.url, "https://cdn.example.com/7.mp4");
        // search + subject + play + nested, nothing more
        assert_eq!(fetcher.call_count(), 4);
    }

    #[tokio::test]
    async fn nested_page_without_direct_match_yields_nothing() {
        let fetcher = MockFetcher::new("nothing playable here")
            .route(
                "https://test.example/search?q=Show",
                r#"<div class="item"><span class="title">Show</span><a href="/subject/7">x</a></div>"#,
            )
            .route(
                "https://test.example/subject/7",
                r#"<li class="ep"><span class="n">EP1</span><a href="/play/7">p</a></li>"#,
            )
            .route(
                "https://test.example/play/7",
                r#"go('https://test.example/player/vip?id=9')"#,
            );
        let source = source(test_config(), fetcher.clone());

        let media = source.fetch(&request("Show", None), &CancellationToken::new()).await;

        assert!(media.is_empty());
        assert_eq!(fetcher.call_count(), 4);
    }

    #[tokio::test]
    async fn search_merges_variants_and_dedups_by_url() {
        let mut config = test_config();
        config.search_use_subject_names_count = 2;
        let fetcher = MockFetcher::new("")
            .route(
                "https://test.example/search?q=Alpha",
                r#"
                <div class="item"><span class="title">Alpha</span><a href="/s/1">x</a></div>
                <div class="item"><span class="title">Shared</span><a href="/s/2">x</a></div>
                "#,
            )
            .route(
                "https://test.example/search?q=Beta",
                r#"
                <div class="item"><span class="title">Shared</span><a href="/s/2">x</a></div>
                <div class="item"><span class="title">Beta</span><a href="/s/3">x</a></div>
                "#,
            );
        let source = source(config, fetcher);

        let subjects = source
            .search_subjects(&["Alpha".to_string(), "Beta".to_string()])
            .await;

        let urls: Vec<_> = subjects.iter().map(|s| s.url.as_str()).collect();
        assert_eq!(
            urls,
            [
                "https://test.example/s/1",
                "https://test.example/s/2",
                "https://test.example/s/3",
            ]
        );
    }

    #[tokio::test]
    async fn failing_subject_does_not_poison_the_rest() {
        let fetcher = MockFetcher::new("")
            .route(
                "https://test.example/search?q=Show",
                r#"
                <div class="item"><span class="title">Broken</span><a href="/subject/bad">x</a></div>
                <div class="item"><span class="title">Works</span><a href="/subject/ok">x</a></div>
                "#,
            )
            .route_error(
                "https://test.example/subject/bad",
                SourceError::Http("HTTP 500 for /subject/bad".into()),
            )
            .route(
                "https://test.example/subject/ok",
                r#"<li class="ep"><span class="n">EP1</span><a href="/play/ok">p</a></li>"#,
            )
            .route(
                "https://test.example/play/ok",
                r#"src="https://cdn.example.com/ok.mp4""#,
            );
        let mut config = test_config();
        // subject-name filter would drop "Works" for a "Show" request
        config.filter_by_subject_name = false;
        let source = source(config, fetcher);

        let media = source.fetch(&request("Show", None), &CancellationToken::new()).await;

        assert_eq!(media.len(), 1);
        assert_eq!(media[0].subject_name, "Works");
    }

    #[tokio::test(start_paused = true)]
    async fn all_variants_failing_yields_empty_not_error() {
        let fetcher = MockFetcher::with_error(SourceError::Network("connection reset".into()));
        let source = source(test_config(), fetcher);

        let media = source.fetch(&request("Show", None), &CancellationToken::new()).await;

        assert!(media.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn retryable_errors_are_retried_then_reported() {
        let fetcher = MockFetcher::with_error(SourceError::Network("connection reset".into()));
        let source = source(test_config(), fetcher.clone());

        let status = source.check_connection().await;

        assert_eq!(status, ConnectionStatus::Failed);
        assert_eq!(fetcher.call_count(), 3);
    }

    #[tokio::test]
    async fn non_retryable_errors_fail_immediately() {
        let fetcher = MockFetcher::with_error(SourceError::Http("HTTP 404 for /".into()));
        let source = source(test_config(), fetcher.clone());

        let status = source.check_connection().await;

        assert_eq!(status, ConnectionStatus::Failed);
        assert_eq!(fetcher.call_count(), 1);
    }

    #[tokio::test]
    async fn connection_probe_distinguishes_empty_bodies() {
        let up = source(test_config(), MockFetcher::new("<html>ok</html>"));
        assert_eq!(up.check_connection().await, ConnectionStatus::Success);

        let empty = source(test_config(), MockFetcher::new("   \n"));
        assert_eq!(empty.check_connection().await, ConnectionStatus::NoMedia);
    }

    #[tokio::test]
    async fn empty_request_makes_no_calls() {
        let fetcher = MockFetcher::new("");
        let source = source(test_config(), fetcher.clone());

        let media = source
            .fetch(&MediaFetchRequest::default(), &CancellationToken::new())
            .await;

        assert!(media.is_empty());
        assert_eq!(fetcher.call_count(), 0);
    }

    #[tokio::test]
    async fn cancelled_token_short_circuits() {
        let fetcher = MockFetcher::new("");
        let source = source(test_config(), fetcher.clone());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let media = source.fetch(&request("Show", None), &cancel).await;

        assert!(media.is_empty());
        assert_eq!(fetcher.call_count(), 0);
    }

    #[tokio::test]
    async fn cancellation_mid_fetch_returns_promptly() {
        let mut config = test_config();
        // long pacing interval keeps the second request parked
        config.request_interval_secs = 30.0;
        let fetcher = MockFetcher::new("")
            .route("https://test.example/search?q=Show", SEARCH_PAGE);
        let source = Arc::new(source(config, fetcher));
        let cancel = CancellationToken::new();

        let handle = {
            let source = Arc::clone(&source);
            let cancel = cancel.clone();
            tokio::spawn(async move { source.fetch(&request("Show", None), &cancel).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();

        let media = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("fetch must return promptly after cancel")
            .unwrap();
        assert!(media.is_empty());
    }

    #[tokio::test]
    async fn slow_subject_page_does_not_reorder_episodes() {
        let mut config = test_config();
        config.filter_by_subject_name = false;
        // first subject's page is the slow one; it must still come first
        let fetcher = MockFetcher::new("")
            .route(
                "https://test.example/search?q=Show",
                r#"
                <div class="item"><span class="title">Slow</span><a href="/subject/slow">x</a></div>
                <div class="item"><span class="title">Fast</span><a href="/subject/fast">x</a></div>
                "#,
            )
            .route_delayed(
                "https://test.example/subject/slow",
                r#"<li class="ep"><span class="n">EP1</span><a href="/play/slow1">p</a></li>"#,
                Duration::from_millis(150),
            )
            .route(
                "https://test.example/subject/fast",
                r#"<li class="ep"><span class="n">EP1</span><a href="/play/fast1">p</a></li>"#,
            )
            .route(
                "https://test.example/play/slow1",
                r#""https://cdn.example.com/slow1.mp4""#,
            )
            .route(
                "https://test.example/play/fast1",
                r#""https://cdn.example.com/fast1.mp4""#,
            );
        let source = source(config, fetcher.clone());

        let media = source.fetch(&request("Show", None), &CancellationToken::new()).await;

        let subjects: Vec<_> = media.iter().map(|m| m.subject_name.as_str()).collect();
        assert_eq!(subjects, ["Slow", "Fast"]);
        // resolution visits the slow subject's episode first as well
        let calls = fetcher.calls();
        let slow_play = calls.iter().position(|u| u.ends_with("/play/slow1")).unwrap();
        let fast_play = calls.iter().position(|u| u.ends_with("/play/fast1")).unwrap();
        assert!(slow_play < fast_play);
    }

    #[tokio::test]
    async fn cancellation_keeps_already_resolved_media() {
        let fetcher = MockFetcher::new("")
            .route("https://test.example/search?q=Attack", SEARCH_PAGE)
            .route("https://test.example/subject/1", SUBJECT_PAGE)
            .route(
                "https://test.example/play/1",
                r#""https://cdn.example.com/att/1.mp4""#,
            )
            .route_delayed(
                "https://test.example/play/2",
                r#""https://cdn.example.com/att/2.mp4""#,
                Duration::from_secs(30),
            );
        let source = Arc::new(source(test_config(), fetcher));
        let cancel = CancellationToken::new();

        let handle = {
            let source = Arc::clone(&source);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                source.fetch(&request("Attack on Titan", None), &cancel).await
            })
        };
        // let the first episode resolve, then interrupt the second
        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();

        let media = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("fetch must return promptly after cancel")
            .unwrap();
        assert_eq!(media.len(), 1);
        assert_eq!(media[0].download.url, "https://cdn.example.com/att/1.mp4");
        assert_eq!(media[0].episode_name, "第1集");
    }

    #[tokio::test]
    async fn relative_nested_url_resolves_against_play_page() {
        let mut config = test_config();
        config.match_video.match_nested_url = r"player\.php\?id=\d+".into();
        let fetcher = MockFetcher::new("")
            .route(
                "https://test.example/search?q=Show",
                r#"<div class="item"><span class="title">Show</span><a href="/watch/7.html">x</a></div>"#,
            )
            .route(
                "https://test.example/watch/7.html",
                r#"<li class="ep"><span class="n">EP1</span><a href="/watch/play7.html">p</a></li>"#,
            )
            .route(
                "https://test.example/watch/play7.html",
                r#"go('player.php?id=9')"#,
            )
            .route(
                "https://test.example/watch/player.php?id=9",
                r#"<video src="https://cdn.example.com/7.mp4">"#,
            );
        let source = source(config, fetcher.clone());

        let media = source.fetch(&request("Show", None), &CancellationToken::new()).await;

        assert_eq!(media.len(), 1);
        assert_eq!(media[0].download.url, "https://cdn.example.com/7.mp4");
        assert!(fetcher
            .calls()
            .contains(&"https://test.example/watch/player.php?id=9".to_string()));
    }

    #[tokio::test]
    async fn fetch_is_idempotent() {
        let fetcher = MockFetcher::new("")
            .route("https://test.example/search?q=Attack", SEARCH_PAGE)
            .route("https://test.example/subject/1", SUBJECT_PAGE)
            .route(
                "https://test.example/play/1",
                r#""https://cdn.example.com/1.mp4""#,
            )
            .route(
                "https://test.example/play/2",
                r#""https://cdn.example.com/2.mp4""#,
            );
        let source = source(test_config(), fetcher);

        let req = request("Attack on Titan", None);
        let first = source.fetch(&req, &CancellationToken::new()).await;
        let second = source.fetch(&req, &CancellationToken::new()).await;

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn keyword_variants_clean_and_cap() {
        let mut config = test_config();
        config.search_use_subject_names_count = 2;
        let source = source(config, MockFetcher::new(""));

        let variants = source.search_keywords(&[
            "Re:Zero - Starting Life".to_string(),
            "re zero".to_string(),
            "Third Name".to_string(),
        ]);

        // special chars stripped, first word only, capped at two variants
        assert_eq!(variants, ["Re", "re"]);
    }

    #[tokio::test]
    async fn cjk_names_survive_keyword_cleaning() {
        let source = source(test_config(), MockFetcher::new(""));
        let variants = source.search_keywords(&["进击的巨人!".to_string()]);
        assert_eq!(variants, ["进击的巨人"]);
    }

    #[test]
    fn keyword_encoding_uses_plus_for_spaces() {
        assert_eq!(encode_keyword("attack on titan"), "attack+on+titan");
        assert_eq!(encode_keyword("进击"), "%E8%BF%9B%E5%87%BB");
    }

    #[test]
    fn player_whitelist() {
        let open = source(test_config(), MockFetcher::new(""));
        assert!(open.supports_player("anything"));

        let mut config = test_config();
        config.only_supports_players = vec!["exoplayer".into()];
        let restricted = source(config, MockFetcher::new(""));
        assert!(restricted.supports_player("ExoPlayer"));
        assert!(!restricted.supports_player("vlc"));
    }
}
