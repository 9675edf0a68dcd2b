//! Selector-driven node extraction.
//!
//! Pure synchronous functions over a parsed document: iterate container
//! nodes in document order, pull name/url (and optionally a channel
//! label) out of each, and silently skip containers that miss a required
//! sub-match. A malformed node never aborts the page; an empty or
//! non-matching document yields an empty vector.

use std::hash::{DefaultHasher, Hash, Hasher};

use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::config::{ChannelFormat, SubjectFormat};
use crate::models::{EpisodeInfo, EpisodeSort, Subject};

/// Extract subjects from a search-result page.
pub fn extract_subjects(html: &str, base: &Url, format: &SubjectFormat) -> Vec<Subject> {
    let doc = Html::parse_document(html);
    match format {
        SubjectFormat::Selectors {
            container,
            name,
            url,
        } => doc
            .select(container)
            .enumerate()
            .filter_map(|(i, el)| {
                let name = nonempty_text(el.select(name).next()?)?;
                let url = link_of(el.select(url).next()?, base)?;
                Some(Subject {
                    internal_id: internal_id(i, &name),
                    name,
                    url,
                })
            })
            .collect(),
        SubjectFormat::Indexed {
            item,
            name_attr,
            url_attr,
        } => doc
            .select(item)
            .enumerate()
            .filter_map(|(i, el)| {
                let name = el
                    .value()
                    .attr(name_attr)
                    .map(|v| v.trim().to_string())
                    .filter(|v| !v.is_empty())
                    .or_else(|| nonempty_text(el))?;
                let raw = el.value().attr(url_attr)?.trim();
                if raw.is_empty() {
                    return None;
                }
                let url = base.join(raw).ok()?.to_string();
                Some(Subject {
                    internal_id: internal_id(i, &name),
                    name,
                    url,
                })
            })
            .collect(),
    }
}

/// Extract episodes from a subject page.
pub fn extract_episodes(html: &str, base: &Url, format: &ChannelFormat) -> Vec<EpisodeInfo> {
    let doc = Html::parse_document(html);
    match format {
        ChannelFormat::Flat {
            episode,
            name,
            url,
            channel,
        } => doc
            .select(episode)
            .filter_map(|el| episode_of(el, base, name, url, channel_label(el, channel)))
            .collect(),
        ChannelFormat::Grouped {
            channel,
            channel_name,
            episode,
            name,
            url,
        } => {
            let mut out = Vec::new();
            for group in doc.select(channel) {
                let label = channel_label(group, channel_name);
                for el in group.select(episode) {
                    if let Some(info) = episode_of(el, base, name, url, label.clone()) {
                        out.push(info);
                    }
                }
            }
            out
        }
    }
}

fn episode_of(
    el: ElementRef<'_>,
    base: &Url,
    name: &Selector,
    url: &Selector,
    channel: Option<String>,
) -> Option<EpisodeInfo> {
    let name = nonempty_text(el.select(name).next()?)?;
    let url = link_of(el.select(url).next()?, base)?;
    let sort = EpisodeSort::parse(&name);
    Some(EpisodeInfo {
        name,
        url,
        channel,
        sort,
    })
}

fn channel_label(el: ElementRef<'_>, selector: &Option<Selector>) -> Option<String> {
    let selector = selector.as_ref()?;
    el.select(selector).next().and_then(nonempty_text)
}

fn nonempty_text(el: ElementRef<'_>) -> Option<String> {
    let text: String = el.text().collect();
    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
    (!text.is_empty()).then_some(text)
}

/// Link value: href attribute, falling back to element text; resolved
/// against the page base (absolute inputs pass through unchanged).
fn link_of(el: ElementRef<'_>, base: &Url) -> Option<String> {
    let raw = el
        .value()
        .attr("href")
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .or_else(|| nonempty_text(el))?;
    base.join(&raw).ok().map(|u| u.to_string())
}

fn internal_id(index: usize, name: &str) -> String {
    let mut hasher = DefaultHasher::new();
    name.hash(&mut hasher);
    format!("{}_{}", index, hasher.finish() % 10_000)
}
