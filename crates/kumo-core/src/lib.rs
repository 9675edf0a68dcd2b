//! Selector-driven content extraction for media web sources.
//!
//! A source is described declaratively (CSS selectors, URL templates,
//! video URL patterns) and executed in three phases: search subjects,
//! list their episodes, resolve playable video URLs. The engine is
//! transport-agnostic via the [`Fetcher`] trait and rate-limits all
//! outbound requests of one source through a shared pacer.

pub mod config;
pub mod error;
pub mod extract;
pub mod filters;
pub mod models;
pub mod source;
#[cfg(test)]
pub(crate) mod testutil;
pub mod throttle;
pub mod traits;

pub use config::{
    ChannelFormatConfig, ChannelFormatId, MatchVideoConfig, SearchConfig, SubjectFormatConfig,
    SubjectFormatId,
};
pub use error::SourceError;
pub use filters::{FilterContext, FilterPipeline, MediaFilter};
pub use models::{
    ConnectionStatus, DownloadInfo, Episode, EpisodeSort, Media, MediaFetchRequest, Subject,
};
pub use source::SelectorSource;
pub use throttle::RequestPacer;
pub use traits::{Fetcher, HeaderMap};
