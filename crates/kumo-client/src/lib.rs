//! Transports for the kumo selector engine: plain HTTP by default, a
//! headless Chromium behind the `browser` feature.

pub mod fetcher;

#[cfg(feature = "browser")]
pub mod browser;

pub use fetcher::HttpFetcher;

#[cfg(feature = "browser")]
pub use browser::BrowserFetcher;
