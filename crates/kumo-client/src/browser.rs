use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chromiumoxide::{Browser, BrowserConfig};
use futures::StreamExt;
use kumo_core::error::SourceError;
use kumo_core::traits::{Fetcher, HeaderMap};

/// Headless-browser fetcher using Chromium via the Chrome DevTools
/// Protocol.
///
/// Unlike [`super::HttpFetcher`], this executes JavaScript before
/// returning the HTML, which is what sites hiding the video URL behind a
/// script-built player need. One Chromium process is shared across all
/// clones; each fetch opens a tab, waits for the body to render, grabs
/// the DOM and closes the tab.
///
/// Per-request headers and cookies are not forwarded to the browser;
/// the page runs with whatever state Chromium accumulates itself.
#[derive(Clone)]
pub struct BrowserFetcher {
    browser: Arc<Browser>,
    timeout: Duration,
}

impl BrowserFetcher {
    /// Launch a headless Chromium with a 30 s navigation timeout.
    ///
    /// Requires a Chromium / Chrome binary reachable via `$PATH`, the
    /// well-known install locations, or the `CHROME_BIN` env var.
    pub async fn new() -> Result<Self, SourceError> {
        Self::with_timeout(Duration::from_secs(30)).await
    }

    pub async fn with_timeout(timeout: Duration) -> Result<Self, SourceError> {
        let mut builder = BrowserConfig::builder().no_sandbox().disable_default_args();

        // Snap-packaged Chromium exposes a wrapper that rejects standard
        // Chrome CLI flags, so prefer the real binary when we can find it.
        if let Some(bin) = Self::find_chrome_binary() {
            tracing::info!(binary = %bin.display(), "using Chrome binary");
            builder = builder.chrome_executable(bin);
        }

        let config = builder
            .arg("--headless=new")
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .arg("--disable-popup-blocking")
            .arg("--no-first-run")
            .build()
            .map_err(|e| SourceError::Config(format!("browser config error: {e}")))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| SourceError::Network(format!("failed to launch browser: {e}")))?;

        // The CDP handler must be polled continuously for the connection
        // to stay alive.
        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    tracing::warn!("browser CDP handler error: {event:?}");
                    break;
                }
            }
        });

        Ok(Self {
            browser: Arc::new(browser),
            timeout,
        })
    }

    /// Locate the real Chrome/Chromium binary: `CHROME_BIN` first, then
    /// snap/flatpak/apt locations. `None` lets chromiumoxide do its own
    /// lookup.
    fn find_chrome_binary() -> Option<PathBuf> {
        if let Ok(p) = std::env::var("CHROME_BIN") {
            let path = PathBuf::from(&p);
            if path.exists() {
                return Some(path);
            }
        }

        let candidates: &[&str] = &[
            "/snap/chromium/current/usr/lib/chromium-browser/chrome",
            "/var/lib/flatpak/exports/bin/org.chromium.Chromium",
            "/usr/bin/google-chrome-stable",
            "/usr/bin/google-chrome",
            "/usr/bin/chromium",
            "/usr/bin/chromium-browser",
        ];
        candidates.iter().map(PathBuf::from).find(|p| p.exists())
    }
}

impl Fetcher for BrowserFetcher {
    async fn fetch(
        &self,
        url: &str,
        _headers: &HeaderMap,
        _cookies: &str,
    ) -> Result<String, SourceError> {
        let result = tokio::time::timeout(self.timeout, async {
            let page = self
                .browser
                .new_page(url)
                .await
                .map_err(|e| SourceError::Http(format!("failed to navigate to {url}: {e}")))?;

            // <body> present is the minimal signal that the page rendered.
            page.find_element("body")
                .await
                .map_err(|e| SourceError::Http(format!("page did not render body: {e}")))?;

            let html = page
                .content()
                .await
                .map_err(|e| SourceError::Http(format!("failed to read page content: {e}")))?;

            let _ = page.close().await;
            Ok::<String, SourceError>(html)
        })
        .await;

        match result {
            Ok(inner) => inner,
            Err(_) => Err(SourceError::Timeout(self.timeout.as_secs())),
        }
    }
}
