//! Shared test doubles.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::SourceError;
use crate::traits::{Fetcher, HeaderMap};

/// In-memory [`Fetcher`]: exact-URL routes with a default fallback
/// response, recording every request it receives. Routes can carry an
/// artificial delay so completion order differs from request order.
#[derive(Clone)]
pub struct MockFetcher {
    routes: Arc<Mutex<HashMap<String, Result<String, SourceError>>>>,
    delays: Arc<Mutex<HashMap<String, Duration>>>,
    default: Result<String, SourceError>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl MockFetcher {
    /// A fetcher answering every URL with the same body.
    pub fn new(body: &str) -> Self {
        Self {
            routes: Arc::new(Mutex::new(HashMap::new())),
            delays: Arc::new(Mutex::new(HashMap::new())),
            default: Ok(body.to_string()),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// A fetcher failing every URL with the same error.
    pub fn with_error(err: SourceError) -> Self {
        Self {
            routes: Arc::new(Mutex::new(HashMap::new())),
            delays: Arc::new(Mutex::new(HashMap::new())),
            default: Err(err),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Answer `url` with `body` instead of the default.
    pub fn route(self, url: &str, body: &str) -> Self {
        self.routes
            .lock()
            .unwrap()
            .insert(url.to_string(), Ok(body.to_string()));
        self
    }

    /// Answer `url` with `body` after sleeping for `delay`.
    pub fn route_delayed(self, url: &str, body: &str, delay: Duration) -> Self {
        self.delays.lock().unwrap().insert(url.to_string(), delay);
        self.route(url, body)
    }

    /// Fail `url` with `err` instead of the default.
    pub fn route_error(self, url: &str, err: SourceError) -> Self {
        self.routes.lock().unwrap().insert(url.to_string(), Err(err));
        self
    }

    /// URLs fetched so far, in request order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl Fetcher for MockFetcher {
    async fn fetch(
        &self,
        url: &str,
        _headers: &HeaderMap,
        _cookies: &str,
    ) -> Result<String, SourceError> {
        self.calls.lock().unwrap().push(url.to_string());
        let delay = self.delays.lock().unwrap().get(url).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match self.routes.lock().unwrap().get(url) {
            Some(result) => result.clone(),
            None => self.default.clone(),
        }
    }
}
