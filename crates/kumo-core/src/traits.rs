use std::collections::HashMap;
use std::future::Future;

use crate::error::SourceError;

/// Header name → value map attached to outbound requests.
pub type HeaderMap = HashMap<String, String>;

/// Fetches raw page content from a URL.
///
/// The engine is agnostic to the transport: plain HTTP and a
/// script-capable rendering surface are both valid implementations,
/// substituted behind this trait.
pub trait Fetcher: Send + Sync + Clone {
    /// Fetch `url` with the given extra headers and cookie string
    /// (`"k=v; k2=v2"` form, empty for none), returning the raw body.
    fn fetch(
        &self,
        url: &str,
        headers: &HeaderMap,
        cookies: &str,
    ) -> impl Future<Output = Result<String, SourceError>> + Send;
}
