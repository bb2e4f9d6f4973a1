//! Typed JSON requests against the bundled backend.

pub mod ping;
pub mod status;
pub mod upload;

use reqwest::{
    header::{HeaderMap, HeaderValue, CACHE_CONTROL, PRAGMA},
    Method,
};
use serde::Deserialize;
use std::borrow::Cow;

const NAME: &str = env!("CARGO_PKG_NAME");
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// User agent sent with every request.
pub fn user_agent() -> String {
    match option_env!("ERUSPEED_BUILD_GIT_HASH") {
        Some(rev) => format!("{}/{} ({})", NAME, VERSION, rev),
        None => format!("{}/{}", NAME, VERSION),
    }
}

/// Headers that keep intermediaries from serving cached bytes.
pub fn no_cache_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();

    headers.insert(
        CACHE_CONTROL,
        HeaderValue::from_static("no-cache, no-store, must-revalidate"),
    );
    headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));

    headers
}

pub trait Request {
    type Response: for<'de> Deserialize<'de>;

    const METHOD: Method = Method::GET;

    /// Path relative to the backend base URL.
    fn endpoint(&'_ self) -> Cow<'_, str>;

    fn headers(&self) -> HeaderMap {
        no_cache_headers()
    }
}

impl<R: Request> Request for &R {
    type Response = R::Response;

    const METHOD: Method = R::METHOD;

    fn endpoint(&'_ self) -> Cow<'_, str> {
        (**self).endpoint()
    }

    fn headers(&self) -> HeaderMap {
        (**self).headers()
    }
}
