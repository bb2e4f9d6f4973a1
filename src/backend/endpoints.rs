use crate::errors::TransferError;
use std::fmt;
use url::Url;

const MEBIBYTE: f64 = 1_048_576.0;

/// Largest payload the bundled download route accepts.
pub const BUNDLED_MAX_DOWNLOAD_BYTES: u64 = 100 * 1_048_576;

/// How a download endpoint is told how many bytes to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SizeParam {
    /// `?<name>=<bytes>` query parameter, e.g. `?bytes=1048576`.
    Query(String),
    /// Trailing path segment in mebibytes, e.g. `/api/download/2.5`.
    PathMebibytes,
    /// The resource has a fixed size; the request size is ignored.
    Fixed,
}

/// A download source and its size convention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadTarget {
    pub url: Url,
    pub size: SizeParam,
}

impl DownloadTarget {
    pub fn query(url: Url, name: impl Into<String>) -> Self {
        Self { url, size: SizeParam::Query(name.into()) }
    }

    pub fn path_mebibytes(url: Url) -> Self {
        Self { url, size: SizeParam::PathMebibytes }
    }

    pub fn fixed(url: Url) -> Self {
        Self { url, size: SizeParam::Fixed }
    }

    /// Build the request URL for a transfer of `bytes` bytes.
    pub fn url_for(&self, bytes: u64) -> Result<Url, TransferError> {
        let mut url = self.url.clone();

        match &self.size {
            SizeParam::Query(name) => {
                url.query_pairs_mut().append_pair(name, &bytes.to_string());
            }
            SizeParam::PathMebibytes => {
                let bytes = bytes.min(BUNDLED_MAX_DOWNLOAD_BYTES);
                let size = format_mebibytes(bytes);
                url.path_segments_mut()
                    .map_err(|_| {
                        TransferError::Network(format!(
                            "{} cannot carry a size segment",
                            self.url
                        ))
                    })?
                    .pop_if_empty()
                    .push(&size);
            }
            SizeParam::Fixed => {}
        }

        Ok(url)
    }
}

impl fmt::Display for DownloadTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.url)
    }
}

fn format_mebibytes(bytes: u64) -> String {
    let formatted = format!("{:.3}", bytes as f64 / MEBIBYTE);
    formatted.trim_end_matches('0').trim_end_matches('.').to_string()
}

/// Every endpoint a run may use, grouped by phase.
#[derive(Debug, Clone)]
pub struct Endpoints {
    /// Latency probe targets, used in rotation.
    pub ping: Vec<Url>,
    /// Download sources, assigned round-robin to connections.
    pub download: Vec<DownloadTarget>,
    /// Upload acceptors, assigned round-robin to connections.
    pub upload: Vec<Url>,
    /// Optional health descriptor, display only.
    pub status: Option<Url>,
}

impl Endpoints {
    /// Public endpoints usable without running a server.
    ///
    /// Download connections are spread over the sized Cloudflare route and
    /// a few fixed-size public files, so one refusing host only costs a
    /// rotation.
    pub fn public() -> Self {
        Self {
            ping: vec![
                static_url("https://cloudflare.com/cdn-cgi/trace"),
                static_url("https://1.1.1.1/cdn-cgi/trace"),
                static_url("https://www.google.com/favicon.ico"),
            ],
            download: vec![
                DownloadTarget::query(
                    static_url("https://speed.cloudflare.com/__down"),
                    "bytes",
                ),
                DownloadTarget::fixed(static_url(
                    "https://github.com/nodejs/node/releases/download/v18.17.0/node-v18.17.0-win-x64.zip",
                )),
                DownloadTarget::fixed(static_url(
                    "https://github.com/electron/electron/releases/download/v25.3.1/electron-v25.3.1-win32-x64.zip",
                )),
                DownloadTarget::fixed(static_url(
                    "https://upload.wikimedia.org/wikipedia/commons/3/3e/Alfonso_Cu%C3%A3%C2%A1n_2019_(cropped).jpg",
                )),
                DownloadTarget::fixed(static_url(
                    "https://httpbin.org/bytes/1048576",
                )),
            ],
            upload: vec![
                static_url("https://speed.cloudflare.com/__up"),
                static_url("https://httpbin.org/post"),
            ],
            status: None,
        }
    }

    /// Endpoints of the bundled backend rooted at `base`.
    pub fn bundled(base: &Url) -> Result<Self, url::ParseError> {
        Ok(Self {
            ping: vec![base.join("api/ping")?],
            download: vec![DownloadTarget::path_mebibytes(
                base.join("api/download")?,
            )],
            upload: vec![base.join("api/upload")?],
            status: Some(base.join("api/status")?),
        })
    }
}

impl Default for Endpoints {
    fn default() -> Self {
        Self::public()
    }
}

fn static_url(url: &'static str) -> Url {
    Url::parse(url).expect("built-in endpoint URLs are valid")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_size() {
        let target = DownloadTarget::query(
            Url::parse("https://speed.example.com/__down").unwrap(),
            "bytes",
        );
        let url = target.url_for(1_048_576).unwrap();
        assert_eq!(url.as_str(), "https://speed.example.com/__down?bytes=1048576");
    }

    #[test]
    fn test_path_size_in_mebibytes() {
        let target = DownloadTarget::path_mebibytes(
            Url::parse("http://localhost:3000/api/download").unwrap(),
        );
        assert_eq!(
            target.url_for(2 * 1_048_576).unwrap().as_str(),
            "http://localhost:3000/api/download/2"
        );
        assert_eq!(
            target.url_for(524_288).unwrap().as_str(),
            "http://localhost:3000/api/download/0.5"
        );
    }

    #[test]
    fn test_path_size_is_capped() {
        let target = DownloadTarget::path_mebibytes(
            Url::parse("http://localhost:3000/api/download").unwrap(),
        );
        assert_eq!(
            target.url_for(500 * 1_048_576).unwrap().as_str(),
            "http://localhost:3000/api/download/100"
        );
    }

    #[test]
    fn test_fixed_size_ignores_bytes() {
        let url = Url::parse("https://files.example.com/blob.bin").unwrap();
        let target = DownloadTarget::fixed(url.clone());
        assert_eq!(target.url_for(12345).unwrap(), url);
    }

    #[test]
    fn test_bundled_layout() {
        let base = Url::parse("http://localhost:3000/").unwrap();
        let endpoints = Endpoints::bundled(&base).unwrap();
        assert_eq!(endpoints.ping[0].as_str(), "http://localhost:3000/api/ping");
        assert_eq!(
            endpoints.upload[0].as_str(),
            "http://localhost:3000/api/upload"
        );
        assert_eq!(
            endpoints.status.unwrap().as_str(),
            "http://localhost:3000/api/status"
        );
    }

    #[test]
    fn test_public_endpoints_are_populated() {
        let endpoints = Endpoints::default();
        assert!(!endpoints.ping.is_empty());
        assert!(!endpoints.download.is_empty());
        assert!(!endpoints.upload.is_empty());
    }

    #[test]
    fn test_public_downloads_have_fallbacks() {
        let endpoints = Endpoints::public();

        assert!(matches!(endpoints.download[0].size, SizeParam::Query(_)));
        let fixed: Vec<_> = endpoints
            .download
            .iter()
            .filter(|target| target.size == SizeParam::Fixed)
            .collect();
        assert_eq!(fixed.len(), 4);
        assert!(fixed
            .iter()
            .any(|target| target.url.host_str() == Some("github.com")));
        assert!(fixed
            .iter()
            .all(|target| target.url_for(1_048_576).unwrap() == target.url));
    }
}
