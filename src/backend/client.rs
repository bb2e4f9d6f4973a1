use crate::backend::requests::{
    no_cache_headers, upload::UploadResponse, user_agent, Request,
};
use crate::backend::{
    ByteStream, DownloadTarget, ProgressSender, SendProgress, Transport,
    UploadReceipt,
};
use crate::errors::TransferError;
use bytes::Bytes;
use futures::{stream, StreamExt};
use log::debug;
use reqwest::{header::CONTENT_TYPE, Body, Client as ReqwestClient};
use std::time::Duration;
use tokio::time::Instant;
use url::Url;

/// Upload bodies are handed to the connection in slices of this size, one
/// progress event per slice.
const UPLOAD_SLICE_BYTES: usize = 64 * 1024;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// [`Transport`] over HTTP(S) with a pooled reqwest client.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: ReqwestClient,
}

impl HttpTransport {
    pub fn new() -> Result<Self, TransferError> {
        let client = ReqwestClient::builder()
            .user_agent(user_agent())
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;

        Ok(HttpTransport { client })
    }

    /// Send a typed JSON request to the backend rooted at `base`.
    pub async fn send<R: Request>(
        &self,
        base: &Url,
        request: R,
    ) -> Result<R::Response, TransferError> {
        let endpoint = request.endpoint();
        let url = base
            .join(endpoint.trim_start_matches('/'))
            .map_err(|e| TransferError::Network(e.to_string()))?;

        let text = self
            .client
            .request(R::METHOD, url)
            .headers(request.headers())
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        serde_json::from_str(&text)
            .map_err(|e| TransferError::Decode(e.to_string()))
    }
}

impl Transport for HttpTransport {
    async fn probe(&self, endpoint: &Url) -> Result<(), TransferError> {
        let response = self
            .client
            .get(endpoint.clone())
            .headers(no_cache_headers())
            .send()
            .await?;

        let status = response.status();
        // Drain so the pooled connection stays reusable for the next probe.
        response.bytes().await?;

        if status.is_success() {
            Ok(())
        } else {
            Err(TransferError::Http(status.as_u16()))
        }
    }

    async fn download(
        &self,
        target: &DownloadTarget,
        bytes: u64,
    ) -> Result<ByteStream, TransferError> {
        let url = target.url_for(bytes)?;
        debug!("GET {}", url);

        let response = self
            .client
            .get(url)
            .headers(no_cache_headers())
            .send()
            .await?
            .error_for_status()?;

        let body = response.bytes_stream().map(|chunk| {
            chunk.map(|bytes| bytes.len()).map_err(TransferError::from)
        });

        Ok(body.boxed())
    }

    async fn upload(
        &self,
        endpoint: &Url,
        payload: Bytes,
        progress: ProgressSender,
    ) -> Result<UploadReceipt, TransferError> {
        let length = payload.len();
        debug!("POST {} ({} bytes)", endpoint, length);

        let response = self
            .client
            .post(endpoint.clone())
            .headers(no_cache_headers())
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(progress_body(payload, progress))
            .send()
            .await?
            .error_for_status()?;

        let text = response.text().await?;
        let received_bytes =
            UploadResponse::parse(&text).map(|r| r.received_bytes);

        Ok(UploadReceipt { received_bytes })
    }
}

fn progress_body(payload: Bytes, progress: ProgressSender) -> Body {
    Body::wrap_stream(progress_slices(payload, progress))
}

/// Split `payload` into slices that report themselves as they are pulled,
/// followed by a zero-byte event once the body is exhausted.
fn progress_slices(
    payload: Bytes,
    progress: ProgressSender,
) -> impl futures::Stream<Item = Result<Bytes, std::io::Error>> + Send + 'static
{
    let slices: Vec<Bytes> = (0..payload.len())
        .step_by(UPLOAD_SLICE_BYTES)
        .map(|start| {
            let end = (start + UPLOAD_SLICE_BYTES).min(payload.len());
            payload.slice(start..end)
        })
        .collect();

    stream::unfold(
        (slices.into_iter(), Some(progress)),
        |(mut slices, progress)| async move {
            match slices.next() {
                Some(slice) => {
                    if let Some(tx) = &progress {
                        // The receiver may be gone once the phase is over.
                        let _ = tx.send(SendProgress {
                            bytes: slice.len(),
                            at: Instant::now(),
                        });
                    }
                    Some((Ok::<_, std::io::Error>(slice), (slices, progress)))
                }
                None => {
                    if let Some(tx) = progress {
                        let _ = tx.send(SendProgress {
                            bytes: 0,
                            at: Instant::now(),
                        });
                    }
                    None
                }
            }
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_progress_body_reports_every_slice() {
        let payload = Bytes::from(vec![7u8; UPLOAD_SLICE_BYTES * 2 + 10]);
        let (tx, mut rx) = mpsc::unbounded_channel();

        let collected: Vec<Bytes> =
            progress_slices(payload, tx).try_collect().await.unwrap();
        assert_eq!(collected.len(), 3);

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event.bytes);
        }
        assert_eq!(
            events,
            vec![UPLOAD_SLICE_BYTES, UPLOAD_SLICE_BYTES, 10, 0]
        );
    }

    #[test]
    fn test_http_transport_builds() {
        assert!(HttpTransport::new().is_ok());
    }
}
