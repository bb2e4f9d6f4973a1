//! Transfer backends: byte sources for downloads, byte sinks for uploads and
//! round-trip targets for latency probes.
//!
//! The measurement engine only talks to a [`Transport`]; [`HttpTransport`]
//! is the reqwest implementation used by the binary.

pub mod client;
pub mod endpoints;
pub mod requests;

pub use client::HttpTransport;
pub use endpoints::{DownloadTarget, Endpoints, SizeParam};

use crate::errors::TransferError;
use bytes::Bytes;
use futures::stream::BoxStream;
use tokio::sync::mpsc;
use tokio::time::Instant;
use url::Url;

/// Chunk lengths of a streaming download body, in arrival order.
pub type ByteStream = BoxStream<'static, Result<usize, TransferError>>;

/// Upload progress notification: `bytes` were handed to the connection at
/// `at`. A final event with `bytes == 0` marks the end of the body.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SendProgress {
    pub bytes: usize,
    pub at: Instant,
}

pub type ProgressSender = mpsc::UnboundedSender<SendProgress>;

/// What an upload acceptor reported back.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UploadReceipt {
    /// Length echoed by the acceptor, when its response carried one.
    pub received_bytes: Option<u64>,
}

/// A backend the engine can measure against.
///
/// Implementations must not retry internally; retry and endpoint rotation
/// belong to the engine.
#[allow(async_fn_in_trait)]
pub trait Transport {
    /// Perform one round trip to `endpoint`. The engine times the call
    /// itself, so the body is never inspected.
    async fn probe(&self, endpoint: &Url) -> Result<(), TransferError>;

    /// Start a download of roughly `bytes` bytes and return its body stream.
    /// Dropping the stream aborts the transfer.
    async fn download(
        &self,
        target: &DownloadTarget,
        bytes: u64,
    ) -> Result<ByteStream, TransferError>;

    /// POST `payload` to `endpoint`, reporting body progress on `progress`
    /// when the implementation can observe it.
    async fn upload(
        &self,
        endpoint: &Url,
        payload: Bytes,
        progress: ProgressSender,
    ) -> Result<UploadReceipt, TransferError>;
}

impl<T: Transport> Transport for &T {
    async fn probe(&self, endpoint: &Url) -> Result<(), TransferError> {
        (**self).probe(endpoint).await
    }

    async fn download(
        &self,
        target: &DownloadTarget,
        bytes: u64,
    ) -> Result<ByteStream, TransferError> {
        (**self).download(target, bytes).await
    }

    async fn upload(
        &self,
        endpoint: &Url,
        payload: Bytes,
        progress: ProgressSender,
    ) -> Result<UploadReceipt, TransferError> {
        (**self).upload(endpoint, payload, progress).await
    }
}
