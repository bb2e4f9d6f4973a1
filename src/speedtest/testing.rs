//! Scripted in-process transport for engine tests on a paused clock.

use crate::backend::{
    ByteStream, DownloadTarget, Endpoints, ProgressSender, SendProgress,
    Transport, UploadReceipt,
};
use crate::errors::TransferError;
use bytes::Bytes;
use futures::{stream, StreamExt};
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::time::{sleep, Instant};
use url::Url;

const TICK: Duration = Duration::from_millis(10);
const UPLOAD_SLICE: usize = 64 * 1024;
const FAILURE_LATENCY: Duration = Duration::from_millis(10);
const HAND_OFF: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy)]
enum FailurePlan {
    First(u32),
    Always,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Probe,
    Download,
    Upload,
}

/// One scripted probe: how long it takes and whether it succeeds.
#[derive(Debug, Clone, Copy)]
pub struct ScriptedProbe {
    pub latency: Duration,
    pub ok: bool,
}

pub struct FakeTransport {
    probe_latency: Duration,
    probe_script: RefCell<VecDeque<ScriptedProbe>>,
    /// Bytes per second of a single download transfer.
    download_rate: f64,
    /// Bytes per second of a single upload body.
    upload_rate: f64,
    upload_progress: bool,
    /// Hand the whole body off at once, then drain it at `upload_rate`.
    buffered_upload: bool,
    upload_response_latency: Duration,
    failures: RefCell<HashMap<String, FailurePlan>>,
    calls: RefCell<Vec<(CallKind, String, Instant)>>,
    total_calls: Cell<usize>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self {
            probe_latency: Duration::from_millis(30),
            probe_script: RefCell::new(VecDeque::new()),
            download_rate: 2_000_000.0,
            upload_rate: 1_000_000.0,
            upload_progress: true,
            buffered_upload: false,
            upload_response_latency: Duration::from_millis(20),
            failures: RefCell::new(HashMap::new()),
            calls: RefCell::new(Vec::new()),
            total_calls: Cell::new(0),
        }
    }

    pub fn with_probe_script(self, script: Vec<ScriptedProbe>) -> Self {
        *self.probe_script.borrow_mut() = script.into();
        self
    }

    pub fn with_download_rate(mut self, bytes_per_sec: f64) -> Self {
        self.download_rate = bytes_per_sec;
        self
    }

    pub fn with_upload_rate(mut self, bytes_per_sec: f64) -> Self {
        self.upload_rate = bytes_per_sec;
        self
    }

    pub fn without_upload_progress(mut self) -> Self {
        self.upload_progress = false;
        self
    }

    pub fn with_buffered_upload(mut self) -> Self {
        self.buffered_upload = true;
        self
    }

    pub fn fail_first(self, url: &str, count: u32) -> Self {
        self.failures
            .borrow_mut()
            .insert(url.to_string(), FailurePlan::First(count));
        self
    }

    pub fn fail_always(self, url: &str) -> Self {
        self.failures.borrow_mut().insert(url.to_string(), FailurePlan::Always);
        self
    }

    pub fn total_calls(&self) -> usize {
        self.total_calls.get()
    }

    pub fn calls_of(&self, kind: CallKind) -> usize {
        self.calls.borrow().iter().filter(|(k, _, _)| *k == kind).count()
    }

    pub fn calls_to(&self, url: &str) -> usize {
        self.calls.borrow().iter().filter(|(_, u, _)| u == url).count()
    }

    fn record(&self, kind: CallKind, url: &str) {
        self.total_calls.set(self.total_calls.get() + 1);
        self.calls.borrow_mut().push((kind, url.to_string(), Instant::now()));
    }

    fn should_fail(&self, url: &str) -> bool {
        let mut failures = self.failures.borrow_mut();
        match failures.get_mut(url) {
            Some(FailurePlan::Always) => true,
            Some(FailurePlan::First(remaining)) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }
}

impl Transport for FakeTransport {
    async fn probe(&self, endpoint: &Url) -> Result<(), TransferError> {
        self.record(CallKind::Probe, endpoint.as_str());

        let scripted = self.probe_script.borrow_mut().pop_front();
        let probe = scripted.unwrap_or_else(|| ScriptedProbe {
            latency: self.probe_latency,
            ok: !self.should_fail(endpoint.as_str()),
        });

        sleep(probe.latency).await;
        if probe.ok {
            Ok(())
        } else {
            Err(TransferError::Http(503))
        }
    }

    async fn download(
        &self,
        target: &DownloadTarget,
        bytes: u64,
    ) -> Result<ByteStream, TransferError> {
        self.record(CallKind::Download, target.url.as_str());

        if self.should_fail(target.url.as_str()) {
            sleep(FAILURE_LATENCY).await;
            return Err(TransferError::Http(503));
        }

        let per_tick =
            ((self.download_rate * TICK.as_secs_f64()) as u64).max(1);
        let body = stream::unfold(bytes, move |remaining| async move {
            if remaining == 0 {
                return None;
            }
            sleep(TICK).await;
            let chunk = per_tick.min(remaining);
            Some((Ok::<_, TransferError>(chunk as usize), remaining - chunk))
        });

        Ok(body.boxed())
    }

    async fn upload(
        &self,
        endpoint: &Url,
        payload: Bytes,
        progress: ProgressSender,
    ) -> Result<UploadReceipt, TransferError> {
        self.record(CallKind::Upload, endpoint.as_str());

        if self.should_fail(endpoint.as_str()) {
            sleep(FAILURE_LATENCY).await;
            return Err(TransferError::Http(500));
        }

        let length = payload.len();
        let drain = Duration::from_secs_f64(length as f64 / self.upload_rate);
        if self.buffered_upload {
            for start in (0..length).step_by(UPLOAD_SLICE) {
                let slice = UPLOAD_SLICE.min(length - start);
                let _ = progress.send(SendProgress {
                    bytes: slice,
                    at: Instant::now(),
                });
                sleep(HAND_OFF).await;
            }
            let _ =
                progress.send(SendProgress { bytes: 0, at: Instant::now() });
            sleep(drain).await;
        } else if self.upload_progress {
            for start in (0..length).step_by(UPLOAD_SLICE) {
                let slice = UPLOAD_SLICE.min(length - start);
                let _ = progress.send(SendProgress {
                    bytes: slice,
                    at: Instant::now(),
                });
                sleep(Duration::from_secs_f64(slice as f64 / self.upload_rate))
                    .await;
            }
            let _ =
                progress.send(SendProgress { bytes: 0, at: Instant::now() });
        } else {
            sleep(drain).await;
        }

        sleep(self.upload_response_latency).await;
        Ok(UploadReceipt { received_bytes: Some(length as u64) })
    }
}

pub const PING_A: &str = "http://fake.test/ping/a";
pub const PING_B: &str = "http://fake.test/ping/b";
pub const DOWN_A: &str = "http://fake.test/down/a";
pub const DOWN_B: &str = "http://fake.test/down/b";
pub const UP_A: &str = "http://fake.test/up/a";
pub const UP_B: &str = "http://fake.test/up/b";

pub fn url(value: &str) -> Url {
    Url::parse(value).unwrap()
}

/// Two endpoints per phase, all served by the fake.
pub fn fake_endpoints() -> Endpoints {
    Endpoints {
        ping: vec![url(PING_A), url(PING_B)],
        download: vec![
            DownloadTarget::query(url(DOWN_A), "bytes"),
            DownloadTarget::query(url(DOWN_B), "bytes"),
        ],
        upload: vec![url(UP_A), url(UP_B)],
        status: None,
    }
}
