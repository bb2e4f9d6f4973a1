//! eru-speed measures the latency, jitter, download and upload throughput
//! of an internet connection against HTTP endpoints.
//!
//! The [`speedtest`] module holds the measurement engine, [`backend`] the
//! transports it measures against, and [`scoring`] turns a finished run into
//! use-case quality labels.

pub mod backend;
pub mod errors;
pub mod measurements;
pub mod progress;
pub mod results;
pub mod retry;
pub mod scoring;
pub mod speedtest;
pub mod stats;
