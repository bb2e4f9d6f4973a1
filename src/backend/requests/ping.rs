use crate::backend::requests::Request;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

/// Payload of `GET /api/ping`.
///
/// `simulated_ping` is the server's own claim and is only logged; latency is
/// always the measured round trip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PingResponse {
    pub timestamp: i64,
    #[serde(rename = "serverTime")]
    pub server_time: i64,
    #[serde(rename = "simulatedPing", default)]
    pub simulated_ping: Option<f64>,
}

pub struct PingRequest;

impl Request for PingRequest {
    type Response = PingResponse;

    fn endpoint(&'_ self) -> Cow<'_, str> {
        "api/ping".into()
    }
}
