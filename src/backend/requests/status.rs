use crate::backend::requests::Request;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

/// Health descriptor served by `GET /api/status`. Display only; the engine
/// never consults it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub uptime: Option<f64>,
    #[serde(default)]
    pub server: Option<ServerDescriptor>,
    #[serde(default)]
    pub limits: Option<ServerLimits>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerDescriptor {
    pub location: String,
    pub provider: String,
    #[serde(default)]
    pub region: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerLimits {
    #[serde(rename = "maxDownloadSpeed", default)]
    pub max_download_speed: Option<String>,
    #[serde(rename = "maxUploadSpeed", default)]
    pub max_upload_speed: Option<String>,
}

impl StatusResponse {
    pub fn is_healthy(&self) -> bool {
        self.status.eq_ignore_ascii_case("healthy")
    }

    /// "Provider Location", as shown next to the results.
    pub fn server_label(&self) -> Option<String> {
        self.server
            .as_ref()
            .map(|server| format!("{} {}", server.provider, server.location))
    }
}

pub struct StatusRequest;

impl Request for StatusRequest {
    type Response = StatusResponse;

    fn endpoint(&'_ self) -> Cow<'_, str> {
        "api/status".into()
    }
}
