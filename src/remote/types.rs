use serde::{Deserialize, Serialize};

/// Body of `POST /api/process-image`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessImageRequest {
    /// Frame as a base64 `data:` URI
    pub image_data: String,
    pub algorithm: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessImageResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Body of `POST /api/algorithm/change`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlgorithmChangeRequest {
    pub algorithm: String,
}

/// Reply of `GET /api/status`. Only `algorithm` is always present.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemoteStatus {
    pub algorithm: String,
    /// Server wall-clock time, formatted by the server
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub count: Option<u64>,
    #[serde(default)]
    pub is_streaming: Option<bool>,
    #[serde(default)]
    pub detection_active: Option<bool>,
    #[serde(default)]
    pub active_sessions: Option<u32>,
}

/// Body of `POST /api/device/register`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceRegistration {
    pub device_type: String,
    pub user_agent: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub success: bool,
    #[serde(default)]
    pub device_id: Option<String>,
}
