use crate::error::{PillocamError, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::SystemTime;

/// Encoded image formats a capture platform may hand back
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameFormat {
    Jpeg,
    Png,
}

impl FrameFormat {
    pub fn mime_type(&self) -> &'static str {
        match self {
            FrameFormat::Jpeg => "image/jpeg",
            FrameFormat::Png => "image/png",
        }
    }

    pub fn from_mime_type(mime: &str) -> Option<Self> {
        match mime {
            "image/jpeg" | "image/jpg" => Some(FrameFormat::Jpeg),
            "image/png" => Some(FrameFormat::Png),
            _ => None,
        }
    }
}

/// A single still grabbed from a capture stream
#[derive(Debug, Clone)]
pub struct FrameData {
    /// Per-handle frame counter
    pub id: u64,
    pub timestamp: SystemTime,
    /// Encoded image bytes (shared ownership for cheap clones)
    pub data: Arc<Vec<u8>>,
    pub width: u32,
    pub height: u32,
    pub format: FrameFormat,
}

impl FrameData {
    pub fn new(
        id: u64,
        timestamp: SystemTime,
        data: Vec<u8>,
        width: u32,
        height: u32,
        format: FrameFormat,
    ) -> Self {
        Self {
            id,
            timestamp,
            data: Arc::new(data),
            width,
            height,
            format,
        }
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Encode as a `data:` URI, the wire format of the analysis service
    pub fn to_data_uri(&self) -> String {
        format!(
            "data:{};base64,{}",
            self.format.mime_type(),
            STANDARD.encode(self.data.as_slice())
        )
    }
}

/// Split a base64 `data:` URI into its mime type and decoded bytes
pub fn decode_data_uri(uri: &str) -> Result<(String, Vec<u8>)> {
    let rest = uri
        .strip_prefix("data:")
        .ok_or_else(|| PillocamError::system("data URI must start with 'data:'"))?;
    let (header, payload) = rest
        .split_once(',')
        .ok_or_else(|| PillocamError::system("data URI has no payload separator"))?;
    let mime = header
        .strip_suffix(";base64")
        .ok_or_else(|| PillocamError::system("only base64 data URIs are supported"))?;

    let bytes = STANDARD
        .decode(payload)
        .map_err(|e| PillocamError::system(format!("invalid base64 payload: {}", e)))?;

    Ok((mime.to_string(), bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_uri_prefix() {
        let frame = FrameData::new(
            1,
            SystemTime::now(),
            vec![0xFF, 0xD8, 0xFF, 0xD9],
            2,
            2,
            FrameFormat::Jpeg,
        );
        let uri = frame.to_data_uri();
        assert!(uri.starts_with("data:image/jpeg;base64,"));

        let (mime, bytes) = decode_data_uri(&uri).unwrap();
        assert_eq!(mime, "image/jpeg");
        assert_eq!(bytes, vec![0xFF, 0xD8, 0xFF, 0xD9]);
    }

    #[test]
    fn test_decode_rejects_malformed_uris() {
        assert!(decode_data_uri("image/jpeg;base64,AAAA").is_err());
        assert!(decode_data_uri("data:image/jpeg;base64").is_err());
        assert!(decode_data_uri("data:image/jpeg,plain").is_err());
        assert!(decode_data_uri("data:image/jpeg;base64,***").is_err());
    }

    #[test]
    fn test_format_mime_lookup() {
        assert_eq!(FrameFormat::from_mime_type("image/png"), Some(FrameFormat::Png));
        assert_eq!(FrameFormat::from_mime_type("image/jpg"), Some(FrameFormat::Jpeg));
        assert_eq!(FrameFormat::from_mime_type("text/plain"), None);
    }
}
