use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::errors::UploadError;
use crate::frame::{jpeg_data_uri, Frame};

/// Where the approved photo can be found afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "camelCase")]
pub enum ImageReference {
    /// Durable URL returned by the upload endpoint.
    Url(String),
    /// The encoded frame itself, kept when the upload did not go through.
    DataUri(String),
}

impl ImageReference {
    pub fn as_str(&self) -> &str {
        match self {
            ImageReference::Url(s) | ImageReference::DataUri(s) => s,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, ImageReference::DataUri(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOutcome {
    pub reference: ImageReference,
    /// Soft failure: the session still completes with the data-URI fallback.
    pub upload_failed: bool,
}

#[async_trait]
pub trait UploadBridge: Send + Sync {
    /// Stores one JPEG and returns its durable URL.
    async fn upload(&self, jpeg: Vec<u8>) -> Result<String, UploadError>;
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    #[serde(default)]
    url: Option<String>,
}

/// Posts the JPEG body to a storage endpoint that answers `{"url": "..."}`.
pub struct HttpUploadBridge {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpUploadBridge {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl UploadBridge for HttpUploadBridge {
    async fn upload(&self, jpeg: Vec<u8>) -> Result<String, UploadError> {
        log::debug!("Uploading {} bytes to {}", jpeg.len(), self.endpoint);
        let response = self
            .client
            .post(&self.endpoint)
            .header(reqwest::header::CONTENT_TYPE, "image/jpeg")
            .body(jpeg)
            .send()
            .await?
            .error_for_status()?;
        let body: UploadResponse = response.json().await?;
        parse_url(body)
    }
}

fn parse_url(body: UploadResponse) -> Result<String, UploadError> {
    match body.url {
        Some(url) if !url.trim().is_empty() => Ok(url),
        _ => Err(UploadError::MissingUrl),
    }
}

/// Used when no endpoint is configured; every approved photo falls back.
pub struct DisabledUpload;

#[async_trait]
impl UploadBridge for DisabledUpload {
    async fn upload(&self, _jpeg: Vec<u8>) -> Result<String, UploadError> {
        Err(UploadError::Disabled)
    }
}

/// Encodes the frame, tries the bridge once, and falls back to a data URI.
///
/// Only fails when the frame cannot be encoded at all.
pub async fn upload_or_fallback(
    bridge: &dyn UploadBridge,
    frame: &Frame,
    jpeg_quality: u8,
) -> Result<UploadOutcome, UploadError> {
    let jpeg = frame
        .encode_jpeg(jpeg_quality)
        .map_err(|e| UploadError::Encode(format!("{:#}", e)))?;

    match bridge.upload(jpeg.clone()).await {
        Ok(url) => {
            log::info!("Frame {} uploaded: {}", frame.id(), url);
            Ok(UploadOutcome {
                reference: ImageReference::Url(url),
                upload_failed: false,
            })
        }
        Err(e) => {
            log::warn!("Upload of frame {} failed, keeping local copy: {}", frame.id(), e);
            Ok(UploadOutcome {
                reference: ImageReference::DataUri(jpeg_data_uri(&jpeg)),
                upload_failed: true,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameId;
    use image::{Rgba, RgbaImage};
    use std::sync::Mutex;

    struct Recording {
        reply: Result<String, ()>,
        received: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl UploadBridge for Recording {
        async fn upload(&self, jpeg: Vec<u8>) -> Result<String, UploadError> {
            self.received.lock().unwrap().push(jpeg.len());
            self.reply
                .clone()
                .map_err(|_| UploadError::Request("connection refused".into()))
        }
    }

    fn frame() -> Frame {
        Frame::new(FrameId(5), RgbaImage::from_pixel(16, 12, Rgba([180, 130, 110, 255])))
    }

    #[tokio::test]
    async fn test_successful_upload_returns_url() {
        let bridge = Recording {
            reply: Ok("https://cdn.example.com/selfies/5.jpg".into()),
            received: Mutex::new(Vec::new()),
        };
        let outcome = upload_or_fallback(&bridge, &frame(), 85).await.unwrap();
        assert_eq!(outcome.reference, ImageReference::Url("https://cdn.example.com/selfies/5.jpg".into()));
        assert!(!outcome.upload_failed);
        assert_eq!(bridge.received.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_upload_keeps_data_uri() {
        let bridge = Recording {
            reply: Err(()),
            received: Mutex::new(Vec::new()),
        };
        let f = frame();
        let outcome = upload_or_fallback(&bridge, &f, 85).await.unwrap();
        assert!(outcome.upload_failed);
        assert!(outcome.reference.is_fallback());
        assert_eq!(outcome.reference.as_str(), f.to_data_uri(85).unwrap());
    }

    #[tokio::test]
    async fn test_disabled_upload_falls_back() {
        let outcome = upload_or_fallback(&DisabledUpload, &frame(), 85).await.unwrap();
        assert!(outcome.upload_failed);
        assert!(outcome.reference.as_str().starts_with("data:image/jpeg;base64,"));
    }

    #[test]
    fn test_response_without_url_is_an_error() {
        assert!(matches!(parse_url(UploadResponse { url: None }), Err(UploadError::MissingUrl)));
        assert!(matches!(parse_url(UploadResponse { url: Some("  ".into()) }), Err(UploadError::MissingUrl)));
        assert_eq!(
            parse_url(UploadResponse { url: Some("https://x/y.jpg".into()) }).unwrap(),
            "https://x/y.jpg"
        );
    }
}
