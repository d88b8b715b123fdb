//! Hand-off of the final photo to the surrounding registration wizard.

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::frame::FrameId;
use crate::upload::ImageReference;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishedImage {
    pub frame_id: FrameId,
    pub reference: ImageReference,
    pub upload_failed: bool,
    pub captured_at: DateTime<Local>,
}

/// Called from a blocking worker thread, so implementations may do file I/O.
pub trait WizardSink: Send + Sync {
    fn publish(&self, image: &PublishedImage) -> Result<()>;
}

/// Writes the photo reference into the wizard's JSON user record, leaving
/// every other field untouched.
pub struct JsonRecordSink {
    path: PathBuf,
}

impl JsonRecordSink {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    fn read_record(&self) -> Result<Map<String, Value>> {
        if !self.path.exists() {
            return Ok(Map::new());
        }
        let contents = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read wizard record: {}", self.path.display()))?;
        if contents.trim().is_empty() {
            return Ok(Map::new());
        }
        match serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse wizard record: {}", self.path.display()))?
        {
            Value::Object(map) => Ok(map),
            _ => Err(anyhow::anyhow!("Wizard record is not a JSON object: {}", self.path.display())),
        }
    }
}

impl WizardSink for JsonRecordSink {
    fn publish(&self, image: &PublishedImage) -> Result<()> {
        let mut record = self.read_record()?;
        record.insert("selfie".into(), Value::String(image.reference.as_str().to_string()));
        record.insert("selfieUploadFailed".into(), Value::Bool(image.upload_failed));
        record.insert("selfieCapturedAt".into(), Value::String(image.captured_at.to_rfc3339()));

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create record directory: {}", parent.display()))?;
            }
        }
        let contents = serde_json::to_string_pretty(&Value::Object(record)).context("Failed to serialize wizard record")?;
        std::fs::write(&self.path, contents)
            .with_context(|| format!("Failed to write wizard record: {}", self.path.display()))?;

        log::info!("Published frame {} to {}", image.frame_id, self.path.display());
        Ok(())
    }
}

/// Keeps everything published, for callers that read the result in-process.
#[derive(Default)]
pub struct MemorySink {
    published: Mutex<Vec<PublishedImage>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn published(&self) -> Vec<PublishedImage> {
        self.published.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

impl WizardSink for MemorySink {
    fn publish(&self, image: &PublishedImage) -> Result<()> {
        self.published
            .lock()
            .map_err(|_| anyhow::anyhow!("memory sink poisoned"))?
            .push(image.clone());
        Ok(())
    }
}
