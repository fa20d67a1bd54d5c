use crate::error::{ReportError, Result};
use crate::geometry::PageGeometry;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Build settings that can live in a JSON file next to the dashboard deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReportConfig {
    pub geometry: PageGeometry,
    pub supersample: f32,
    pub layer_timeout_ms: u64,
    pub capture_retries: u32,
    pub product_name: String,
    pub footer_lines: Vec<String>,
    pub file_prefix: String,
    /// Parse the serialized PDF back and check its page count.
    pub verify_output: bool,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            geometry: PageGeometry::default(),
            supersample: 2.0,
            layer_timeout_ms: 8_000,
            capture_retries: 1,
            product_name: "Field Report".to_string(),
            footer_lines: Vec::new(),
            file_prefix: "fieldreport".to_string(),
            verify_output: true,
        }
    }
}

impl ReportConfig {
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let config: ReportConfig = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn layer_timeout(&self) -> Duration {
        Duration::from_millis(self.layer_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.supersample.is_finite() || !(1.0..=8.0).contains(&self.supersample) {
            return Err(ReportError::InvalidConfiguration(format!(
                "supersample must be within 1..=8, got {}",
                self.supersample
            )));
        }
        if self.layer_timeout_ms == 0 {
            return Err(ReportError::InvalidConfiguration(
                "layer_timeout_ms must be > 0".to_string(),
            ));
        }
        if self.file_prefix.contains(['/', '\\']) {
            return Err(ReportError::InvalidConfiguration(format!(
                "file_prefix {:?} contains a path separator",
                self.file_prefix
            )));
        }
        self.geometry.validate()
    }
}
