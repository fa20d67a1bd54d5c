use crate::types::Pt;
use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ReportError>;

/// Failure to flatten one section. Never fatal to a build: the section is kept with an empty
/// content area and the pipeline moves on.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CaptureError {
    #[error("section {0} is not present in the live view")]
    UnknownSection(String),

    #[error("section {section} has zero size ({width}x{height} px)")]
    ZeroSize {
        section: String,
        width: u32,
        height: u32,
    },

    #[error("flattening section {section} failed after {attempts} attempt(s): {message}")]
    Flatten {
        section: String,
        attempts: u32,
        message: String,
    },

    #[error("view error on section {section}: {message}")]
    View { section: String, message: String },
}

/// Errors surfaced by the view-layer collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct ViewError(pub String);

impl ViewError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

#[derive(Error, Debug)]
pub enum ReportError {
    #[error(
        "page geometry leaves a {band:?} content band, below the {required:?} needed for one section"
    )]
    LayoutImpossible { band: Pt, required: Pt },

    #[error("snapshot count {snapshots} does not match section count {sections}")]
    SnapshotMismatch { sections: usize, snapshots: usize },

    #[error("render pass produced {rendered} page(s), plan expected {planned}")]
    PageCountMismatch { planned: usize, rendered: usize },

    #[error("document serialization failed: {0}")]
    Serialization(String),

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl From<serde_json::Error> for ReportError {
    fn from(err: serde_json::Error) -> Self {
        ReportError::InvalidConfiguration(err.to_string())
    }
}
