use crate::error::Result;
use chrono::NaiveDate;
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Serialized report, ready to hand to the caller or to write out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentArtifact {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl DocumentArtifact {
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            bytes,
        }
    }

    pub fn sha256_hex(&self) -> String {
        let digest = Sha256::digest(&self.bytes);
        let mut out = String::with_capacity(digest.len() * 2);
        for byte in digest {
            use std::fmt::Write;
            let _ = write!(&mut out, "{byte:02x}");
        }
        out
    }

    /// Writes `<dir>/<file_name>` via a temp file and a rename, so readers never see a
    /// partial report. The temp file is removed on failure.
    pub fn save_to(&self, dir: impl AsRef<Path>) -> Result<PathBuf> {
        let dir = dir.as_ref();
        let target = dir.join(&self.file_name);
        let temp = dir.join(format!(".{}.{}.tmp", self.file_name, std::process::id()));
        match write_and_rename(&temp, &target, &self.bytes) {
            Ok(()) => Ok(target),
            Err(err) => {
                let _ = fs::remove_file(&temp);
                log::warn!("saving {} failed: {err}", target.display());
                Err(err.into())
            }
        }
    }
}

fn write_and_rename(temp: &Path, target: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = File::create(temp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    drop(file);
    fs::rename(temp, target)
}

/// `<prefix>-<subject or "report">-<YYYY-MM-DD>.pdf`.
pub fn report_file_name(prefix: &str, subject_name: Option<&str>, date: NaiveDate) -> String {
    let subject = subject_name
        .map(sanitize_component)
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "report".to_string());
    let prefix = sanitize_component(prefix);
    let date = date.format("%Y-%m-%d");
    if prefix.is_empty() {
        format!("{subject}-{date}.pdf")
    } else {
        format!("{prefix}-{subject}-{date}.pdf")
    }
}

fn sanitize_component(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.trim().chars() {
        if ch.is_whitespace() || ch == '/' || ch == '\\' {
            if !out.ends_with('-') {
                out.push('-');
            }
        } else if !ch.is_control() {
            out.push(ch);
        }
    }
    out.trim_matches('-').to_string()
}
