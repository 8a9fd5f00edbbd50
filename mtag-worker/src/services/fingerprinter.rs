//! Acoustic fingerprinting via the Chromaprint `fpcalc` tool
//!
//! Runs `fpcalc -json <file>` and parses its output. fpcalc sometimes exits
//! non-zero after printing a usable fingerprint, so stdout is parsed
//! regardless of the exit status.

use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;

/// fpcalc is killed after this long
pub const FPCALC_TIMEOUT: Duration = Duration::from_secs(60);

/// Fingerprinting errors
#[derive(Debug, Error)]
pub enum FingerprintError {
    #[error("Failed to run fpcalc: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("fpcalc timed out after {0:?}")]
    Timeout(Duration),

    #[error("fpcalc produced no usable output: {0}")]
    InvalidOutput(String),
}

/// Chromaprint fingerprint with the analysed duration
#[derive(Debug, Clone, PartialEq)]
pub struct Fingerprint {
    pub fingerprint: String,
    pub duration_secs: f64,
}

impl Fingerprint {
    /// Duration rounded to whole seconds, as lookup services expect
    pub fn duration_whole_secs(&self) -> u64 {
        self.duration_secs.round().max(0.0) as u64
    }
}

/// Produces an acoustic fingerprint for a file
#[async_trait]
pub trait Fingerprinter: Send + Sync {
    async fn fingerprint(&self, path: &Path) -> Result<Fingerprint, FingerprintError>;
}

#[derive(Debug, Deserialize)]
struct FpcalcOutput {
    duration: Option<f64>,
    fingerprint: Option<String>,
}

/// Parse `fpcalc -json` stdout
pub fn parse_fpcalc_output(stdout: &str) -> Result<Fingerprint, FingerprintError> {
    let output: FpcalcOutput = serde_json::from_str(stdout.trim())
        .map_err(|e| FingerprintError::InvalidOutput(e.to_string()))?;

    match (output.fingerprint, output.duration) {
        (Some(fingerprint), Some(duration_secs)) if !fingerprint.is_empty() && duration_secs > 0.0 => {
            Ok(Fingerprint {
                fingerprint,
                duration_secs,
            })
        }
        _ => Err(FingerprintError::InvalidOutput(
            "missing fingerprint or duration".to_string(),
        )),
    }
}

/// Fingerprinter backed by the external `fpcalc` binary
pub struct FpcalcFingerprinter {
    binary: String,
    timeout: Duration,
}

impl FpcalcFingerprinter {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            timeout: FPCALC_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for FpcalcFingerprinter {
    fn default() -> Self {
        Self::new("fpcalc")
    }
}

#[async_trait]
impl Fingerprinter for FpcalcFingerprinter {
    async fn fingerprint(&self, path: &Path) -> Result<Fingerprint, FingerprintError> {
        let child = Command::new(&self.binary)
            .arg("-json")
            .arg(path)
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.timeout, child)
            .await
            .map_err(|_| FingerprintError::Timeout(self.timeout))??;

        if !output.status.success() {
            tracing::debug!(
                path = %path.display(),
                status = ?output.status.code(),
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "fpcalc exited non-zero, parsing stdout anyway"
            );
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        if stdout.trim().is_empty() {
            return Err(FingerprintError::InvalidOutput(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        parse_fpcalc_output(&stdout)
    }
}
