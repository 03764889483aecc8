//! Interactive screenshot capture.
//!
//! A capture yields a `data:image/png;base64,...` URL ready to attach to the next prompt,
//! or `None` when the user dismissed the capture tool without selecting anything.

use std::path::PathBuf;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use snafu::{ResultExt, Snafu};
use uuid::Uuid;

pub const SCREENCAPTURE_PROGRAM: &str = "/usr/sbin/screencapture";
pub const PNG_DATA_URL_PREFIX: &str = "data:image/png;base64,";

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum CaptureError {
    #[snafu(display("failed to run {program:?} on `{stage}`: {source}"))]
    Spawn {
        stage: &'static str,
        program: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("failed to read capture at {path:?} on `{stage}`: {source}"))]
    ReadCapture {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
}

pub type CaptureResult<T> = Result<T, CaptureError>;

#[async_trait]
pub trait ScreenshotCapture: Send + Sync {
    async fn capture(&self) -> CaptureResult<Option<String>>;
}

pub fn png_data_url(bytes: &[u8]) -> String {
    format!("{PNG_DATA_URL_PREFIX}{}", STANDARD.encode(bytes))
}

/// Runs a capture tool that writes a PNG to the path given as its last argument.
#[derive(Debug, Clone)]
pub struct ScreencaptureCommand {
    program: PathBuf,
    args: Vec<String>,
    temp_dir: PathBuf,
}

impl Default for ScreencaptureCommand {
    fn default() -> Self {
        Self {
            program: PathBuf::from(SCREENCAPTURE_PROGRAM),
            // interactive, no sound, no window shadow
            args: vec!["-i".to_string(), "-r".to_string(), "-o".to_string()],
            temp_dir: std::env::temp_dir(),
        }
    }
}

impl ScreencaptureCommand {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>, temp_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args,
            temp_dir: temp_dir.into(),
        }
    }

    fn output_path(&self) -> PathBuf {
        self.temp_dir
            .join(format!("portal-capture-{}.png", Uuid::now_v7()))
    }
}

#[async_trait]
impl ScreenshotCapture for ScreencaptureCommand {
    async fn capture(&self) -> CaptureResult<Option<String>> {
        let path = self.output_path();

        let status = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .arg(&path)
            .status()
            .await
            .context(SpawnSnafu {
                stage: "run-capture-tool",
                program: self.program.clone(),
            })?;

        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            tracing::debug!(status = ?status.code(), "capture produced no image");
            return Ok(None);
        }

        let bytes = tokio::fs::read(&path).await.context(ReadCaptureSnafu {
            stage: "read-capture-file",
            path: path.clone(),
        });
        if let Err(error) = tokio::fs::remove_file(&path).await {
            tracing::warn!(path = ?path, error = %error, "failed to remove capture file");
        }

        let bytes = bytes?;
        tracing::info!(bytes = bytes.len(), "captured screenshot");
        Ok(Some(png_data_url(&bytes)))
    }
}
