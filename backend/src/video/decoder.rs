use async_trait::async_trait;
use std::path::Path;
use tokio::process::Command;

use crate::error::AnalysisError;

/// Frame-level access to a local video file.
#[async_trait]
pub trait VideoDecoder: Send + Sync {
    /// Number of video frames; errors when the file cannot be opened.
    async fn frame_count(&self, path: &Path) -> Result<u64, AnalysisError>;

    /// Encoded image bytes (any format the `image` crate reads) for one frame.
    async fn decode_frame(&self, path: &Path, index: u64) -> Result<Vec<u8>, AnalysisError>;
}

/// Decodes through the `ffprobe` and `ffmpeg` binaries.
#[derive(Clone)]
pub struct FfmpegDecoder {
    ffmpeg_path: String,
    ffprobe_path: String,
}

impl FfmpegDecoder {
    pub fn new(ffmpeg_path: String, ffprobe_path: String) -> Self {
        Self {
            ffmpeg_path,
            ffprobe_path,
        }
    }

    /// Runs `binary [input_args] <path> [output_args]` and returns its stdout.
    async fn run(
        &self,
        binary: &str,
        input_args: &[&str],
        path: &Path,
        output_args: &[&str],
    ) -> Result<Vec<u8>, AnalysisError> {
        let output = Command::new(binary)
            .args(input_args)
            .arg(path)
            .args(output_args)
            .kill_on_drop(true)
            .output()
            .await;

        match output {
            Ok(output) if output.status.success() => Ok(output.stdout),
            Ok(output) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                Err(AnalysisError::Service(format!(
                    "{} failed on {}: {}",
                    binary,
                    path.display(),
                    stderr.trim()
                )))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(AnalysisError::Service(format!(
                "{} not found (install ffmpeg)",
                binary
            ))),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl VideoDecoder for FfmpegDecoder {
    async fn frame_count(&self, path: &Path) -> Result<u64, AnalysisError> {
        let stdout = self
            .run(
                &self.ffprobe_path,
                &[
                    "-v",
                    "error",
                    "-select_streams",
                    "v:0",
                    "-count_packets",
                    "-show_entries",
                    "stream=nb_read_packets",
                    "-of",
                    "csv=p=0",
                ],
                path,
                &[],
            )
            .await?;

        parse_frame_count(&String::from_utf8_lossy(&stdout))
    }

    async fn decode_frame(&self, path: &Path, index: u64) -> Result<Vec<u8>, AnalysisError> {
        let filter = format!("select=eq(n\\,{})", index);
        let stdout = self
            .run(
                &self.ffmpeg_path,
                &["-v", "error", "-i"],
                path,
                &["-vf", filter.as_str(), "-vframes", "1", "-f", "image2pipe", "-vcodec", "png", "-"],
            )
            .await?;

        if stdout.is_empty() {
            return Err(AnalysisError::Service(format!(
                "frame {} is past the end of {}",
                index,
                path.display()
            )));
        }
        Ok(stdout)
    }
}

fn parse_frame_count(stdout: &str) -> Result<u64, AnalysisError> {
    let line = stdout.lines().map(str::trim).find(|l| !l.is_empty());
    match line {
        Some(l) => l
            .trim_end_matches(',')
            .parse::<u64>()
            .map_err(|_| AnalysisError::Service(format!("unexpected ffprobe output: {}", l))),
        None => Err(AnalysisError::service("video has no readable video stream")),
    }
}
