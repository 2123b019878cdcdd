//! Video compression by shelling out to ffmpeg.

use super::ExecutorError;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// How much of ffmpeg's stderr to keep for the failure message
const STDERR_TAIL_CHARS: usize = 400;

/// Transcode `input` to a lower-bitrate mp4 next to it.
///
/// The child is spawned with `kill_on_drop`, so an abandoned dispatch kills
/// ffmpeg and the partial output is discarded with the flow directory.
///
/// # Errors
///
/// `Io` if ffmpeg cannot be spawned at all, `Transcode` with the stderr
/// tail if it exits unsuccessfully (unsupported input included).
pub async fn compress_video(
    ffmpeg: &str,
    input: &Path,
    bitrate: &str,
) -> Result<PathBuf, ExecutorError> {
    let file_name = input
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("video");
    let out_path = input.with_file_name(format!("{file_name}_compressed.mp4"));

    debug!(input = %input.display(), bitrate, "Spawning ffmpeg");
    let output = Command::new(ffmpeg)
        .arg("-y")
        .arg("-i")
        .arg(input)
        .arg("-b:v")
        .arg(bitrate)
        .arg("-maxrate")
        .arg(bitrate)
        .arg(&out_path)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await?;

    if !output.status.success() {
        let _ = std::fs::remove_file(&out_path);
        return Err(ExecutorError::Transcode(stderr_tail(&output.stderr)));
    }

    Ok(out_path)
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return "ffmpeg exited with an error".to_string();
    }
    let chars: Vec<char> = trimmed.chars().collect();
    if chars.len() <= STDERR_TAIL_CHARS {
        trimmed.to_string()
    } else {
        chars[chars.len() - STDERR_TAIL_CHARS..].iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_binary_is_io_failure() {
        let dir = tempfile::tempdir().expect("tempdir");
        let input = dir.path().join("clip.mp4");
        std::fs::write(&input, b"fake video").expect("write input");

        let err = compress_video("/nonexistent/ffmpeg-binary", &input, "400k")
            .await
            .expect_err("must fail");
        assert!(matches!(err, ExecutorError::Io(_)));
    }

    #[test]
    fn stderr_tail_keeps_the_end() {
        let long: String = "x".repeat(1000) + "the actual error";
        let tail = stderr_tail(long.as_bytes());
        assert!(tail.ends_with("the actual error"));
        assert_eq!(tail.chars().count(), STDERR_TAIL_CHARS);
    }

    #[test]
    fn empty_stderr_gets_a_placeholder() {
        assert_eq!(stderr_tail(b"  "), "ffmpeg exited with an error");
    }
}
