//! Video decoding and encoding through the `ffmpeg`/`ffprobe` command-line tools.
//!
//! Frames travel as raw `rgb24` over the child process pipes, so no native
//! media library is linked into the crate.

use std::ffi::OsString;
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::thread::JoinHandle;

use image::RgbImage;
use serde::Deserialize;
use thiserror::Error;

pub type MediaResult<T> = Result<T, MediaError>;

/// Stream properties needed to decode and re-encode a video.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoInfo {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub duration_seconds: f64,
}

impl VideoInfo {
    fn frame_len(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }
}

pub type FrameIter = Box<dyn Iterator<Item = MediaResult<RgbImage>> + Send>;

/// Source of decoded frames and sink for encoded ones.
///
/// All methods block; callers run them off the async scheduler.
pub trait VideoBackend: Send + Sync {
    fn probe(&self, path: &Path) -> MediaResult<VideoInfo>;

    /// Decoded frames in presentation order.
    fn frames(&self, path: &Path, info: &VideoInfo) -> MediaResult<FrameIter>;

    /// Writer producing a video at `output` with the resolution and frame
    /// rate of `info`.
    fn encoder(&self, output: &Path, info: &VideoInfo) -> MediaResult<Box<dyn FrameSink>>;
}

pub trait FrameSink: Send {
    fn push(&mut self, frame: &RgbImage) -> MediaResult<()>;

    /// Flush and close the output file.
    fn finish(self: Box<Self>) -> MediaResult<()>;
}

#[derive(Debug, Clone)]
pub struct FfmpegBackend {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
}

impl FfmpegBackend {
    pub fn new(ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
        }
    }
}

impl Default for FfmpegBackend {
    fn default() -> Self {
        Self::new("ffmpeg", "ffprobe")
    }
}

impl VideoBackend for FfmpegBackend {
    fn probe(&self, path: &Path) -> MediaResult<VideoInfo> {
        if !path.exists() {
            return Err(MediaError::FileNotFound(path.to_path_buf()));
        }

        let output = Command::new(&self.ffprobe)
            .args([
                "-v",
                "error",
                "-select_streams",
                "v:0",
                "-show_entries",
                "stream=width,height,r_frame_rate,avg_frame_rate:format=duration",
                "-of",
                "json",
            ])
            .arg(path)
            .output()
            .map_err(|e| spawn_error(e, MediaError::FfprobeNotFound))?;

        if !output.status.success() {
            return Err(MediaError::FfprobeFailed {
                message: format!("ffprobe exited with {}", output.status),
                stderr: Some(String::from_utf8_lossy(&output.stderr).into_owned()),
            });
        }

        parse_probe_output(&output.stdout)
    }

    fn frames(&self, path: &Path, info: &VideoInfo) -> MediaResult<FrameIter> {
        let mut child = Command::new(&self.ffmpeg)
            .args(decode_args(path))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| spawn_error(e, MediaError::FfmpegNotFound))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| MediaError::internal("ffmpeg decoder stdout was not captured"))?;
        let stderr = drain_stderr(&mut child);

        Ok(Box::new(FfmpegFrames {
            child,
            stdout,
            stderr,
            width: info.width,
            height: info.height,
            frame_len: info.frame_len(),
            done: false,
        }))
    }

    fn encoder(&self, output: &Path, info: &VideoInfo) -> MediaResult<Box<dyn FrameSink>> {
        let size = format!("{}x{}", info.width, info.height);
        let rate = format!("{}", if info.fps > 0.0 { info.fps } else { 30.0 });

        let mut child = Command::new(&self.ffmpeg)
            .args(["-v", "error", "-y", "-f", "rawvideo", "-pix_fmt", "rgb24", "-s"])
            .arg(&size)
            .arg("-r")
            .arg(&rate)
            .args([
                "-i",
                "-",
                // libx264 with yuv420p needs even dimensions.
                "-vf",
                "pad=ceil(iw/2)*2:ceil(ih/2)*2",
                "-c:v",
                "libx264",
                "-pix_fmt",
                "yuv420p",
                "-movflags",
                "+faststart",
            ])
            .arg(output)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| spawn_error(e, MediaError::FfmpegNotFound))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| MediaError::internal("ffmpeg encoder stdin was not captured"))?;
        let stderr = drain_stderr(&mut child);

        Ok(Box::new(FfmpegSink {
            child,
            stdin: Some(stdin),
            stderr,
            width: info.width,
            height: info.height,
        }))
    }
}

struct FfmpegFrames {
    child: Child,
    stdout: ChildStdout,
    stderr: StderrDrain,
    width: u32,
    height: u32,
    frame_len: usize,
    done: bool,
}

impl FfmpegFrames {
    fn finish(&mut self) -> MediaResult<()> {
        self.done = true;
        let status = self.child.wait()?;
        let stderr = self.stderr.collect();
        if status.success() {
            Ok(())
        } else {
            Err(MediaError::ffmpeg_failed(
                "video decoding failed",
                Some(stderr),
                status.code(),
            ))
        }
    }
}

impl Iterator for FfmpegFrames {
    type Item = MediaResult<RgbImage>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let mut buf = vec![0u8; self.frame_len];
        match read_frame(&mut self.stdout, &mut buf) {
            Ok(true) => Some(
                RgbImage::from_raw(self.width, self.height, buf)
                    .ok_or_else(|| MediaError::InvalidVideo("frame buffer size mismatch".into())),
            ),
            Ok(false) => self.finish().err().map(Err),
            Err(e) => {
                self.done = true;
                let _ = self.child.kill();
                let _ = self.child.wait();
                Some(Err(e))
            }
        }
    }
}

impl Drop for FfmpegFrames {
    fn drop(&mut self) {
        if !self.done {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

struct FfmpegSink {
    child: Child,
    stdin: Option<ChildStdin>,
    stderr: StderrDrain,
    width: u32,
    height: u32,
}

impl FrameSink for FfmpegSink {
    fn push(&mut self, frame: &RgbImage) -> MediaResult<()> {
        if frame.width() != self.width || frame.height() != self.height {
            return Err(MediaError::InvalidVideo(format!(
                "frame is {}x{}, encoder expects {}x{}",
                frame.width(),
                frame.height(),
                self.width,
                self.height
            )));
        }
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| MediaError::internal("encoder already finished"))?;
        stdin.write_all(frame.as_raw())?;
        Ok(())
    }

    fn finish(mut self: Box<Self>) -> MediaResult<()> {
        // Closing stdin signals end of stream to ffmpeg.
        drop(self.stdin.take());
        let status = self.child.wait()?;
        let stderr = self.stderr.collect();
        if status.success() {
            Ok(())
        } else {
            Err(MediaError::ffmpeg_failed(
                "video encoding failed",
                Some(stderr),
                status.code(),
            ))
        }
    }
}

impl Drop for FfmpegSink {
    fn drop(&mut self) {
        if self.stdin.is_some() {
            drop(self.stdin.take());
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

/// ffmpeg arguments decoding `path` to raw `rgb24` on stdout.
///
/// Autorotation stays off so frames keep the coded dimensions that
/// `ffprobe` reports.
fn decode_args(path: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = ["-v", "error", "-nostdin", "-noautorotate", "-i"]
        .into_iter()
        .map(OsString::from)
        .collect();
    args.push(path.as_os_str().to_owned());
    args.extend(
        ["-f", "rawvideo", "-pix_fmt", "rgb24", "-"]
            .into_iter()
            .map(OsString::from),
    );
    args
}

/// Background reader of a child's stderr, so a chatty ffmpeg never blocks
/// on a full pipe while frames are streamed.
struct StderrDrain(Option<JoinHandle<String>>);

fn drain_stderr(child: &mut Child) -> StderrDrain {
    StderrDrain(child.stderr.take().map(|mut pipe| {
        std::thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf);
            String::from_utf8_lossy(&buf).into_owned()
        })
    }))
}

impl StderrDrain {
    /// Everything the child wrote to stderr. Call after the child exited.
    fn collect(&mut self) -> String {
        self.0
            .take()
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default()
    }
}

/// Fill `buf` with one frame. Returns `false` on a clean end of stream;
/// a stream ending mid-frame is an error.
fn read_frame(reader: &mut impl Read, buf: &mut [u8]) -> MediaResult<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }

    match filled {
        0 => Ok(false),
        n if n == buf.len() => Ok(true),
        n => Err(MediaError::InvalidVideo(format!(
            "truncated frame: got {n} of {} bytes",
            buf.len()
        ))),
    }
}

fn spawn_error(err: std::io::Error, not_found: MediaError) -> MediaError {
    if err.kind() == ErrorKind::NotFound {
        not_found
    } else {
        MediaError::Io(err)
    }
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

fn parse_probe_output(stdout: &[u8]) -> MediaResult<VideoInfo> {
    let probe: ProbeOutput = serde_json::from_slice(stdout)?;
    let stream = probe
        .streams
        .into_iter()
        .next()
        .ok_or_else(|| MediaError::InvalidVideo("no video stream found".into()))?;

    let (width, height) = match (stream.width, stream.height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
        _ => return Err(MediaError::InvalidVideo("video stream has no dimensions".into())),
    };

    let fps = stream
        .avg_frame_rate
        .as_deref()
        .and_then(parse_frame_rate)
        .or_else(|| stream.r_frame_rate.as_deref().and_then(parse_frame_rate))
        .unwrap_or(0.0);

    let duration_seconds = probe
        .format
        .and_then(|f| f.duration)
        .and_then(|d| d.parse::<f64>().ok())
        .unwrap_or(0.0);

    Ok(VideoInfo {
        width,
        height,
        fps,
        duration_seconds,
    })
}

/// Parse an ffprobe rate such as `30000/1001` or `25`.
fn parse_frame_rate(rate: &str) -> Option<f64> {
    let value = match rate.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().ok()?;
            let den: f64 = den.trim().parse().ok()?;
            if den == 0.0 {
                return None;
            }
            num / den
        }
        None => rate.trim().parse().ok()?,
    };
    (value.is_finite() && value > 0.0).then_some(value)
}

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("FFmpeg not found")]
    FfmpegNotFound,

    #[error("FFprobe not found")]
    FfprobeNotFound,

    #[error("FFmpeg command failed: {message}")]
    FfmpegFailed {
        message: String,
        stderr: Option<String>,
        exit_code: Option<i32>,
    },

    #[error("FFprobe command failed: {message}")]
    FfprobeFailed {
        message: String,
        stderr: Option<String>,
    },

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Invalid video file: {0}")]
    InvalidVideo(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MediaError {
    pub fn ffmpeg_failed(
        message: impl Into<String>,
        stderr: Option<String>,
        exit_code: Option<i32>,
    ) -> Self {
        Self::FfmpegFailed {
            message: message.into(),
            stderr,
            exit_code,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_parse_frame_rate() {
        assert_eq!(parse_frame_rate("25"), Some(25.0));
        assert_eq!(parse_frame_rate("30/1"), Some(30.0));
        assert!((parse_frame_rate("30000/1001").unwrap() - 29.97).abs() < 0.01);
        assert_eq!(parse_frame_rate("0/0"), None);
        assert_eq!(parse_frame_rate("n/a"), None);
    }

    #[test]
    fn test_parse_probe_output() {
        let json = br#"{
            "streams": [{"width": 640, "height": 480, "r_frame_rate": "30/1", "avg_frame_rate": "0/0"}],
            "format": {"duration": "2.500000"}
        }"#;
        let info = parse_probe_output(json).unwrap();
        assert_eq!(info.width, 640);
        assert_eq!(info.height, 480);
        assert_eq!(info.fps, 30.0);
        assert_eq!(info.duration_seconds, 2.5);
    }

    #[test]
    fn test_parse_probe_output_without_video_stream() {
        let json = br#"{"streams": [], "format": {"duration": "1.0"}}"#;
        assert!(matches!(
            parse_probe_output(json),
            Err(MediaError::InvalidVideo(_))
        ));
    }

    #[test]
    fn test_read_frame_detects_end_and_truncation() {
        let mut reader = Cursor::new(vec![1u8; 10]);
        let mut buf = [0u8; 4];
        assert!(read_frame(&mut reader, &mut buf).unwrap());
        assert!(read_frame(&mut reader, &mut buf).unwrap());
        // Two bytes left over: a truncated frame.
        assert!(matches!(
            read_frame(&mut reader, &mut buf),
            Err(MediaError::InvalidVideo(_))
        ));
        assert!(!read_frame(&mut reader, &mut buf).unwrap());
    }

    #[test]
    fn test_probe_missing_file() {
        let backend = FfmpegBackend::default();
        assert!(matches!(
            backend.probe(Path::new("/nonexistent/clip.mp4")),
            Err(MediaError::FileNotFound(_))
        ));
    }

    #[test]
    fn test_decode_args_disable_autorotation_before_input() {
        let args = decode_args(Path::new("clip.mov"));
        let position = |flag: &str| args.iter().position(|a| a == flag).unwrap();
        assert!(position("-noautorotate") < position("-i"));
        assert_eq!(args[position("-i") + 1], "clip.mov");
        assert_eq!(args.last().unwrap(), "-");
    }

    #[cfg(unix)]
    fn fake_ffmpeg(dir: &Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("ffmpeg");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[test]
    fn test_chatty_decoder_stderr_does_not_stall_frames() {
        let dir = tempfile::tempdir().unwrap();
        // Far more stderr than a pipe buffer holds, written before any frame.
        let ffmpeg = fake_ffmpeg(
            dir.path(),
            "head -c 200000 /dev/zero >&2\nhead -c 48 /dev/zero",
        );
        let backend = FfmpegBackend::new(ffmpeg, "ffprobe");
        let info = VideoInfo {
            width: 4,
            height: 4,
            fps: 1.0,
            duration_seconds: 1.0,
        };

        let frames: Vec<_> = backend
            .frames(Path::new("clip.mp4"), &info)
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].dimensions(), (4, 4));
    }

    #[cfg(unix)]
    #[test]
    fn test_decoder_failure_reports_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let ffmpeg = fake_ffmpeg(dir.path(), "echo 'moov atom not found' >&2\nexit 3");
        let backend = FfmpegBackend::new(ffmpeg, "ffprobe");
        let info = VideoInfo {
            width: 2,
            height: 2,
            fps: 1.0,
            duration_seconds: 1.0,
        };

        let mut frames = backend.frames(Path::new("clip.mp4"), &info).unwrap();
        match frames.next() {
            Some(Err(MediaError::FfmpegFailed {
                stderr, exit_code, ..
            })) => {
                assert!(stderr.unwrap().contains("moov atom not found"));
                assert_eq!(exit_code, Some(3));
            }
            other => panic!("expected decode failure, got {other:?}"),
        }
        assert!(frames.next().is_none());
    }
}
