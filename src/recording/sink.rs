//! 录像输出 (Video sink)
//!
//! 默认实现: ffmpeg 子进程, stdin 写入 rgb24 原始帧 → H.264 MP4

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use image::{imageops, RgbImage};

use crate::camera::CameraId;

/// 打开录像文件
pub trait VideoSink: Send + Sync {
    fn open(&self, path: &Path, fps: u32, size: (u32, u32)) -> Result<Box<dyn VideoWriter>>;
}

/// 单个录像文件的写入句柄
pub trait VideoWriter: Send {
    fn write(&mut self, frame: &RgbImage) -> Result<()>;
    fn close(self: Box<Self>) -> Result<()>;
}

/// 录像文件名: event_cam{id}_{YYYYmmdd_HHMMSS}.mp4
pub fn recording_file_name(camera_id: CameraId, at: DateTime<Local>) -> String {
    format!("event_cam{}_{}.mp4", camera_id, crate::gen_time_string(at))
}

/// 录像目录中的 .mp4 文件名, 按名称排序; 目录不存在时为空
pub fn list_recordings(dir: &Path) -> std::io::Result<Vec<String>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut names = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let is_mp4 = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("mp4"));
        if let (true, Some(name)) = (is_mp4, path.file_name().and_then(|n| n.to_str())) {
            names.push(name.to_string());
        }
    }
    names.sort();
    Ok(names)
}

#[derive(Debug, Clone)]
pub struct FfmpegSink {
    pub program: String,
}

impl Default for FfmpegSink {
    fn default() -> Self {
        Self {
            program: "ffmpeg".to_string(),
        }
    }
}

impl FfmpegSink {
    fn args(path: &Path, fps: u32, (width, height): (u32, u32)) -> Vec<String> {
        vec![
            "-y".to_string(),
            "-f".to_string(),
            "rawvideo".to_string(),
            "-pix_fmt".to_string(),
            "rgb24".to_string(),
            "-s".to_string(),
            format!("{}x{}", width, height),
            "-r".to_string(),
            fps.to_string(),
            "-i".to_string(),
            "-".to_string(),
            "-an".to_string(),
            "-c:v".to_string(),
            "libx264".to_string(),
            "-preset".to_string(),
            "veryfast".to_string(),
            "-pix_fmt".to_string(),
            "yuv420p".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            path.to_string_lossy().into_owned(),
        ]
    }
}

impl VideoSink for FfmpegSink {
    fn open(&self, path: &Path, fps: u32, size: (u32, u32)) -> Result<Box<dyn VideoWriter>> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let mut child = Command::new(&self.program)
            .args(Self::args(path, fps, size))
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("ffmpeg spawn failed for {}", path.display()))?;

        let Some(stdin) = child.stdin.take() else {
            let _ = child.kill();
            let _ = child.wait();
            anyhow::bail!("ffmpeg stdin unavailable for {}", path.display());
        };

        Ok(Box::new(FfmpegWriter {
            path: path.to_path_buf(),
            size,
            stdin: Some(stdin),
            child,
        }))
    }
}

struct FfmpegWriter {
    path: PathBuf,
    size: (u32, u32),
    stdin: Option<ChildStdin>,
    child: Child,
}

impl VideoWriter for FfmpegWriter {
    fn write(&mut self, frame: &RgbImage) -> Result<()> {
        let stdin = self.stdin.as_mut().context("writer already closed")?;
        let written = if frame.dimensions() == self.size {
            stdin.write_all(frame.as_raw())
        } else {
            let resized =
                imageops::resize(frame, self.size.0, self.size.1, imageops::FilterType::Triangle);
            stdin.write_all(resized.as_raw())
        };
        written.with_context(|| format!("failed to write frame to {}", self.path.display()))
    }

    fn close(mut self: Box<Self>) -> Result<()> {
        // 关闭 stdin 让 ffmpeg 写完文件尾
        drop(self.stdin.take());
        let status = self
            .child
            .wait()
            .with_context(|| format!("ffmpeg did not exit for {}", self.path.display()))?;
        if !status.success() {
            anyhow::bail!("ffmpeg exited with {} for {}", status, self.path.display());
        }
        Ok(())
    }
}

impl Drop for FfmpegWriter {
    fn drop(&mut self) {
        if self.stdin.take().is_some() {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}
