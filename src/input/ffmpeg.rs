/// FFmpeg 命令行拉流 (默认采集后端)
///
/// 每条连接一个 ffmpeg 子进程: 输入流 → 缩放 → rgb24 原始帧写到 stdout.
/// 释放连接即杀掉子进程, 阻塞中的读帧随管道关闭而返回.
use std::io::Read;
use std::process::{Child, ChildStdout, Command, Stdio};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use image::RgbImage;

use super::source::{Connection, Connector};

/// 采集分辨率 (与解码缩放一致)
pub const CAPTURE_WIDTH: u32 = 1280;
pub const CAPTURE_HEIGHT: u32 = 720;

#[derive(Debug, Clone)]
pub struct FfmpegConnector {
    pub program: String,
    pub width: u32,
    pub height: u32,
}

impl Default for FfmpegConnector {
    fn default() -> Self {
        Self {
            program: "ffmpeg".to_string(),
            width: CAPTURE_WIDTH,
            height: CAPTURE_HEIGHT,
        }
    }
}

impl FfmpegConnector {
    fn args(&self, url: &str) -> Vec<String> {
        let mut args: Vec<String> = Vec::new();
        if url.starts_with("rtsp://") {
            // RTSP 走 TCP, 5秒无数据视为断流
            args.extend(["-rtsp_transport", "tcp", "-timeout", "5000000"].map(String::from));
        }
        args.extend(["-fflags", "nobuffer", "-flags", "low_delay"].map(String::from));
        args.extend(["-i".to_string(), url.to_string()]);
        args.extend([
            "-an".to_string(),
            "-vf".to_string(),
            format!("scale={}:{}", self.width, self.height),
            "-f".to_string(),
            "rawvideo".to_string(),
            "-pix_fmt".to_string(),
            "rgb24".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-".to_string(),
        ]);
        args
    }
}

impl Connector for FfmpegConnector {
    fn open(&self, url: &str) -> Result<Arc<dyn Connection>> {
        let mut child = Command::new(&self.program)
            .args(self.args(url))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("ffmpeg spawn failed for {}", url))?;

        let stdout = match child.stdout.take() {
            Some(stdout) => stdout,
            None => {
                let _ = child.kill();
                let _ = child.wait();
                anyhow::bail!("ffmpeg stdout unavailable for {}", url);
            }
        };

        Ok(Arc::new(FfmpegConnection {
            width: self.width,
            height: self.height,
            stdout: Mutex::new(stdout),
            child: Mutex::new(Some(child)),
        }))
    }
}

pub struct FfmpegConnection {
    width: u32,
    height: u32,
    stdout: Mutex<ChildStdout>,
    child: Mutex<Option<Child>>,
}

impl Connection for FfmpegConnection {
    fn read(&self) -> Result<RgbImage> {
        let frame_len = (self.width * self.height * 3) as usize;
        let mut buffer = vec![0u8; frame_len];
        self.stdout
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .read_exact(&mut buffer)
            .context("ffmpeg stream ended")?;
        RgbImage::from_raw(self.width, self.height, buffer).context("short frame from ffmpeg")
    }

    fn release(&self) {
        let child = self.child.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(mut child) = child {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

impl Drop for FfmpegConnection {
    fn drop(&mut self) {
        self.release();
    }
}
