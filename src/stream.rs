//! MJPEG 推流 (Stream publisher)
//!
//! 无限迭代器: 每个元素是一段 multipart/x-mixed-replace 数据块,
//! 传输层直接写出即可. 出错只记录日志, 序列本身不会结束.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError};
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;

use crate::camera::CameraPipeline;

pub const JPEG_QUALITY: u8 = 85;
pub const MJPEG_BOUNDARY: &str = "frame";
pub const MJPEG_CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

/// 暂无帧时的等待
const IDLE_WAIT: Duration = Duration::from_millis(100);
/// 出错后的暂停
const ERROR_PAUSE: Duration = Duration::from_secs(1);
/// 等待新帧的轮询间隔
const POLL_INTERVAL: Duration = Duration::from_millis(10);

pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut buffer = Vec::with_capacity(image.as_raw().len() / 8);
    JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100))
        .encode_image(image)
        .context("jpeg encoding failed")?;
    Ok(buffer)
}

/// 一段 multipart 数据: 边界 + 头 + JPEG
pub fn multipart_chunk(jpeg: &[u8]) -> Vec<u8> {
    let header = format!(
        "--{}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        MJPEG_BOUNDARY,
        jpeg.len()
    );
    let mut chunk = Vec::with_capacity(header.len() + jpeg.len() + 2);
    chunk.extend_from_slice(header.as_bytes());
    chunk.extend_from_slice(jpeg);
    chunk.extend_from_slice(b"\r\n");
    chunk
}

pub struct StreamPublisher {
    pipeline: Arc<CameraPipeline>,
    quality: u8,
    idle_wait: Duration,
    error_pause: Duration,
    last_seq: Option<u64>,
}

impl StreamPublisher {
    pub fn new(pipeline: Arc<CameraPipeline>) -> Self {
        Self {
            pipeline,
            quality: JPEG_QUALITY,
            idle_wait: IDLE_WAIT,
            error_pause: ERROR_PAUSE,
            last_seq: None,
        }
    }

    pub fn with_quality(mut self, quality: u8) -> Self {
        self.quality = quality;
        self
    }

    pub fn with_waits(mut self, idle_wait: Duration, error_pause: Duration) -> Self {
        self.idle_wait = idle_wait;
        self.error_pause = error_pause;
        self
    }

    /// 处理一次, 最多等待一个轮询间隔; 没有新帧时返回 None.
    /// 需要响应停止信号的调用方用它代替 `next`.
    pub fn poll(&mut self) -> Result<Option<Vec<u8>>> {
        let Some(output) = self.pipeline.process()? else {
            std::thread::sleep(self.idle_wait);
            return Ok(None);
        };
        if self.last_seq == Some(output.seq) {
            std::thread::sleep(POLL_INTERVAL);
            return Ok(None);
        }
        self.last_seq = Some(output.seq);

        let jpeg = encode_jpeg(&output.image, self.quality)?;
        Ok(Some(multipart_chunk(&jpeg)))
    }

    /// 持续写出数据块, 直到收到停止信号或发送端被丢弃; 返回写出的帧数
    pub fn write_until(&mut self, out: &mut impl Write, stop_rx: &Receiver<()>) -> Result<usize> {
        let mut frames = 0;
        while matches!(stop_rx.try_recv(), Err(TryRecvError::Empty)) {
            match self.poll() {
                Ok(Some(chunk)) => {
                    out.write_all(&chunk).context("stream write failed")?;
                    frames += 1;
                }
                Ok(None) => {}
                Err(e) => {
                    log::error!("camera {}: stream error: {:#}", self.pipeline.id(), e);
                    match stop_rx.recv_timeout(self.error_pause) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
            }
        }
        Ok(frames)
    }
}

impl Iterator for StreamPublisher {
    type Item = Vec<u8>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.poll() {
                Ok(Some(chunk)) => return Some(chunk),
                Ok(None) => continue,
                Err(e) => {
                    log::error!("camera {}: stream error: {:#}", self.pipeline.id(), e);
                    std::thread::sleep(self.error_pause);
                }
            }
        }
    }
}
