/// 进程内 FFmpeg 解码 (需要 `ffmpeg-native` 功能)
/// In-process decoding via ez-ffmpeg frame pipeline
///
/// 解码线程: 拉流 → scale + yuv420p → RGB → 有界通道 → 采集线程
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use ez_ffmpeg::core::context::null_output::create_null_output;
use ez_ffmpeg::core::scheduler::ffmpeg_scheduler::{FfmpegScheduler, Running};
use ez_ffmpeg::filter::frame_filter::FrameFilter;
use ez_ffmpeg::filter::frame_filter_context::FrameFilterContext;
use ez_ffmpeg::filter::frame_pipeline_builder::FramePipelineBuilder;
use ez_ffmpeg::{AVMediaType, FfmpegContext, Frame, Input};
use image::RgbImage;

use super::ffmpeg::{CAPTURE_HEIGHT, CAPTURE_WIDTH};
use super::source::{Connection, Connector};

/// 读帧超时: 超时视为断流
const READ_TIMEOUT: Duration = Duration::from_secs(5);
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// 解码过滤器: YUV420P 帧 → RgbImage
struct DecodeFilter {
    tx: Sender<RgbImage>,
    stopped: Arc<AtomicBool>,
    dropped_frames: usize,
}

impl FrameFilter for DecodeFilter {
    fn media_type(&self) -> AVMediaType {
        AVMediaType::AVMEDIA_TYPE_VIDEO
    }

    fn init(&mut self, _ctx: &FrameFilterContext) -> Result<(), String> {
        log::debug!("decode thread started");
        Ok(())
    }

    fn filter_frame(
        &mut self,
        frame: Frame,
        _ctx: &FrameFilterContext,
    ) -> Result<Option<Frame>, String> {
        // 连接已释放: 返回错误结束解码
        if self.stopped.load(Ordering::Acquire) {
            return Err("connection released".to_string());
        }

        let Some(image) = (unsafe { yuv420p_frame_to_rgb(&frame) }) else {
            self.dropped_frames += 1;
            return Ok(None);
        };

        match self.tx.try_send(image) {
            // 消费端跟不上时丢帧, 保持低延迟
            Ok(()) | Err(TrySendError::Full(_)) => Ok(Some(frame)),
            Err(TrySendError::Disconnected(_)) => Err("reader gone".to_string()),
        }
    }

    fn uninit(&mut self, _ctx: &FrameFilterContext) {
        log::debug!("decode thread exited ({} dropped frames)", self.dropped_frames);
    }
}

/// 读取 AVFrame 的 YUV420P 平面并转为 RGB; 空帧/损坏帧返回 None
unsafe fn yuv420p_frame_to_rgb(frame: &Frame) -> Option<RgbImage> {
    if frame.as_ptr().is_null() || frame.is_empty() || frame.is_corrupt() {
        return None;
    }
    let av = &*frame.as_ptr();
    let (w, h) = (av.width as usize, av.height as usize);
    if w == 0 || h == 0 || w > 4096 || h > 4096 {
        return None;
    }
    // 缺少参考帧 / 无效比特流
    if av.decode_error_flags & 0x03 != 0 {
        return None;
    }

    let (y_plane, u_plane, v_plane) = (av.data[0], av.data[1], av.data[2]);
    let y_stride = av.linesize[0] as usize;
    let uv_stride = av.linesize[1] as usize;
    if y_plane.is_null() || u_plane.is_null() || v_plane.is_null() {
        return None;
    }
    if y_stride < w || uv_stride < w / 2 {
        return None;
    }

    // BT.601, 系数乘以128避免浮点
    let mut buffer = vec![0u8; w * h * 3];
    let mut out_idx = 0;
    for y in 0..h {
        let y_row = y * y_stride;
        let uv_row = (y >> 1) * uv_stride;
        for x in 0..w {
            let y_val = *y_plane.add(y_row + x) as i32;
            let u_val = *u_plane.add(uv_row + (x >> 1)) as i32 - 128;
            let v_val = *v_plane.add(uv_row + (x >> 1)) as i32 - 128;

            buffer[out_idx] = (y_val + ((v_val * 179) >> 7)).clamp(0, 255) as u8;
            buffer[out_idx + 1] =
                (y_val - ((u_val * 44) >> 7) - ((v_val * 91) >> 7)).clamp(0, 255) as u8;
            buffer[out_idx + 2] = (y_val + ((u_val * 227) >> 7)).clamp(0, 255) as u8;
            out_idx += 3;
        }
    }
    RgbImage::from_raw(w as u32, h as u32, buffer)
}

#[derive(Debug, Clone)]
pub struct NativeConnector {
    pub width: u32,
    pub height: u32,
}

impl Default for NativeConnector {
    fn default() -> Self {
        Self {
            width: CAPTURE_WIDTH,
            height: CAPTURE_HEIGHT,
        }
    }
}

impl Connector for NativeConnector {
    fn open(&self, url: &str) -> Result<Arc<dyn Connection>> {
        let (tx, rx) = crossbeam_channel::bounded(2);
        let stopped = Arc::new(AtomicBool::new(false));

        let filter = DecodeFilter {
            tx,
            stopped: Arc::clone(&stopped),
            dropped_frames: 0,
        };
        let pipe: FramePipelineBuilder = AVMediaType::AVMEDIA_TYPE_VIDEO.into();
        let pipe = pipe.filter("decode", Box::new(filter));
        let out = create_null_output().add_frame_pipeline(pipe);

        let mut input = Input::new(url);
        if url.starts_with("rtsp://") {
            input = input.set_input_opts(
                [
                    ("rtsp_transport", "tcp"),
                    ("buffer_size", "67108864"),
                    ("rtsp_flags", "prefer_tcp"),
                ]
                .into(),
            );
        }

        let filter_desc = format!("scale={}:{},format=yuv420p", self.width, self.height);
        let ctx = FfmpegContext::builder()
            .input(input)
            .filter_descs([filter_desc.as_str()].into())
            .output(out)
            .build()
            .map_err(|e| anyhow::anyhow!("ffmpeg build failed: {}", e))?;
        let sch = ctx
            .start()
            .map_err(|e| anyhow::anyhow!("ffmpeg start failed: {}", e))?;

        log::debug!("decoder for {} started", url);

        Ok(Arc::new(NativeConnection {
            rx,
            stopped,
            scheduler: Mutex::new(Some(sch)),
        }))
    }
}

/// 持有运行中的调度器; 释放时中止, 保证同一时刻只有一条底层连接
pub struct NativeConnection {
    rx: Receiver<RgbImage>,
    stopped: Arc<AtomicBool>,
    scheduler: Mutex<Option<FfmpegScheduler<Running>>>,
}

impl Connection for NativeConnection {
    fn read(&self) -> Result<RgbImage> {
        let mut waited = Duration::ZERO;
        loop {
            if self.stopped.load(Ordering::Acquire) {
                anyhow::bail!("connection released");
            }
            match self.rx.recv_timeout(POLL_INTERVAL) {
                Ok(image) => return Ok(image),
                Err(RecvTimeoutError::Disconnected) => anyhow::bail!("decoder exited"),
                Err(RecvTimeoutError::Timeout) => {
                    waited += POLL_INTERVAL;
                    if waited >= READ_TIMEOUT {
                        anyhow::bail!("no frame within {:?}", READ_TIMEOUT);
                    }
                }
            }
        }
    }

    fn release(&self) {
        self.stopped.store(true, Ordering::Release);
        // 中止调度器: 打断阻塞中的网络读并关闭输入
        if let Some(sch) = self.scheduler.lock().unwrap_or_else(|e| e.into_inner()).take() {
            sch.abort();
        }
    }
}

impl Drop for NativeConnection {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_open_missing_input_fails() {
        let connector = NativeConnector::default();
        assert!(connector.open("/nonexistent/cam.mp4").is_err());
    }

    #[test]
    fn test_release_unblocks_read_and_drops_scheduler() {
        let (tx, rx) = crossbeam_channel::bounded(2);
        let conn = Arc::new(NativeConnection {
            rx,
            stopped: Arc::new(AtomicBool::new(false)),
            scheduler: Mutex::new(None),
        });

        let reader = {
            let conn = Arc::clone(&conn);
            std::thread::spawn(move || {
                let start = Instant::now();
                let result = conn.read();
                (result.is_err(), start.elapsed())
            })
        };
        std::thread::sleep(Duration::from_millis(50));
        conn.release();
        conn.release();

        let (failed, elapsed) = reader.join().unwrap();
        assert!(failed);
        assert!(elapsed < READ_TIMEOUT);
        assert!(conn.scheduler.lock().unwrap().is_none());
        drop(tx);
    }
}
