//! 录像控制器 (Recording controller)
//!
//! 状态机: Idle → PendingStart → Recording → Idle
//! 违规持续满防抖窗口(2秒)才开始录像; 违规消失立即停止.
//! 写入按录像帧率限速, 与调用方的处理频率无关.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use image::RgbImage;

use super::sink::{recording_file_name, VideoSink, VideoWriter};
use crate::camera::CameraId;
use crate::detection::{WORK_HEIGHT, WORK_WIDTH};

/// 防抖窗口
pub const DEBOUNCE_WINDOW: Duration = Duration::from_secs(2);
/// 录像帧率
pub const RECORDING_FPS: u32 = 20;

/// 正在进行的录像
pub struct RecordingSession {
    started_at: DateTime<Local>,
    path: PathBuf,
    writer: Box<dyn VideoWriter>,
    /// 下一帧最早写入时间
    next_write: Instant,
}

impl RecordingSession {
    pub fn started_at(&self) -> DateTime<Local> {
        self.started_at
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

pub enum RecordingState {
    Idle,
    PendingStart { since: Instant },
    Recording(RecordingSession),
}

impl RecordingState {
    pub fn is_recording(&self) -> bool {
        matches!(self, RecordingState::Recording(_))
    }
}

pub struct RecordingController {
    camera_id: CameraId,
    sink: Arc<dyn VideoSink>,
    video_dir: PathBuf,
    fps: u32,
    debounce: Duration,
    state: RecordingState,
}

impl RecordingController {
    pub fn new(camera_id: CameraId, sink: Arc<dyn VideoSink>, video_dir: impl Into<PathBuf>) -> Self {
        Self {
            camera_id,
            sink,
            video_dir: video_dir.into(),
            fps: RECORDING_FPS,
            debounce: DEBOUNCE_WINDOW,
            state: RecordingState::Idle,
        }
    }

    pub fn with_fps(mut self, fps: u32) -> Self {
        self.fps = fps.max(1);
        self
    }

    pub fn state(&self) -> &RecordingState {
        &self.state
    }

    pub fn is_recording(&self) -> bool {
        self.state.is_recording()
    }

    /// 每次流水线调用一次; `frame` 为本帧工作图像, 录像中时写入. 返回是否在录像
    pub fn step(&mut self, violation: bool, now: Instant, frame: &RgbImage) -> bool {
        let state = std::mem::replace(&mut self.state, RecordingState::Idle);
        self.state = match (state, violation) {
            (RecordingState::Idle, false) => RecordingState::Idle,
            (RecordingState::Idle, true) => {
                log::debug!("camera {}: violation, debounce started", self.camera_id);
                RecordingState::PendingStart { since: now }
            }
            (RecordingState::PendingStart { .. }, false) => {
                log::debug!("camera {}: violation cleared before debounce", self.camera_id);
                RecordingState::Idle
            }
            (RecordingState::PendingStart { since }, true) => {
                if now.saturating_duration_since(since) >= self.debounce {
                    self.start_session(now, frame)
                } else {
                    RecordingState::PendingStart { since }
                }
            }
            (RecordingState::Recording(session), false) => {
                self.close_session(session);
                RecordingState::Idle
            }
            (RecordingState::Recording(session), true) => {
                if now >= session.next_write {
                    self.write_frame(session, now, frame)
                } else {
                    RecordingState::Recording(session)
                }
            }
        };
        self.state.is_recording()
    }

    /// 停止进行中的录像 (关闭摄像头时调用)
    pub fn finish(&mut self) {
        if let RecordingState::Recording(session) =
            std::mem::replace(&mut self.state, RecordingState::Idle)
        {
            self.close_session(session);
        }
    }

    fn frame_interval(&self) -> Duration {
        Duration::from_secs(1) / self.fps
    }

    fn start_session(&self, now: Instant, frame: &RgbImage) -> RecordingState {
        let started_at = Local::now();
        let path = self
            .video_dir
            .join(recording_file_name(self.camera_id, started_at));

        match self.sink.open(&path, self.fps, (WORK_WIDTH, WORK_HEIGHT)) {
            Ok(writer) => {
                log::info!("camera {}: recording started {}", self.camera_id, path.display());
                let session = RecordingSession {
                    started_at,
                    path,
                    writer,
                    next_write: now,
                };
                self.write_frame(session, now, frame)
            }
            Err(e) => {
                log::error!(
                    "camera {}: failed to open recording {}: {:#}",
                    self.camera_id,
                    path.display(),
                    e
                );
                RecordingState::Idle
            }
        }
    }

    fn write_frame(
        &self,
        mut session: RecordingSession,
        now: Instant,
        frame: &RgbImage,
    ) -> RecordingState {
        match session.writer.write(frame) {
            Ok(()) => {
                // 落后超过一帧时从当前时间重新计时, 不补帧
                let interval = self.frame_interval();
                let next = session.next_write + interval;
                session.next_write = if next > now { next } else { now + interval };
                RecordingState::Recording(session)
            }
            Err(e) => {
                // 写入失败: 本次录像作废
                log::error!(
                    "camera {}: recording write failed, session discarded: {:#}",
                    self.camera_id,
                    e
                );
                self.close_session(session);
                RecordingState::Idle
            }
        }
    }

    fn close_session(&self, session: RecordingSession) {
        let RecordingSession {
            started_at, path, writer, ..
        } = session;
        let elapsed = Local::now().signed_duration_since(started_at);
        match writer.close() {
            Ok(()) => log::info!(
                "camera {}: recording stopped {} ({:.1}s)",
                self.camera_id,
                path.display(),
                elapsed.num_milliseconds() as f64 / 1000.0
            ),
            Err(e) => log::error!(
                "camera {}: failed to finalize {}: {:#}",
                self.camera_id,
                path.display(),
                e
            ),
        }
    }
}
