//! 帧源 (Frame source)
//!
//! 每个摄像头一个独立采集线程: 读帧 → 发布最新帧 + 备用帧.
//! 读帧失败时原地重连, 退避延迟 min(1 + 次数, 5) 个单位.
//! 重连后读到第一帧才算成功, 计数清零; 仅打开成功不清零.
//! 消费者只读取已发布的帧, 从不等待采集.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::Result;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use image::RgbImage;

use super::frame::Frame;
use crate::camera::CameraId;

/// 退避延迟上限 (单位数)
pub const MAX_BACKOFF_UNITS: u32 = 5;

/// 第 `attempts` 次重连前的等待时间 (attempts 从 1 开始)
pub fn backoff_delay(attempts: u32, unit: Duration) -> Duration {
    unit * attempts.saturating_add(1).min(MAX_BACKOFF_UNITS)
}

/// 一条已打开的摄像头连接
///
/// `read` 可能长时间阻塞; `release` 必须能在另一个线程中调用,
/// 并使阻塞中的 `read` 返回错误.
pub trait Connection: Send + Sync {
    fn read(&self) -> Result<RgbImage>;
    fn release(&self);
}

/// 连接工厂
pub trait Connector: Send + Sync {
    fn open(&self, url: &str) -> Result<Arc<dyn Connection>>;
}

/// 摄像头生命周期
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceStatus {
    Connecting,
    Live,
    Reconnecting,
    Stopped,
}

/// 帧读取接口 (流水线只依赖此接口)
pub trait FrameProvider: Send + Sync {
    /// 最新帧; 暂无最新帧时返回备用帧; 从未采集成功时返回 None
    fn capture(&self) -> Option<Frame>;

    fn status(&self) -> SourceStatus {
        SourceStatus::Live
    }

    fn shutdown(&self) {}
}

#[derive(Default)]
struct FrameSlots {
    latest: Option<Frame>,
    last_good: Option<Frame>,
}

struct Shared {
    camera_id: CameraId,
    url: String,
    slots: Mutex<FrameSlots>,
    status: Mutex<SourceStatus>,
    connection: Mutex<Option<Arc<dyn Connection>>>,
    running: AtomicBool,
    seq: AtomicU64,
}

impl Shared {
    fn set_status(&self, status: SourceStatus) {
        *self.status.lock().unwrap_or_else(|e| e.into_inner()) = status;
    }

    fn publish(&self, image: RgbImage) {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed) + 1;
        let frame = Frame::new(image, seq);
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.last_good = Some(frame.clone());
        slots.latest = Some(frame);
    }

    /// 读失败: 最新帧作废, 读取回落到备用帧
    fn invalidate_latest(&self) {
        self.slots.lock().unwrap_or_else(|e| e.into_inner()).latest = None;
    }

    fn current_connection(&self) -> Option<Arc<dyn Connection>> {
        self.connection
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn take_connection(&self) -> Option<Arc<dyn Connection>> {
        self.connection
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
    }
}

/// 采集线程状态 (仅采集线程持有)
struct Acquisition {
    shared: Arc<Shared>,
    connector: Arc<dyn Connector>,
    shutdown_rx: Receiver<()>,
    backoff_unit: Duration,
    attempts: u32,
}

impl Acquisition {
    fn run(mut self) {
        log::info!(
            "camera {}: acquisition started ({})",
            self.shared.camera_id,
            self.shared.url
        );

        match self.connector.open(&self.shared.url) {
            Ok(conn) => {
                *self
                    .shared
                    .connection
                    .lock()
                    .unwrap_or_else(|e| e.into_inner()) = Some(conn);
                self.shared.set_status(SourceStatus::Live);
                log::info!("camera {}: connected", self.shared.camera_id);
            }
            Err(e) => {
                log::warn!("camera {}: initial connect failed: {:#}", self.shared.camera_id, e);
                self.shared.set_status(SourceStatus::Reconnecting);
            }
        }

        while self.shared.running.load(Ordering::Acquire) {
            if self.read_once() {
                continue;
            }
            if !self.shared.running.load(Ordering::Acquire) {
                break;
            }

            self.shared.invalidate_latest();
            self.reconnect();
        }

        if let Some(conn) = self.shared.take_connection() {
            conn.release();
        }
        self.shared.set_status(SourceStatus::Stopped);
        log::info!("camera {}: acquisition stopped", self.shared.camera_id);
    }

    /// 读一帧并发布, 返回是否成功
    fn read_once(&mut self) -> bool {
        let Some(conn) = self.shared.current_connection() else {
            return false;
        };
        match conn.read() {
            Ok(image) => {
                self.shared.publish(image);
                if self.attempts > 0 {
                    log::info!("camera {}: stream recovered", self.shared.camera_id);
                    self.attempts = 0;
                }
                true
            }
            Err(e) => {
                if self.shared.running.load(Ordering::Acquire) {
                    log::warn!(
                        "camera {}: failed to read frame from {}: {:#}",
                        self.shared.camera_id,
                        self.shared.url,
                        e
                    );
                }
                false
            }
        }
    }

    /// 原地重连: 释放旧连接 → 退避等待 → 重新打开
    fn reconnect(&mut self) {
        self.attempts = self.attempts.saturating_add(1);
        let delay = backoff_delay(self.attempts, self.backoff_unit);
        self.shared.set_status(SourceStatus::Reconnecting);
        log::info!(
            "camera {}: reconnecting to {} in {:?} (attempt {})",
            self.shared.camera_id,
            self.shared.url,
            delay,
            self.attempts
        );

        if let Some(conn) = self.shared.take_connection() {
            conn.release();
        }

        // 等待期间可被关闭信号打断
        match self.shutdown_rx.recv_timeout(delay) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
        }
        if !self.shared.running.load(Ordering::Acquire) {
            return;
        }

        match self.connector.open(&self.shared.url) {
            Ok(conn) => {
                *self
                    .shared
                    .connection
                    .lock()
                    .unwrap_or_else(|e| e.into_inner()) = Some(conn);
                self.shared.set_status(SourceStatus::Live);
                log::info!(
                    "camera {}: reconnected to {}",
                    self.shared.camera_id,
                    self.shared.url
                );
            }
            Err(e) => {
                log::warn!(
                    "camera {}: reconnect attempt {} failed: {:#}",
                    self.shared.camera_id,
                    self.attempts,
                    e
                );
            }
        }
    }
}

/// 单个摄像头的帧源, 持有采集线程
pub struct FrameSource {
    shared: Arc<Shared>,
    shutdown_tx: Mutex<Option<Sender<()>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl FrameSource {
    /// 启动采集线程; 首次连接在线程内完成, 失败时按重连流程处理
    pub fn start(
        camera_id: CameraId,
        url: impl Into<String>,
        connector: Arc<dyn Connector>,
        backoff_unit: Duration,
    ) -> Result<Self> {
        let shared = Arc::new(Shared {
            camera_id,
            url: url.into(),
            slots: Mutex::new(FrameSlots::default()),
            status: Mutex::new(SourceStatus::Connecting),
            connection: Mutex::new(None),
            running: AtomicBool::new(true),
            seq: AtomicU64::new(0),
        });
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded(1);

        let acquisition = Acquisition {
            shared: Arc::clone(&shared),
            connector,
            shutdown_rx,
            backoff_unit,
            attempts: 0,
        };
        let worker = std::thread::Builder::new()
            .name(format!("acquire-cam{}", camera_id))
            .spawn(move || acquisition.run())?;

        Ok(Self {
            shared,
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
            worker: Mutex::new(Some(worker)),
        })
    }

    pub fn camera_id(&self) -> CameraId {
        self.shared.camera_id
    }

    pub fn url(&self) -> &str {
        &self.shared.url
    }

    pub fn status(&self) -> SourceStatus {
        *self.shared.status.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 停止采集线程并释放连接; 可与进行中的读帧并发调用, 可重复调用
    pub fn shutdown(&self) {
        if !self.shared.running.swap(false, Ordering::AcqRel) {
            return;
        }
        log::info!("camera {}: shutting down", self.shared.camera_id);

        // 打断退避等待
        if let Some(tx) = self
            .shutdown_tx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            let _ = tx.try_send(());
        }
        // 释放连接以打断阻塞中的读帧
        if let Some(conn) = self.shared.take_connection() {
            conn.release();
        }

        let worker = self.worker.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(worker) = worker {
            if worker.join().is_err() {
                log::error!("camera {}: acquisition thread panicked", self.shared.camera_id);
            }
        }
        self.shared.set_status(SourceStatus::Stopped);
    }
}

impl FrameProvider for FrameSource {
    fn capture(&self) -> Option<Frame> {
        let slots = self.shared.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.latest.clone().or_else(|| slots.last_good.clone())
    }

    fn status(&self) -> SourceStatus {
        FrameSource::status(self)
    }

    fn shutdown(&self) {
        FrameSource::shutdown(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::time::Instant;

    #[test]
    fn test_backoff_sequence() {
        let unit = Duration::from_secs(1);
        let delays: Vec<u64> = (1..=7).map(|n| backoff_delay(n, unit).as_secs()).collect();
        assert_eq!(delays, vec![2, 3, 4, 5, 5, 5, 5]);
        assert_eq!(backoff_delay(u32::MAX, unit), Duration::from_secs(5));
    }

    /// 按脚本返回帧或错误的连接
    struct ScriptedConnection {
        script: Mutex<VecDeque<bool>>,
        released: AtomicBool,
    }

    impl Connection for ScriptedConnection {
        fn read(&self) -> Result<RgbImage> {
            std::thread::sleep(Duration::from_millis(2));
            if self.released.load(Ordering::Acquire) {
                anyhow::bail!("released");
            }
            match self.script.lock().unwrap().pop_front() {
                Some(true) => Ok(RgbImage::new(4, 4)),
                _ => anyhow::bail!("stream ended"),
            }
        }

        fn release(&self) {
            self.released.store(true, Ordering::Release);
        }
    }

    /// 按计划打开连接: `None` 为打开失败, `Some(script)` 为按脚本读帧;
    /// 计划用完后每次打开成功, 读 `then_frames` 帧后断流
    struct ScriptedConnector {
        opens: Mutex<Vec<Instant>>,
        plan: Mutex<VecDeque<Option<Vec<bool>>>>,
        then_frames: usize,
    }

    impl ScriptedConnector {
        fn new(plan: Vec<Option<Vec<bool>>>, then_frames: usize) -> Arc<Self> {
            Arc::new(Self {
                opens: Mutex::new(Vec::new()),
                plan: Mutex::new(plan.into()),
                then_frames,
            })
        }

        fn gaps(&self) -> Vec<Duration> {
            let opens = self.opens.lock().unwrap();
            opens.windows(2).map(|w| w[1] - w[0]).collect()
        }
    }

    impl Connector for ScriptedConnector {
        fn open(&self, _url: &str) -> Result<Arc<dyn Connection>> {
            self.opens.lock().unwrap().push(Instant::now());
            let step = self
                .plan
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Some(vec![true; self.then_frames]));
            match step {
                Some(script) => Ok(Arc::new(ScriptedConnection {
                    script: Mutex::new(script.into()),
                    released: AtomicBool::new(false),
                })),
                None => anyhow::bail!("connection refused"),
            }
        }
    }

    fn wait_until(timeout: Duration, mut f: impl FnMut() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < timeout {
            if f() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        false
    }

    #[test]
    fn test_capture_falls_back_to_last_good_while_reconnecting() {
        let connector = ScriptedConnector::new(
            vec![Some(vec![true, true]), None, None, None],
            1000,
        );
        let unit = Duration::from_millis(20);
        let source = FrameSource::start(1, "test://cam", connector.clone(), unit).unwrap();

        assert!(wait_until(Duration::from_secs(2), || source.capture().is_some()));
        assert!(wait_until(Duration::from_secs(2), || {
            source.status() == SourceStatus::Reconnecting
        }));
        // 重连期间始终能拿到备用帧
        for _ in 0..10 {
            assert!(source.capture().is_some());
            std::thread::sleep(Duration::from_millis(5));
        }

        assert!(wait_until(Duration::from_secs(3), || source.status()
            == SourceStatus::Live
            && connector.opens.lock().unwrap().len() == 5));
        source.shutdown();
        assert_eq!(source.status(), SourceStatus::Stopped);

        // 打开间隔: 2, 3, 4, 5 个单位 (每次都先等待再打开)
        let gaps = connector.gaps();
        for (i, units) in [2u32, 3, 4, 5].iter().enumerate() {
            assert!(gaps[i] >= unit * *units, "gap {} = {:?}", i, gaps[i]);
        }
    }

    #[test]
    fn test_open_without_frames_keeps_backing_off() {
        // 每次都能打开, 但读不到帧 (例如 ffmpeg 进程启动后立即退出)
        let connector = ScriptedConnector::new(Vec::new(), 0);
        let unit = Duration::from_millis(20);
        let source = FrameSource::start(4, "test://dead", connector.clone(), unit).unwrap();

        assert!(wait_until(Duration::from_secs(3), || connector
            .opens
            .lock()
            .unwrap()
            .len()
            >= 6));
        source.shutdown();
        assert!(source.capture().is_none());

        let gaps = connector.gaps();
        for (i, units) in [2u32, 3, 4, 5, 5].iter().enumerate() {
            assert!(gaps[i] >= unit * *units, "gap {} = {:?}", i, gaps[i]);
        }
    }

    #[test]
    fn test_backoff_resets_after_frame() {
        // 读帧 → 失败, 失败, 恢复并读到一帧 → 再次断流
        let connector = ScriptedConnector::new(
            vec![Some(vec![true]), None, None, Some(vec![true])],
            1000,
        );
        let unit = Duration::from_millis(100);
        let source = FrameSource::start(5, "test://flaky", connector.clone(), unit).unwrap();

        assert!(wait_until(Duration::from_secs(5), || connector
            .opens
            .lock()
            .unwrap()
            .len()
            >= 5));
        source.shutdown();

        let gaps = connector.gaps();
        assert!(gaps[0] >= unit * 2, "{:?}", gaps);
        assert!(gaps[1] >= unit * 3, "{:?}", gaps);
        assert!(gaps[2] >= unit * 4, "{:?}", gaps);
        // 读到帧后计数清零, 回到 2 个单位
        assert!(gaps[3] >= unit * 2 && gaps[3] < unit * 3, "{:?}", gaps);
    }

    #[test]
    fn test_no_frame_before_first_capture() {
        struct NeverConnector;
        impl Connector for NeverConnector {
            fn open(&self, _url: &str) -> Result<Arc<dyn Connection>> {
                anyhow::bail!("unreachable host")
            }
        }

        let source =
            FrameSource::start(2, "test://down", Arc::new(NeverConnector), Duration::from_millis(5))
                .unwrap();
        std::thread::sleep(Duration::from_millis(30));
        assert!(source.capture().is_none());
        source.shutdown();
        source.shutdown();
        assert_eq!(source.status(), SourceStatus::Stopped);
    }

    #[test]
    fn test_shutdown_interrupts_blocked_read() {
        struct BlockingConnection {
            released: AtomicBool,
        }
        impl Connection for BlockingConnection {
            fn read(&self) -> Result<RgbImage> {
                while !self.released.load(Ordering::Acquire) {
                    std::thread::sleep(Duration::from_millis(1));
                }
                anyhow::bail!("released")
            }
            fn release(&self) {
                self.released.store(true, Ordering::Release);
            }
        }
        struct BlockingConnector;
        impl Connector for BlockingConnector {
            fn open(&self, _url: &str) -> Result<Arc<dyn Connection>> {
                Ok(Arc::new(BlockingConnection {
                    released: AtomicBool::new(false),
                }))
            }
        }

        let source = FrameSource::start(
            3,
            "test://stall",
            Arc::new(BlockingConnector),
            Duration::from_secs(60),
        )
        .unwrap();
        assert!(wait_until(Duration::from_secs(1), || source.status()
            == SourceStatus::Live));

        let start = Instant::now();
        source.shutdown();
        assert!(start.elapsed() < Duration::from_secs(5));
        assert_eq!(source.status(), SourceStatus::Stopped);
    }
}
