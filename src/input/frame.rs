/// 视频帧 (Frame)
///
/// 采集后不可变, 像素数据用 Arc 共享, 克隆无拷贝.
use std::sync::Arc;

use chrono::{DateTime, Local};
use image::RgbImage;

#[derive(Clone, Debug)]
pub struct Frame {
    image: Arc<RgbImage>,
    captured_at: DateTime<Local>,
    seq: u64,
}

impl Frame {
    pub fn new(image: RgbImage, seq: u64) -> Self {
        Self {
            image: Arc::new(image),
            captured_at: Local::now(),
            seq,
        }
    }

    pub fn image(&self) -> &Arc<RgbImage> {
        &self.image
    }

    pub fn captured_at(&self) -> DateTime<Local> {
        self.captured_at
    }

    /// 帧序号 (每个摄像头单调递增)
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}
