//! 检测器接口 (Detector)
//!
//! 模型本身是外部协作者: 输入一帧图像, 输出 (框, 原始标签, 置信度) 列表.
//! 置信度阈值与NMS阈值属于具体实现, 不属于流水线.

use anyhow::Result;
use image::RgbImage;

use super::types::RawDetection;

/// 统一的目标检测接口
///
/// 实现需要线程安全: 多个拉流线程可能并发调用同一个检测器.
pub trait Detector: Send + Sync {
    /// 检测: 图片 → 原始检测结果 (坐标系与输入图片一致)
    fn detect(&self, image: &RgbImage) -> Result<Vec<RawDetection>>;

    /// 检测器名称 (日志用)
    fn name(&self) -> &str {
        "detector"
    }
}

/// 空检测器: 未编译任何模型后端时使用, 永远返回空结果
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledDetector;

impl Detector for DisabledDetector {
    fn detect(&self, _image: &RgbImage) -> Result<Vec<RawDetection>> {
        Ok(Vec::new())
    }

    fn name(&self) -> &str {
        "disabled"
    }
}
