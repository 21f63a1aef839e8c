//! 检测评估器 (Detection evaluator)
//! 职责: 帧 → 缩放到工作分辨率 → 检测 → 类别映射 → 存在性映射 + 渲染列表

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use fast_image_resize as fr;
use image::RgbImage;

use super::detector::Detector;
use super::taxonomy::{self, CanonicalClass};
use super::types::{ClassLabel, Detection, PresenceMap, WORK_HEIGHT, WORK_WIDTH};
use crate::camera::{ActiveModule, CameraConfig};
use crate::input::Frame;

/// 单帧评估结果
#[derive(Clone, Debug)]
pub struct Evaluation {
    /// 检测所用图像: 运行检测时为 640x480 工作帧, 跳过检测时为原始帧
    pub image: Arc<RgbImage>,
    /// 是否运行了检测器
    pub detected: bool,
    pub presence: PresenceMap,
    /// 通过显示开关的检测 (只用于渲染)
    pub accepted: Vec<Detection>,
    /// 全部检测 (区域判定使用)
    pub detections: Vec<Detection>,
}

impl Evaluation {
    fn skipped(frame: &Frame) -> Self {
        Self {
            image: Arc::clone(frame.image()),
            detected: false,
            presence: PresenceMap::new(),
            accepted: Vec::new(),
            detections: Vec::new(),
        }
    }
}

pub struct DetectionEvaluator {
    detector: Arc<dyn Detector>,
}

impl DetectionEvaluator {
    pub fn new(detector: Arc<dyn Detector>) -> Self {
        Self { detector }
    }

    pub fn evaluate(
        &self,
        frame: &Frame,
        module: Option<ActiveModule>,
        config: &CameraConfig,
    ) -> Result<Evaluation> {
        // 无模块 / 测温模块: 跳过检测
        let module = match module {
            Some(m) if m.runs_detection() => m,
            _ => return Ok(Evaluation::skipped(frame)),
        };

        let working = resize_to_work(frame.image())?;

        let start = Instant::now();
        let raw = match self.detector.detect(&working) {
            Ok(raw) => raw,
            Err(e) => {
                // 检测失败按"本帧无检测"处理
                log::error!("detector {} failed: {:#}", self.detector.name(), e);
                Vec::new()
            }
        };
        log::trace!(
            "{} raw detections in {:.1}ms",
            raw.len(),
            start.elapsed().as_secs_f64() * 1000.0
        );

        let mut presence: PresenceMap = CanonicalClass::ALL.iter().map(|c| (*c, false)).collect();
        let mut detections = Vec::with_capacity(raw.len());
        let mut accepted = Vec::new();

        for det in raw {
            let label = taxonomy::translate(&det.label);
            if let ClassLabel::Canonical(class) = &label {
                presence.insert(*class, true);
            }

            let key = label.key();
            let show = match module {
                ActiveModule::Ppe => config.shows(&key),
                ActiveModule::RestrictedAreas => config.any_zone_enabled(&key),
                ActiveModule::Thermal => false,
            };

            let detection = Detection {
                bbox: det.bbox,
                label,
                confidence: det.confidence.clamp(0.0, 1.0),
            };
            if show {
                accepted.push(detection.clone());
            }
            detections.push(detection);
        }

        Ok(Evaluation {
            image: Arc::new(working),
            detected: true,
            presence,
            accepted,
            detections,
        })
    }
}

/// 缩放到 640x480 工作分辨率 (fast_image_resize, 双线性)
pub fn resize_to_work(image: &RgbImage) -> Result<RgbImage> {
    if image.width() == WORK_WIDTH && image.height() == WORK_HEIGHT {
        return Ok(image.clone());
    }

    let src_image = fr::images::Image::from_vec_u8(
        image.width(),
        image.height(),
        image.as_raw().clone(),
        fr::PixelType::U8x3,
    )
    .context("invalid source frame buffer")?;
    let mut dst_image = fr::images::Image::new(WORK_WIDTH, WORK_HEIGHT, fr::PixelType::U8x3);

    let mut resizer = fr::Resizer::new();
    resizer
        .resize(
            &src_image,
            &mut dst_image,
            &fr::ResizeOptions::new()
                .resize_alg(fr::ResizeAlg::Convolution(fr::FilterType::Bilinear)),
        )
        .context("frame resize failed")?;

    RgbImage::from_raw(WORK_WIDTH, WORK_HEIGHT, dst_image.into_vec())
        .context("resized buffer has unexpected size")
}
