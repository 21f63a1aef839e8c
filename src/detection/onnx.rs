// YOLOv8 ONNX 检测器 (需要 `onnx` 功能)
// 包含: 模型加载、预处理(letterbox)、推理、后处理(NMS)

use std::path::Path;

use anyhow::{Context, Result};
use image::{imageops, RgbImage};
use ndarray::{s, Array, Axis, Ix4};
use ort::{GraphOptimizationLevel, Session};

use super::detector::Detector;
use super::types::{BBox, RawDetection};

const CXYWH_OFFSET: usize = 4;

pub struct YoloDetector {
    session: Session,
    input_name: String,
    output_name: String,
    names: Vec<String>,
    size: u32,
    conf: f32,
    iou: f32,
}

impl YoloDetector {
    /// 加载模型; `names` 为类别名称表 (按类别ID顺序)
    pub fn new(model: &Path, names: Vec<String>, conf: f32, iou: f32) -> Result<Self> {
        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .commit_from_file(model)
            .with_context(|| format!("failed to load model {}", model.display()))?;

        let input_name = session
            .inputs
            .first()
            .map(|i| i.name.clone())
            .context("model has no inputs")?;
        let output_name = session
            .outputs
            .first()
            .map(|o| o.name.clone())
            .context("model has no outputs")?;

        log::info!(
            "YOLOv8 model loaded: {} ({} classes, conf {:.2}, iou {:.2})",
            model.display(),
            names.len(),
            conf,
            iou
        );

        Ok(Self {
            session,
            input_name,
            output_name,
            names,
            size: 640,
            conf,
            iou,
        })
    }

    /// 类别名称文件: 每行一个名称
    pub fn load_names(path: &Path) -> Result<Vec<String>> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read labels {}", path.display()))?;
        Ok(text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect())
    }

    fn ratio(&self, width: u32, height: u32) -> f32 {
        (self.size as f32 / width as f32).min(self.size as f32 / height as f32)
    }

    /// 预处理: letterbox 缩放 → NCHW 张量, 空白处填充灰色
    fn preprocess(&self, image: &RgbImage) -> Array<f32, Ix4> {
        let size = self.size as usize;
        let mut xs = Array::from_elem((1, 3, size, size), 144.0 / 255.0);

        let ratio = self.ratio(image.width(), image.height());
        let w_new = ((image.width() as f32 * ratio).round() as u32).clamp(1, self.size);
        let h_new = ((image.height() as f32 * ratio).round() as u32).clamp(1, self.size);
        let resized = imageops::resize(image, w_new, h_new, imageops::FilterType::Triangle);

        for (x, y, rgb) in resized.enumerate_pixels() {
            let (x, y) = (x as usize, y as usize);
            let [r, g, b] = rgb.0;
            xs[[0, 0, y, x]] = r as f32 / 255.0;
            xs[[0, 1, y, x]] = g as f32 / 255.0;
            xs[[0, 2, y, x]] = b as f32 / 255.0;
        }
        xs
    }
}

impl Detector for YoloDetector {
    fn detect(&self, image: &RgbImage) -> Result<Vec<RawDetection>> {
        let xs = self.preprocess(image);
        let outputs = self
            .session
            .run(ort::inputs![self.input_name.as_str() => xs.view()]?)?;
        let preds = outputs[self.output_name.as_str()]
            .try_extract_tensor::<f32>()?
            .to_owned();

        let (width, height) = (image.width() as f32, image.height() as f32);
        let ratio = self.ratio(image.width(), image.height());

        // 输出形状 [1, 4 + nc, anchors]
        let mut candidates: Vec<RawDetection> = Vec::new();
        for anchor in preds.axis_iter(Axis(0)) {
            for pred in anchor.axis_iter(Axis(1)) {
                let bbox = pred.slice(s![0..CXYWH_OFFSET]);
                let clss = pred.slice(s![CXYWH_OFFSET..]);
                let Some((id, &confidence)) = clss
                    .iter()
                    .enumerate()
                    .reduce(|max, x| if x.1 > max.1 { x } else { max })
                else {
                    continue;
                };
                if confidence < self.conf {
                    continue;
                }

                let cx = bbox[0] / ratio;
                let cy = bbox[1] / ratio;
                let w = bbox[2] / ratio;
                let h = bbox[3] / ratio;
                let x1 = (cx - w / 2.).clamp(0.0, width);
                let y1 = (cy - h / 2.).clamp(0.0, height);
                let x2 = (cx + w / 2.).clamp(0.0, width);
                let y2 = (cy + h / 2.).clamp(0.0, height);

                let label = self
                    .names
                    .get(id)
                    .cloned()
                    .unwrap_or_else(|| format!("class{}", id));
                candidates.push(RawDetection {
                    bbox: BBox::new(x1, y1, x2, y2),
                    label,
                    confidence,
                });
            }
        }

        non_max_suppression(&mut candidates, self.iou);
        Ok(candidates)
    }

    fn name(&self) -> &str {
        "yolov8-onnx"
    }
}

fn iou(a: &BBox, b: &BBox) -> f32 {
    let l = a.x1.max(b.x1);
    let r = a.x2.min(b.x2);
    let t = a.y1.max(b.y1);
    let btm = a.y2.min(b.y2);
    let inter = (r - l).max(0.) * (btm - t).max(0.);
    let union = a.width() * a.height() + b.width() * b.height() - inter;
    if union <= 0.0 {
        0.0
    } else {
        inter / union
    }
}

/// 按置信度降序的类别无关NMS
pub fn non_max_suppression(xs: &mut Vec<RawDetection>, iou_threshold: f32) {
    xs.sort_by(|b1, b2| b2.confidence.total_cmp(&b1.confidence));

    let mut current_index = 0;
    for index in 0..xs.len() {
        let mut drop = false;
        for prev_index in 0..current_index {
            if iou(&xs[prev_index].bbox, &xs[index].bbox) > iou_threshold {
                drop = true;
                break;
            }
        }
        if !drop {
            xs.swap(current_index, index);
            current_index += 1;
        }
    }
    xs.truncate(current_index);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(x1: f32, conf: f32) -> RawDetection {
        RawDetection {
            bbox: BBox::new(x1, 0.0, x1 + 100.0, 100.0),
            label: "person".to_string(),
            confidence: conf,
        }
    }

    #[test]
    fn test_nms_keeps_best_of_overlapping() {
        let mut xs = vec![det(0.0, 0.5), det(5.0, 0.9), det(500.0, 0.3)];
        non_max_suppression(&mut xs, 0.45);
        assert_eq!(xs.len(), 2);
        assert_eq!(xs[0].confidence, 0.9);
        assert_eq!(xs[1].confidence, 0.3);
    }
}
