/// 检测系统 (Detection System)
///
/// - Detector:  目标检测接口 (模型为外部协作者)
/// - Taxonomy:  原始标签 → 规范类别
/// - Evaluator: 检测 + 类别映射 + 开关过滤
pub mod detector;
pub mod evaluator;
#[cfg(feature = "onnx")]
pub mod onnx;
pub mod taxonomy;
pub mod types;

pub use detector::{Detector, DisabledDetector};
pub use evaluator::{resize_to_work, DetectionEvaluator, Evaluation};
#[cfg(feature = "onnx")]
pub use onnx::YoloDetector;
pub use taxonomy::CanonicalClass;
pub use types::{BBox, ClassLabel, Detection, PresenceMap, RawDetection, WORK_HEIGHT, WORK_WIDTH};
