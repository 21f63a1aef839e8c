#![allow(clippy::type_complexity)]
// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
pub mod camera; // 摄像头管理与处理流水线
pub mod config; // 命令行参数与配置文件
pub mod detection; // 检测与类别映射
pub mod error; // 命令接口错误
pub mod input; // 视频输入系统
pub mod recording; // 事件录像
pub mod renderer; // 帧渲染
pub mod store; // 参数持久化
pub mod stream; // MJPEG 推流
pub mod zones; // 区域判定

pub use crate::camera::{ActiveModule, CameraConfig, CameraId, CameraRegistry, RegistryOptions};
pub use crate::config::{AppConfig, Args};
pub use crate::detection::{Detector, DisabledDetector};
pub use crate::error::{Error, Result};
pub use crate::stream::{StreamPublisher, MJPEG_CONTENT_TYPE};

/// 时间字符串 YYYYmmdd_HHMMSS (本地时间), 用于文件名
pub fn gen_time_string(at: chrono::DateTime<chrono::Local>) -> String {
    at.format("%Y%m%d_%H%M%S").to_string()
}
