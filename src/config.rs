//! 系统配置 - 命令行参数 + JSON配置文件

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::camera::{ActiveModule, CameraId, RegistryOptions, DEFAULT_MAX_CAMERAS};
use crate::input::{CAPTURE_HEIGHT, CAPTURE_WIDTH};
use crate::recording::RECORDING_FPS;
use crate::stream::JPEG_QUALITY;

/// 多摄像头安全监控
#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "多摄像头实时检测与事件录像", long_about = None)]
pub struct Args {
    /// 配置文件 (不存在时生成默认配置)
    #[arg(short, long, default_value = "sentinel.json")]
    pub config: PathBuf,

    /// ONNX 检测模型 (需要 onnx 功能)
    #[arg(short, long)]
    pub model: Option<PathBuf>,

    /// 类别名称文件, 每行一个
    #[arg(short, long)]
    pub labels: Option<PathBuf>,

    /// 标签字体 (ttf/otf)
    #[arg(short, long)]
    pub font: Option<PathBuf>,

    /// 运行指定秒数后退出 (默认一直运行)
    #[arg(long)]
    pub run_for: Option<u64>,

    /// 将摄像头 1 的推流写出到该文件 (MJPEG)
    #[arg(long)]
    pub dump_stream: Option<PathBuf>,
}

/// 单个摄像头配置
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CameraEntry {
    pub id: CameraId,
    pub url: String,
    /// 启动时激活的模块
    #[serde(default)]
    pub module: Option<ActiveModule>,
}

/// 配置文件
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    // === 摄像头 ===
    pub cameras: Vec<CameraEntry>,
    pub max_cameras: usize,
    pub capture_width: u32,
    pub capture_height: u32,
    pub backoff_unit_ms: u64, // 重连退避单位

    // === 存储 ===
    pub video_dir: PathBuf, // 录像目录
    pub store_dir: PathBuf, // 区域/开关 持久化目录

    // === 输出 ===
    pub recording_fps: u32,
    pub jpeg_quality: u8,

    // === 检测 ===
    pub conf_threshold: f32,
    pub iou_threshold: f32,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            cameras: vec![CameraEntry {
                id: 1,
                url: "rtsp://127.0.0.1:554/stream1".to_string(),
                module: None,
            }],
            max_cameras: DEFAULT_MAX_CAMERAS,
            capture_width: CAPTURE_WIDTH,
            capture_height: CAPTURE_HEIGHT,
            backoff_unit_ms: 1000,

            video_dir: PathBuf::from("videos"),
            store_dir: PathBuf::from("data"),

            recording_fps: RECORDING_FPS,
            jpeg_quality: JPEG_QUALITY,

            conf_threshold: 0.25,
            iou_threshold: 0.45,
        }
    }
}

impl AppConfig {
    /// 从JSON文件加载配置; 文件不存在时写出默认配置
    pub fn load(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(json) => match serde_json::from_str(&json) {
                Ok(config) => {
                    log::info!("config loaded from {}", path.display());
                    config
                }
                Err(e) => {
                    log::warn!("failed to parse {}: {}, using defaults", path.display(), e);
                    Self::default()
                }
            },
            Err(_) => {
                log::info!("{} not found, writing default config", path.display());
                let config = Self::default();
                config.save(path);
                config
            }
        }
    }

    /// 保存配置到JSON文件
    pub fn save(&self, path: &Path) {
        match serde_json::to_string_pretty(self) {
            Ok(json) => {
                if let Err(e) = fs::write(path, json) {
                    log::error!("failed to save config {}: {}", path.display(), e);
                } else {
                    log::info!("config saved to {}", path.display());
                }
            }
            Err(e) => log::error!("failed to serialize config: {}", e),
        }
    }

    pub fn registry_options(&self) -> RegistryOptions {
        RegistryOptions {
            video_dir: self.video_dir.clone(),
            max_cameras: self.max_cameras,
            backoff_unit: Duration::from_millis(self.backoff_unit_ms.max(1)),
            recording_fps: self.recording_fps,
            jpeg_quality: self.jpeg_quality,
        }
    }

    /// 打印当前配置
    pub fn log_summary(&self) {
        log::info!("cameras: {}/{}", self.cameras.len(), self.max_cameras);
        for camera in &self.cameras {
            log::info!("  camera {}: {} ({:?})", camera.id, camera.url, camera.module);
        }
        log::info!(
            "capture {}x{}, recording {} fps -> {}",
            self.capture_width,
            self.capture_height,
            self.recording_fps,
            self.video_dir.display()
        );
        log::info!("store: {}", self.store_dir.display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sentinel.json");

        let config = AppConfig::load(&path);
        assert_eq!(config, AppConfig::default());
        assert!(path.is_file());
        assert_eq!(AppConfig::load(&path), config);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sentinel.json");
        std::fs::write(
            &path,
            r#"{"cameras": [{"id": 2, "url": "rtsp://10.0.0.2/live", "module": "Áreas Restringidas"}],
                "recording_fps": 15}"#,
        )
        .unwrap();

        let config = AppConfig::load(&path);
        assert_eq!(config.cameras.len(), 1);
        assert_eq!(config.cameras[0].module, Some(ActiveModule::RestrictedAreas));
        assert_eq!(config.recording_fps, 15);
        assert_eq!(config.jpeg_quality, JPEG_QUALITY);
        assert_eq!(config.registry_options().max_cameras, DEFAULT_MAX_CAMERAS);
    }

    #[test]
    fn test_args_parse() {
        let args = Args::parse_from(["sentinel", "--config", "x.json", "--run-for", "5"]);
        assert_eq!(args.config, PathBuf::from("x.json"));
        assert_eq!(args.run_for, Some(5));
        assert!(args.model.is_none());
    }
}
