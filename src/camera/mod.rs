/// 摄像头管理 (Camera management)
///
/// - Settings: 模块/区域/开关 参数快照
/// - Pipeline: 单摄像头处理流水线 (带单帧结果缓存)
/// - Registry: 摄像头表 + 管理命令入口
pub mod pipeline;
pub mod registry;
pub mod settings;

pub use pipeline::{CameraPipeline, CameraStatus, PassOutput};
pub use registry::{CameraRegistry, RegistryOptions, DEFAULT_MAX_CAMERAS};
pub use settings::{ActiveModule, CameraConfig, CameraSettings, SettingsCell};

/// 摄像头ID
pub type CameraId = u32;
