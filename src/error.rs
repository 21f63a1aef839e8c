//! 命令接口错误类型 (Command surface errors)

use crate::camera::CameraId;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// 摄像头不存在
    #[error("camera {0} not found")]
    CameraNotFound(CameraId),

    /// 摄像头ID重复
    #[error("camera {0} already exists")]
    CameraExists(CameraId),

    /// 超出摄像头数量上限
    #[error("maximum number of cameras reached ({0})")]
    CapacityReached(usize),

    #[error("invalid zone: {0}")]
    InvalidZone(String),

    /// 持久化存储失败
    #[error("store error: {0}")]
    Store(#[source] anyhow::Error),

    /// 单帧处理失败
    #[error("frame processing failed: {0}")]
    Processing(#[source] anyhow::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
