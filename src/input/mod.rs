/// 视频输入系统 (Video Input System)
///
/// 每个摄像头一个独立采集线程, 负责拉流、断线重连与帧发布
/// - FrameSource:    采集线程 + 最新帧/备用帧
/// - FfmpegConnector: ffmpeg 子进程拉流 (默认)
/// - NativeConnector: 进程内 ez-ffmpeg 解码 (`ffmpeg-native`)
#[cfg(feature = "ffmpeg-native")]
pub mod decoder;
pub mod ffmpeg;
pub mod frame;
pub mod source;

#[cfg(feature = "ffmpeg-native")]
pub use decoder::NativeConnector;
pub use ffmpeg::{FfmpegConnector, CAPTURE_HEIGHT, CAPTURE_WIDTH};
pub use frame::Frame;
pub use source::{backoff_delay, Connection, Connector, FrameProvider, FrameSource, SourceStatus};
