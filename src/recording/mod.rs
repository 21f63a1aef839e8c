/// 事件录像 (Event recording)
///
/// - RecordingController: 防抖状态机, 决定何时开始/停止录像
/// - VideoSink:           录像文件输出 (默认 ffmpeg 子进程)
pub mod controller;
pub mod sink;

pub use controller::{
    RecordingController, RecordingSession, RecordingState, DEBOUNCE_WINDOW, RECORDING_FPS,
};
pub use sink::{list_recordings, recording_file_name, FfmpegSink, VideoSink, VideoWriter};
