//! 单摄像头处理流水线 (Per-camera pipeline)
//!
//! 帧源 → 检测评估 → 区域判定 → 录像状态机 + 渲染
//! 同一帧(同一参数快照)只处理一次, 多个观看者共享结果.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use image::RgbImage;
use serde::Serialize;

use super::settings::{ActiveModule, CameraSettings, SettingsCell};
use super::CameraId;
use crate::detection::{DetectionEvaluator, PresenceMap};
use crate::error::{Error, Result};
use crate::input::{FrameProvider, SourceStatus};
use crate::recording::RecordingController;
use crate::renderer::FrameRenderer;
use crate::zones::{self, OccupancyMap};

/// 一次处理的输出
#[derive(Clone, Debug)]
pub struct PassOutput {
    pub seq: u64,
    /// 已绘制的图像
    pub image: Arc<RgbImage>,
    pub presence: PresenceMap,
    pub occupancy: OccupancyMap,
    pub violation: bool,
    pub recording: bool,
}

/// 摄像头状态查询结果
#[derive(Clone, Debug, Serialize)]
pub struct CameraStatus {
    pub id: CameraId,
    pub url: String,
    pub lifecycle: SourceStatus,
    pub module: Option<ActiveModule>,
    pub detection_enabled: bool,
    pub presence: PresenceMap,
    pub occupancy: OccupancyMap,
    pub recording: bool,
}

struct CachedPass {
    settings: Arc<CameraSettings>,
    output: PassOutput,
}

struct PassState {
    recorder: RecordingController,
    last: Option<CachedPass>,
}

pub struct CameraPipeline {
    id: CameraId,
    url: String,
    source: Arc<dyn FrameProvider>,
    settings: SettingsCell,
    evaluator: Arc<DetectionEvaluator>,
    renderer: Arc<FrameRenderer>,
    state: Mutex<PassState>,
}

impl CameraPipeline {
    pub fn new(
        id: CameraId,
        url: impl Into<String>,
        source: Arc<dyn FrameProvider>,
        evaluator: Arc<DetectionEvaluator>,
        renderer: Arc<FrameRenderer>,
        recorder: RecordingController,
    ) -> Self {
        Self {
            id,
            url: url.into(),
            source,
            settings: SettingsCell::default(),
            evaluator,
            renderer,
            state: Mutex::new(PassState {
                recorder,
                last: None,
            }),
        }
    }

    pub fn id(&self) -> CameraId {
        self.id
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn settings(&self) -> &SettingsCell {
        &self.settings
    }

    pub fn source(&self) -> &Arc<dyn FrameProvider> {
        &self.source
    }

    pub fn process(&self) -> Result<Option<PassOutput>> {
        self.process_at(Instant::now())
    }

    /// 处理最新帧; 尚无帧时返回 None
    pub fn process_at(&self, now: Instant) -> Result<Option<PassOutput>> {
        let Some(frame) = self.source.capture() else {
            return Ok(None);
        };
        let settings = self.settings.snapshot();

        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(cached) = &state.last {
            if cached.output.seq == frame.seq() && Arc::ptr_eq(&cached.settings, &settings) {
                return Ok(Some(cached.output.clone()));
            }
        }

        let evaluation = self
            .evaluator
            .evaluate(&frame, settings.module, &settings.config)
            .map_err(Error::Processing)?;
        let verdict = zones::evaluate(
            settings.module,
            &evaluation.detections,
            &settings.zones,
            &settings.config,
        );
        let recording = state.recorder.step(verdict.violation, now, &evaluation.image);
        let image = self.renderer.render(
            &evaluation.image,
            settings.module,
            &evaluation.accepted,
            &settings.zones,
        );

        let output = PassOutput {
            seq: frame.seq(),
            image: Arc::new(image),
            presence: evaluation.presence,
            occupancy: verdict.occupancy,
            violation: verdict.violation,
            recording,
        };
        state.last = Some(CachedPass {
            settings,
            output: output.clone(),
        });
        Ok(Some(output))
    }

    pub fn status(&self) -> CameraStatus {
        let settings = self.settings.snapshot();
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let (presence, occupancy) = match &state.last {
            Some(cached) => (cached.output.presence.clone(), cached.output.occupancy.clone()),
            None => (PresenceMap::new(), zones::empty_occupancy(&settings.zones)),
        };
        CameraStatus {
            id: self.id,
            url: self.url.clone(),
            lifecycle: self.source.status(),
            module: settings.module,
            detection_enabled: settings.detection_enabled(),
            presence,
            occupancy,
            recording: state.recorder.is_recording(),
        }
    }

    /// 停止录像并关闭帧源
    pub fn shutdown(&self) {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .recorder
            .finish();
        self.source.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::{BBox, CanonicalClass, Detector, RawDetection};
    use crate::input::Frame;
    use crate::recording::{VideoSink, VideoWriter};
    use crate::zones::{Zone, ZoneRect, ZoneTag};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingDetector(AtomicUsize);

    impl Detector for CountingDetector {
        fn detect(&self, _image: &RgbImage) -> anyhow::Result<Vec<RawDetection>> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(vec![RawDetection {
                bbox: BBox::new(140.0, 140.0, 160.0, 160.0),
                label: "person".to_string(),
                confidence: 0.9,
            }])
        }
    }

    #[derive(Default)]
    struct StaticProvider(Mutex<Option<Frame>>);

    impl FrameProvider for StaticProvider {
        fn capture(&self) -> Option<Frame> {
            self.0.lock().unwrap().clone()
        }
    }

    struct NullSink;

    impl VideoSink for NullSink {
        fn open(
            &self,
            _path: &std::path::Path,
            _fps: u32,
            _size: (u32, u32),
        ) -> anyhow::Result<Box<dyn VideoWriter>> {
            anyhow::bail!("recording disabled in test")
        }
    }

    fn pipeline() -> (CameraPipeline, Arc<StaticProvider>, Arc<CountingDetector>) {
        let provider = Arc::new(StaticProvider::default());
        let detector = Arc::new(CountingDetector(AtomicUsize::new(0)));
        let pipeline = CameraPipeline::new(
            1,
            "test://cam1",
            provider.clone(),
            Arc::new(DetectionEvaluator::new(detector.clone())),
            Arc::new(FrameRenderer::default()),
            RecordingController::new(1, Arc::new(NullSink), "/tmp/videos"),
        );
        (pipeline, provider, detector)
    }

    #[test]
    fn test_no_frame_yet() {
        let (pipeline, _provider, detector) = pipeline();
        assert!(pipeline.process().unwrap().is_none());
        assert_eq!(detector.0.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_same_frame_is_evaluated_once() {
        let (pipeline, provider, detector) = pipeline();
        pipeline
            .settings()
            .update(|s| s.module = Some(ActiveModule::Ppe));
        *provider.0.lock().unwrap() = Some(Frame::new(RgbImage::new(1280, 720), 7));

        let a = pipeline.process().unwrap().unwrap();
        let b = pipeline.process().unwrap().unwrap();
        assert_eq!(detector.0.load(Ordering::SeqCst), 1);
        assert!(Arc::ptr_eq(&a.image, &b.image));
        assert_eq!(a.presence[&CanonicalClass::Person], true);

        // 参数变化后重新评估
        pipeline.settings().update(|s| s.config.set_show("person", true));
        pipeline.process().unwrap().unwrap();
        assert_eq!(detector.0.load(Ordering::SeqCst), 2);

        *provider.0.lock().unwrap() = Some(Frame::new(RgbImage::new(1280, 720), 8));
        let c = pipeline.process().unwrap().unwrap();
        assert_eq!(c.seq, 8);
        assert_eq!(detector.0.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_status_reports_occupancy() {
        let (pipeline, provider, _detector) = pipeline();
        pipeline.settings().update(|s| {
            s.module = Some(ActiveModule::RestrictedAreas);
            s.zones
                .insert(Zone::new(ZoneRect::new(100, 100, 300, 300), ZoneTag(1)));
            s.zones
                .insert(Zone::new(ZoneRect::new(400, 300, 500, 400), ZoneTag(2)));
            s.config.set_zone_class(ZoneTag(1), "person", true);
        });

        let status = pipeline.status();
        assert_eq!(status.occupancy.len(), 2);
        assert!(status.occupancy.values().all(|o| !o));
        assert_eq!(status.lifecycle, SourceStatus::Live);

        *provider.0.lock().unwrap() = Some(Frame::new(RgbImage::new(640, 480), 1));
        let out = pipeline.process().unwrap().unwrap();
        assert!(out.violation);
        assert!(!out.recording);

        let status = pipeline.status();
        assert_eq!(status.occupancy[&ZoneTag(1)], true);
        assert_eq!(status.occupancy[&ZoneTag(2)], false);
        assert!(status.detection_enabled);
    }
}
