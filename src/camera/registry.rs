//! 摄像头注册表 (Camera registry)
//!
//! 持有全部摄像头流水线, 提供管理命令. 每条命令整体替换参数快照,
//! 下一次处理即可见. 未知摄像头返回 `Error::CameraNotFound`, 无副作用.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use super::pipeline::{CameraPipeline, CameraStatus};
use super::settings::{ActiveModule, CameraConfig};
use super::CameraId;
use crate::detection::{DetectionEvaluator, Detector};
use crate::error::{Error, Result};
use crate::input::{Connector, FrameProvider, FrameSource};
use crate::recording::{self, RecordingController, VideoSink, RECORDING_FPS};
use crate::renderer::FrameRenderer;
use crate::store::{Collection, ConfigStore};
use crate::stream::StreamPublisher;
use crate::zones::{Zone, ZoneSet, ZoneTag};

pub const DEFAULT_MAX_CAMERAS: usize = 4;

#[derive(Debug, Clone)]
pub struct RegistryOptions {
    pub video_dir: PathBuf,
    pub max_cameras: usize,
    /// 重连退避单位
    pub backoff_unit: Duration,
    pub recording_fps: u32,
    pub jpeg_quality: u8,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self {
            video_dir: PathBuf::from("videos"),
            max_cameras: DEFAULT_MAX_CAMERAS,
            backoff_unit: Duration::from_secs(1),
            recording_fps: RECORDING_FPS,
            jpeg_quality: crate::stream::JPEG_QUALITY,
        }
    }
}

pub struct CameraRegistry {
    cameras: RwLock<BTreeMap<CameraId, Arc<CameraPipeline>>>,
    options: RegistryOptions,
    connector: Arc<dyn Connector>,
    evaluator: Arc<DetectionEvaluator>,
    renderer: Arc<FrameRenderer>,
    sink: Arc<dyn VideoSink>,
    store: Arc<dyn ConfigStore>,
}

impl CameraRegistry {
    pub fn new(
        options: RegistryOptions,
        connector: Arc<dyn Connector>,
        detector: Arc<dyn Detector>,
        renderer: FrameRenderer,
        sink: Arc<dyn VideoSink>,
        store: Arc<dyn ConfigStore>,
    ) -> Self {
        log::info!(
            "camera registry: detector {}, max {} cameras, videos in {}",
            detector.name(),
            options.max_cameras,
            options.video_dir.display()
        );
        Self {
            cameras: RwLock::new(BTreeMap::new()),
            options,
            connector,
            evaluator: Arc::new(DetectionEvaluator::new(detector)),
            renderer: Arc::new(renderer),
            sink,
            store,
        }
    }

    pub fn options(&self) -> &RegistryOptions {
        &self.options
    }

    /// 添加摄像头并启动采集线程
    pub fn add_camera(&self, id: CameraId, url: &str) -> Result<Arc<CameraPipeline>> {
        self.check_capacity(id)?;
        let source = FrameSource::start(
            id,
            url,
            Arc::clone(&self.connector),
            self.options.backoff_unit,
        )
        .map_err(Error::Processing)?;
        let source: Arc<dyn FrameProvider> = Arc::new(source);
        self.attach(id, url, source)
    }

    /// 以给定帧源添加摄像头
    pub fn attach(
        &self,
        id: CameraId,
        url: &str,
        source: Arc<dyn FrameProvider>,
    ) -> Result<Arc<CameraPipeline>> {
        let recorder = RecordingController::new(
            id,
            Arc::clone(&self.sink),
            self.options.video_dir.clone(),
        )
        .with_fps(self.options.recording_fps);
        let pipeline = Arc::new(CameraPipeline::new(
            id,
            url,
            Arc::clone(&source),
            Arc::clone(&self.evaluator),
            Arc::clone(&self.renderer),
            recorder,
        ));

        {
            let mut cameras = self.cameras.write().unwrap_or_else(|e| e.into_inner());
            let rejected = if cameras.contains_key(&id) {
                Some(Error::CameraExists(id))
            } else if cameras.len() >= self.options.max_cameras {
                Some(Error::CapacityReached(self.options.max_cameras))
            } else {
                None
            };
            if let Some(err) = rejected {
                drop(cameras);
                source.shutdown();
                return Err(err);
            }
            cameras.insert(id, Arc::clone(&pipeline));
        }

        log::info!("camera {} added ({})", id, url);
        Ok(pipeline)
    }

    fn check_capacity(&self, id: CameraId) -> Result<()> {
        let cameras = self.cameras.read().unwrap_or_else(|e| e.into_inner());
        if cameras.contains_key(&id) {
            return Err(Error::CameraExists(id));
        }
        if cameras.len() >= self.options.max_cameras {
            return Err(Error::CapacityReached(self.options.max_cameras));
        }
        Ok(())
    }

    /// 删除摄像头: 停止录像, 关闭采集线程
    pub fn remove_camera(&self, id: CameraId) -> Result<()> {
        let pipeline = self
            .cameras
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id)
            .ok_or(Error::CameraNotFound(id))?;
        pipeline.shutdown();
        log::info!("camera {} removed", id);
        Ok(())
    }

    pub fn camera(&self, id: CameraId) -> Result<Arc<CameraPipeline>> {
        self.cameras
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&id)
            .cloned()
            .ok_or(Error::CameraNotFound(id))
    }

    pub fn ids(&self) -> Vec<CameraId> {
        self.cameras
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .copied()
            .collect()
    }

    /// 激活/停用模块; 停用时清空区域与开关. 返回是否运行检测
    pub fn set_module(&self, id: CameraId, module: Option<ActiveModule>) -> Result<bool> {
        let camera = self.camera(id)?;
        let enabled = camera.settings().update(|s| {
            s.module = module;
            if module.is_none() {
                s.zones.clear();
                s.config = CameraConfig::default();
            }
            s.detection_enabled()
        });
        match module {
            Some(m) => log::info!("camera {}: module {:?} activated", id, m),
            None => log::info!("camera {}: module deactivated, zones and config cleared", id),
        }
        Ok(enabled)
    }

    /// 添加区域; 同标记的区域被替换 (保持原位置)
    pub fn add_zone(&self, id: CameraId, zone: Zone) -> Result<()> {
        let camera = self.camera(id)?;
        validate_zone(&zone)?;
        camera.settings().update(|s| s.zones.insert(zone));
        log::info!(
            "camera {}: zone {} set to ({},{})-({},{})",
            id,
            zone.tag,
            zone.rect.x1,
            zone.rect.y1,
            zone.rect.x2,
            zone.rect.y2
        );
        Ok(())
    }

    /// 删除指定标记的区域, 返回是否存在
    pub fn delete_zone(&self, id: CameraId, tag: ZoneTag) -> Result<bool> {
        let camera = self.camera(id)?;
        let removed = camera.settings().update(|s| s.zones.remove(tag));
        log::info!("camera {}: zone {} deleted ({})", id, tag, removed);
        Ok(removed)
    }

    pub fn delete_all_zones(&self, id: CameraId) -> Result<()> {
        let camera = self.camera(id)?;
        camera.settings().update(|s| s.zones.clear());
        log::info!("camera {}: all zones deleted", id);
        Ok(())
    }

    pub fn zones(&self, id: CameraId) -> Result<Vec<Zone>> {
        Ok(self.camera(id)?.settings().snapshot().zones.to_vec())
    }

    /// 整体替换区域列表 (同标记后者覆盖前者), 返回生效后的列表
    pub fn import_zones(&self, id: CameraId, zones: Vec<Zone>) -> Result<Vec<Zone>> {
        let camera = self.camera(id)?;
        for zone in &zones {
            validate_zone(zone)?;
        }
        let set = ZoneSet::from(zones);
        let imported = set.to_vec();
        camera.settings().update(|s| s.zones = set);
        log::info!("camera {}: {} zones imported", id, imported.len());
        Ok(imported)
    }

    /// 替换按类别开关并持久化
    pub fn update_config(&self, id: CameraId, config: CameraConfig) -> Result<()> {
        let camera = self.camera(id)?;
        let data = serde_json::to_vec_pretty(&config)?;
        camera.settings().update(|s| s.config = config);
        log::info!("camera {}: config updated", id);

        self.store
            .save(Collection::Config, id, &data)
            .map_err(Error::Store)
    }

    pub fn config(&self, id: CameraId) -> Result<CameraConfig> {
        Ok(self.camera(id)?.settings().snapshot().config.clone())
    }

    /// 保存当前区域列表
    pub fn save_zones(&self, id: CameraId) -> Result<()> {
        let zones = self.zones(id)?;
        let data = serde_json::to_vec_pretty(&zones)?;
        self.store
            .save(Collection::Areas, id, &data)
            .map_err(Error::Store)?;
        log::info!("camera {}: {} zones saved", id, zones.len());
        Ok(())
    }

    /// 读取已保存的区域列表 (不应用); 未保存过时为空
    pub fn load_saved_zones(&self, id: CameraId) -> Result<Vec<Zone>> {
        self.camera(id)?;
        match self
            .store
            .load(Collection::Areas, id)
            .map_err(Error::Store)?
        {
            Some(data) => Ok(serde_json::from_slice(&data)?),
            None => Ok(Vec::new()),
        }
    }

    /// 应用已保存的区域与开关 (启动时调用)
    pub fn restore(&self, id: CameraId) -> Result<()> {
        let camera = self.camera(id)?;
        let zones = ZoneSet::from(self.load_saved_zones(id)?);
        let config: Option<CameraConfig> = self
            .store
            .load(Collection::Config, id)
            .map_err(Error::Store)?
            .map(|data| serde_json::from_slice(&data))
            .transpose()?;

        let zone_count = zones.len();
        let has_config = config.is_some();
        camera.settings().update(|s| {
            s.zones = zones;
            if let Some(config) = config {
                s.config = config;
            }
        });
        log::info!(
            "camera {}: restored {} zones{}",
            id,
            zone_count,
            if has_config { " and config" } else { "" }
        );
        Ok(())
    }

    pub fn status(&self, id: CameraId) -> Result<CameraStatus> {
        Ok(self.camera(id)?.status())
    }

    /// 录像目录下的 .mp4 文件
    pub fn list_recordings(&self) -> Result<Vec<String>> {
        Ok(recording::list_recordings(&self.options.video_dir)?)
    }

    /// 摄像头的 MJPEG 推流序列
    pub fn stream(&self, id: CameraId) -> Result<StreamPublisher> {
        Ok(StreamPublisher::new(self.camera(id)?).with_quality(self.options.jpeg_quality))
    }

    /// 关闭全部摄像头
    pub fn shutdown(&self) {
        let cameras = std::mem::take(&mut *self.cameras.write().unwrap_or_else(|e| e.into_inner()));
        for (id, pipeline) in cameras {
            log::info!("camera {}: shutting down", id);
            pipeline.shutdown();
        }
    }
}

/// 区域面积为0时永远不会被占用
fn validate_zone(zone: &Zone) -> Result<()> {
    if zone.rect.width() <= 0 || zone.rect.height() <= 0 {
        return Err(Error::InvalidZone(format!(
            "zone {} has empty area ({},{})-({},{})",
            zone.tag, zone.rect.x1, zone.rect.y1, zone.rect.x2, zone.rect.y2
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::DisabledDetector;
    use crate::input::{Connection, Frame};
    use crate::recording::VideoWriter;
    use crate::store::JsonFileStore;
    use crate::zones::ZoneRect;
    use image::RgbImage;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct OfflineConnector;

    impl Connector for OfflineConnector {
        fn open(&self, _url: &str) -> anyhow::Result<Arc<dyn Connection>> {
            anyhow::bail!("offline")
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
            anyhow::bail!("no recording in test")
        }
    }

    #[derive(Default)]
    struct FakeProvider {
        stopped: AtomicBool,
    }

    impl FrameProvider for FakeProvider {
        fn capture(&self) -> Option<Frame> {
            Some(Frame::new(RgbImage::new(64, 48), 1))
        }

        fn shutdown(&self) {
            self.stopped.store(true, Ordering::SeqCst);
        }
    }

    fn registry(dir: &std::path::Path) -> CameraRegistry {
        CameraRegistry::new(
            RegistryOptions {
                video_dir: dir.join("videos"),
                backoff_unit: Duration::from_millis(5),
                ..Default::default()
            },
            Arc::new(OfflineConnector),
            Arc::new(DisabledDetector),
            FrameRenderer::default(),
            Arc::new(NullSink),
            Arc::new(JsonFileStore::new(dir.join("store"))),
        )
    }

    fn zone(tag: u8, x1: i32) -> Zone {
        Zone::new(ZoneRect::new(x1, 100, x1 + 200, 300), ZoneTag(tag))
    }

    #[test]
    fn test_add_camera_rejects_duplicates_and_capacity() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path());

        for id in 1..=4 {
            registry.add_camera(id, &format!("rtsp://cam{}", id)).unwrap();
        }
        assert!(matches!(
            registry.add_camera(2, "rtsp://dup"),
            Err(Error::CameraExists(2))
        ));
        assert!(matches!(
            registry.add_camera(5, "rtsp://cam5"),
            Err(Error::CapacityReached(4))
        ));
        assert_eq!(registry.ids(), vec![1, 2, 3, 4]);

        registry.remove_camera(3).unwrap();
        assert!(matches!(registry.remove_camera(3), Err(Error::CameraNotFound(3))));
        registry.add_camera(5, "rtsp://cam5").unwrap();
        registry.shutdown();
        assert!(registry.ids().is_empty());
    }

    #[test]
    fn test_unknown_camera_has_no_side_effects() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path());
        registry.attach(1, "fake://1", Arc::new(FakeProvider::default())).unwrap();

        assert!(matches!(
            registry.set_module(9, Some(ActiveModule::Ppe)),
            Err(Error::CameraNotFound(9))
        ));
        assert!(matches!(
            registry.add_zone(9, zone(1, 0)),
            Err(Error::CameraNotFound(9))
        ));
        assert!(matches!(
            registry.update_config(9, CameraConfig::default()),
            Err(Error::CameraNotFound(9))
        ));
        assert!(registry.zones(1).unwrap().is_empty());
        assert!(!dir.path().join("store/config/config_cam9.json").exists());
    }

    #[test]
    fn test_deactivation_clears_zones_and_config() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path());
        registry.attach(1, "fake://1", Arc::new(FakeProvider::default())).unwrap();

        assert!(registry.set_module(1, Some(ActiveModule::RestrictedAreas)).unwrap());
        registry.add_zone(1, zone(1, 0)).unwrap();
        registry.add_zone(1, zone(2, 300)).unwrap();
        let mut config = CameraConfig::default();
        config.set_zone_class(ZoneTag(1), "person", true);
        registry.update_config(1, config.clone()).unwrap();
        assert_eq!(registry.config(1).unwrap(), config);

        assert!(!registry.set_module(1, None).unwrap());
        assert!(registry.zones(1).unwrap().is_empty());
        assert_eq!(registry.config(1).unwrap(), CameraConfig::default());

        assert!(registry.set_module(1, Some(ActiveModule::Ppe)).unwrap());
        assert!(registry.zones(1).unwrap().is_empty());
        assert!(!registry.set_module(1, Some(ActiveModule::Thermal)).unwrap());
    }

    #[test]
    fn test_zone_commands() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path());
        registry.attach(1, "fake://1", Arc::new(FakeProvider::default())).unwrap();

        registry.add_zone(1, zone(1, 0)).unwrap();
        registry.add_zone(1, zone(2, 300)).unwrap();
        registry.add_zone(1, zone(1, 50)).unwrap();
        let zones = registry.zones(1).unwrap();
        assert_eq!(zones.len(), 2);
        assert_eq!(zones[0], zone(1, 50));

        assert!(matches!(
            registry.add_zone(1, Zone::new(ZoneRect::new(5, 5, 5, 50), ZoneTag(3))),
            Err(Error::InvalidZone(_))
        ));

        assert!(registry.delete_zone(1, ZoneTag(2)).unwrap());
        assert!(!registry.delete_zone(1, ZoneTag(2)).unwrap());
        registry.delete_all_zones(1).unwrap();
        assert!(registry.zones(1).unwrap().is_empty());

        let imported = registry
            .import_zones(1, vec![zone(1, 0), zone(2, 300), zone(1, 10)])
            .unwrap();
        assert_eq!(imported, vec![zone(1, 10), zone(2, 300)]);
    }

    #[test]
    fn test_save_and_restore() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path());
        registry.attach(1, "fake://1", Arc::new(FakeProvider::default())).unwrap();
        assert!(registry.load_saved_zones(1).unwrap().is_empty());

        registry.add_zone(1, zone(1, 0)).unwrap();
        registry.save_zones(1).unwrap();
        let mut config = CameraConfig::default();
        config.set_show("helmet", true);
        registry.update_config(1, config.clone()).unwrap();

        registry.delete_all_zones(1).unwrap();
        assert_eq!(registry.load_saved_zones(1).unwrap(), vec![zone(1, 0)]);

        // 新注册表从同一存储恢复
        let restored = self::registry(dir.path());
        restored.attach(1, "fake://1", Arc::new(FakeProvider::default())).unwrap();
        restored.restore(1).unwrap();
        assert_eq!(restored.zones(1).unwrap(), vec![zone(1, 0)]);
        assert_eq!(restored.config(1).unwrap(), config);
    }

    #[test]
    fn test_remove_camera_shuts_down_source() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path());
        let provider = Arc::new(FakeProvider::default());
        registry.attach(1, "fake://1", provider.clone()).unwrap();

        let status = registry.status(1).unwrap();
        assert_eq!(status.url, "fake://1");
        assert!(!status.recording);

        registry.remove_camera(1).unwrap();
        assert!(provider.stopped.load(Ordering::SeqCst));
        assert!(matches!(registry.status(1), Err(Error::CameraNotFound(1))));
    }

    #[test]
    fn test_list_recordings() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path());
        assert!(registry.list_recordings().unwrap().is_empty());

        std::fs::create_dir_all(dir.path().join("videos")).unwrap();
        std::fs::write(dir.path().join("videos/event_cam1_20240101_000000.mp4"), b"").unwrap();
        assert_eq!(
            registry.list_recordings().unwrap(),
            vec!["event_cam1_20240101_000000.mp4"]
        );
    }
}
