//! 参数持久化 (Config store)
//!
//! 同步键值存储: (集合, 摄像头) → 字节. 加密等由外部实现负责.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::camera::CameraId;

/// 存储集合
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collection {
    /// 区域列表
    Areas,
    /// 按类别开关
    Config,
}

impl Collection {
    pub fn dir_name(&self) -> &'static str {
        match self {
            Collection::Areas => "areas",
            Collection::Config => "config",
        }
    }

    pub fn file_name(&self, camera_id: CameraId) -> String {
        format!("{}_cam{}.json", self.dir_name(), camera_id)
    }
}

pub trait ConfigStore: Send + Sync {
    fn save(&self, collection: Collection, camera_id: CameraId, data: &[u8]) -> Result<()>;
    /// 不存在时返回 None
    fn load(&self, collection: Collection, camera_id: CameraId) -> Result<Option<Vec<u8>>>;
}

/// 明文 JSON 文件存储: {root}/areas/areas_cam{id}.json, {root}/config/config_cam{id}.json
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    root: PathBuf,
}

impl JsonFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self, collection: Collection, camera_id: CameraId) -> PathBuf {
        self.root
            .join(collection.dir_name())
            .join(collection.file_name(camera_id))
    }
}

impl ConfigStore for JsonFileStore {
    fn save(&self, collection: Collection, camera_id: CameraId, data: &[u8]) -> Result<()> {
        let path = self.path(collection, camera_id);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        // 先写临时文件再改名, 避免读到半个文件
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, data).with_context(|| format!("failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, &path)
            .with_context(|| format!("failed to replace {}", path.display()))?;
        log::debug!("saved {}", path.display());
        Ok(())
    }

    fn load(&self, collection: Collection, camera_id: CameraId) -> Result<Option<Vec<u8>>> {
        let path = self.path(collection, camera_id);
        match std::fs::read(&path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("failed to read {}", path.display())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());

        assert!(store.load(Collection::Areas, 1).unwrap().is_none());
        store.save(Collection::Areas, 1, b"[]").unwrap();
        store.save(Collection::Config, 1, b"{}").unwrap();

        assert_eq!(store.load(Collection::Areas, 1).unwrap().unwrap(), b"[]");
        assert_eq!(store.load(Collection::Config, 1).unwrap().unwrap(), b"{}");
        assert!(dir.path().join("areas/areas_cam1.json").is_file());
        assert!(dir.path().join("config/config_cam1.json").is_file());
        assert!(store.load(Collection::Areas, 2).unwrap().is_none());
    }
}
