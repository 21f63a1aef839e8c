//! 摄像头运行参数 (module / zones / per-class config)
//!
//! 三者组成一个不可变快照, 管理命令整体替换快照, 评估每帧只读一个快照.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use crate::zones::{ZoneSet, ZoneTag};

/// 激活的功能模块
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActiveModule {
    /// 个人防护装备检测
    #[serde(alias = "EPP's", alias = "PPE")]
    Ppe,
    /// 限制区域入侵检测
    #[serde(alias = "Áreas Restringidas", alias = "Restricted Areas")]
    RestrictedAreas,
    /// 仅测温, 不做目标检测
    #[serde(alias = "Temperatura", alias = "Thermal")]
    Thermal,
}

impl ActiveModule {
    /// 该模块是否需要运行检测器
    pub fn runs_detection(&self) -> bool {
        !matches!(self, ActiveModule::Thermal)
    }
}

/// 按类别的显示/检测开关
///
/// - `show`:  PPE 模块, 类别键 → 是否显示
/// - `zones`: 限制区域模块, 区域标记 → (类别键 → 是否检测)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraConfig {
    #[serde(default)]
    pub show: BTreeMap<String, bool>,
    #[serde(default)]
    pub zones: BTreeMap<ZoneTag, BTreeMap<String, bool>>,
}

impl CameraConfig {
    pub fn shows(&self, class_key: &str) -> bool {
        self.show.get(class_key).copied().unwrap_or(false)
    }

    pub fn zone_enabled(&self, tag: ZoneTag, class_key: &str) -> bool {
        self.zones
            .get(&tag)
            .and_then(|classes| classes.get(class_key))
            .copied()
            .unwrap_or(false)
    }

    /// 任一区域对该类别开启
    pub fn any_zone_enabled(&self, class_key: &str) -> bool {
        self.zones
            .values()
            .any(|classes| classes.get(class_key).copied().unwrap_or(false))
    }

    pub fn set_show(&mut self, class_key: &str, enabled: bool) {
        self.show.insert(class_key.to_string(), enabled);
    }

    pub fn set_zone_class(&mut self, tag: ZoneTag, class_key: &str, enabled: bool) {
        self.zones
            .entry(tag)
            .or_default()
            .insert(class_key.to_string(), enabled);
    }
}

/// 一个时刻的完整参数快照
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CameraSettings {
    pub module: Option<ActiveModule>,
    pub zones: ZoneSet,
    pub config: CameraConfig,
}

impl CameraSettings {
    pub fn detection_enabled(&self) -> bool {
        self.module.map(|m| m.runs_detection()).unwrap_or(false)
    }
}

/// 快照容器: 读取拿到 Arc, 写入整体替换
#[derive(Debug, Default)]
pub struct SettingsCell {
    current: RwLock<Arc<CameraSettings>>,
}

impl SettingsCell {
    pub fn new(settings: CameraSettings) -> Self {
        Self {
            current: RwLock::new(Arc::new(settings)),
        }
    }

    pub fn snapshot(&self) -> Arc<CameraSettings> {
        let guard = self.current.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }

    /// 基于当前快照生成新快照并替换; 写锁保证并发命令不丢更新
    pub fn update<R>(&self, f: impl FnOnce(&mut CameraSettings) -> R) -> R {
        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        let mut next = CameraSettings::clone(&guard);
        let result = f(&mut next);
        *guard = Arc::new(next);
        result
    }
}
