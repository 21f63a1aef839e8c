//! 区域引擎 (Zone engine)
//!
//! 每个摄像头维护一组带类型标记的矩形区域, 同一标记最多一个区域.
//! 每帧用检测框中心点做严格内部判定, 得到区域占用表和违规标志.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::camera::{ActiveModule, CameraConfig};
use crate::detection::Detection;

/// 区域类型标记 (1 = 区域1, 2 = 区域2, ...)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ZoneTag(pub u8);

impl fmt::Display for ZoneTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 矩形 (工作分辨率坐标), 保证 x1 <= x2, y1 <= y2
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneRect {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl ZoneRect {
    /// 任意两个对角点构造, 自动归一化
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self {
            x1: x1.min(x2),
            y1: y1.min(y2),
            x2: x1.max(x2),
            y2: y1.max(y2),
        }
    }

    pub fn width(&self) -> i32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> i32 {
        self.y2 - self.y1
    }

    /// 严格内部判定: 落在边上不算
    pub fn contains(&self, (x, y): (i32, i32)) -> bool {
        self.x1 < x && x < self.x2 && self.y1 < y && y < self.y2
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Zone {
    #[serde(flatten)]
    pub rect: ZoneRect,
    #[serde(rename = "area_type", alias = "tag")]
    pub tag: ZoneTag,
}

impl Zone {
    pub fn new(rect: ZoneRect, tag: ZoneTag) -> Self {
        Self { rect, tag }
    }
}

/// 区域列表, 按插入顺序保存, 标记唯一
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<Zone>", into = "Vec<Zone>")]
pub struct ZoneSet {
    zones: Vec<Zone>,
}

impl ZoneSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// 添加区域; 已存在相同标记时原位替换
    pub fn insert(&mut self, zone: Zone) {
        match self.zones.iter_mut().find(|z| z.tag == zone.tag) {
            Some(existing) => *existing = zone,
            None => self.zones.push(zone),
        }
    }

    /// 删除指定标记的区域, 返回是否存在
    pub fn remove(&mut self, tag: ZoneTag) -> bool {
        let before = self.zones.len();
        self.zones.retain(|z| z.tag != tag);
        self.zones.len() != before
    }

    pub fn clear(&mut self) {
        self.zones.clear();
    }

    pub fn get(&self, tag: ZoneTag) -> Option<&Zone> {
        self.zones.iter().find(|z| z.tag == tag)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Zone> {
        self.zones.iter()
    }

    pub fn tags(&self) -> impl Iterator<Item = ZoneTag> + '_ {
        self.zones.iter().map(|z| z.tag)
    }

    pub fn len(&self) -> usize {
        self.zones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }

    pub fn to_vec(&self) -> Vec<Zone> {
        self.zones.clone()
    }
}

impl From<Vec<Zone>> for ZoneSet {
    fn from(zones: Vec<Zone>) -> Self {
        let mut set = ZoneSet::new();
        for zone in zones {
            set.insert(zone);
        }
        set
    }
}

impl From<ZoneSet> for Vec<Zone> {
    fn from(set: ZoneSet) -> Self {
        set.zones
    }
}

/// 区域占用表: 每帧整体重建
pub type OccupancyMap = BTreeMap<ZoneTag, bool>;

/// 单帧区域判定结果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ZoneVerdict {
    pub occupancy: OccupancyMap,
    pub violation: bool,
}

/// 全部区域置为 false 的占用表
pub fn empty_occupancy(zones: &ZoneSet) -> OccupancyMap {
    zones.tags().map(|tag| (tag, false)).collect()
}

/// 区域判定
///
/// 仅在"限制区域"模块下有意义. 对每个规范类别的检测取整数中心点,
/// 按插入顺序找第一个严格包含它的区域, 若该区域对此类别开启检测,
/// 则标记占用并置违规.
pub fn evaluate(
    module: Option<ActiveModule>,
    detections: &[Detection],
    zones: &ZoneSet,
    config: &CameraConfig,
) -> ZoneVerdict {
    let mut verdict = ZoneVerdict {
        occupancy: empty_occupancy(zones),
        violation: false,
    };

    if module != Some(ActiveModule::RestrictedAreas) {
        return verdict;
    }

    for detection in detections {
        let Some(class) = detection.label.canonical() else {
            continue;
        };
        let center = detection.bbox.center();

        // 第一个命中的区域即停止
        if let Some(zone) = zones.iter().find(|z| z.rect.contains(center)) {
            if config.zone_enabled(zone.tag, class.key()) {
                verdict.occupancy.insert(zone.tag, true);
                verdict.violation = true;
                log::debug!("{} at {:?} inside zone {}", class.key(), center, zone.tag);
            }
        }
    }

    verdict
}
