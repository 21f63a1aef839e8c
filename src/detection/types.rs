/// 检测系统数据结构定义
/// Data structures for the detection system
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::taxonomy::CanonicalClass;

// ========== 公共常量 ==========

/// 工作分辨率 (检测/区域/渲染统一坐标系)
pub const WORK_WIDTH: u32 = 640;
pub const WORK_HEIGHT: u32 = 480;

// ========== 数据结构 ==========

/// 检测框 (Detection bounding box), 左上/右下角坐标
#[derive(Clone, Copy, Debug, PartialEq, Default, Serialize, Deserialize)]
pub struct BBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    /// 整数中心点: 先截断坐标再取整数中点 (i64 计算, 不溢出)
    pub fn center(&self) -> (i32, i32) {
        let mid = |a: f32, b: f32| ((a as i32 as i64 + b as i32 as i64).div_euclid(2)) as i32;
        (mid(self.x1, self.x2), mid(self.y1, self.y2))
    }
}

/// 检测器原始输出 (检测器 → 评估器)
#[derive(Clone, Debug, PartialEq)]
pub struct RawDetection {
    pub bbox: BBox,
    pub label: String,
    pub confidence: f32,
}

/// 类别标签: 规范类别, 或未识别的原始名称
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ClassLabel {
    Canonical(CanonicalClass),
    Raw(String),
}

impl ClassLabel {
    /// 配置键 (小写, 空格替换为 '-')
    pub fn key(&self) -> String {
        match self {
            ClassLabel::Canonical(class) => class.key().to_string(),
            ClassLabel::Raw(name) => name.trim().to_lowercase().replace(' ', "-"),
        }
    }

    pub fn canonical(&self) -> Option<CanonicalClass> {
        match self {
            ClassLabel::Canonical(class) => Some(*class),
            ClassLabel::Raw(_) => None,
        }
    }
}

impl fmt::Display for ClassLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClassLabel::Canonical(class) => f.write_str(class.display_name()),
            ClassLabel::Raw(name) => f.write_str(name),
        }
    }
}

/// 单次检测结果 (每帧重新计算, 不持久化)
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    pub bbox: BBox,
    pub label: ClassLabel,
    pub confidence: f32,
}

/// 存在性映射: 每个规范类别在本帧是否出现
pub type PresenceMap = BTreeMap<CanonicalClass, bool>;
