//! 类别映射 (Class taxonomy)
//!
//! 检测器原始标签 → 规范类别. 静态查找表, 未收录的标签原样透传.

use serde::{Deserialize, Serialize};

use super::types::ClassLabel;

/// 规范类别 (Canonical class)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CanonicalClass {
    Person,
    Helmet,
    Goggles,
    Mask,
    EarProtection,
    Gloves,
    Boots,
    Laminator,
}

impl CanonicalClass {
    pub const ALL: [CanonicalClass; 8] = [
        CanonicalClass::Person,
        CanonicalClass::Helmet,
        CanonicalClass::Goggles,
        CanonicalClass::Mask,
        CanonicalClass::EarProtection,
        CanonicalClass::Gloves,
        CanonicalClass::Boots,
        CanonicalClass::Laminator,
    ];

    /// 配置键
    pub fn key(&self) -> &'static str {
        match self {
            CanonicalClass::Person => "person",
            CanonicalClass::Helmet => "helmet",
            CanonicalClass::Goggles => "goggles",
            CanonicalClass::Mask => "mask",
            CanonicalClass::EarProtection => "ear-protection",
            CanonicalClass::Gloves => "gloves",
            CanonicalClass::Boots => "boots",
            CanonicalClass::Laminator => "laminator",
        }
    }

    /// 画面显示名称
    pub fn display_name(&self) -> &'static str {
        match self {
            CanonicalClass::Person => "Person",
            CanonicalClass::Helmet => "Helmet",
            CanonicalClass::Goggles => "Goggles",
            CanonicalClass::Mask => "Mask",
            CanonicalClass::EarProtection => "Ear protection",
            CanonicalClass::Gloves => "Gloves",
            CanonicalClass::Boots => "Boots",
            CanonicalClass::Laminator => "Laminator",
        }
    }
}

/// 原始标签(小写) → 规范类别
static RAW_TO_CANONICAL: phf::Map<&'static str, CanonicalClass> = phf::phf_map! {
    "person" => CanonicalClass::Person,
    "persona" => CanonicalClass::Person,
    "helmet" => CanonicalClass::Helmet,
    "hardhat" => CanonicalClass::Helmet,
    "hard hat" => CanonicalClass::Helmet,
    "casco" => CanonicalClass::Helmet,
    "goggles" => CanonicalClass::Goggles,
    "glasses" => CanonicalClass::Goggles,
    "gafas" => CanonicalClass::Goggles,
    "mask" => CanonicalClass::Mask,
    "face mask" => CanonicalClass::Mask,
    "tapabocas" => CanonicalClass::Mask,
    "ear protection" => CanonicalClass::EarProtection,
    "earmuffs" => CanonicalClass::EarProtection,
    "protector auditivo" => CanonicalClass::EarProtection,
    "gloves" => CanonicalClass::Gloves,
    "glove" => CanonicalClass::Gloves,
    "guantes" => CanonicalClass::Gloves,
    "boots" => CanonicalClass::Boots,
    "boot" => CanonicalClass::Boots,
    "botas" => CanonicalClass::Boots,
    "laminator" => CanonicalClass::Laminator,
    "laminadora" => CanonicalClass::Laminator,
};

/// 原始标签 → 规范类别 (大小写/首尾空白不敏感)
pub fn lookup(raw: &str) -> Option<CanonicalClass> {
    RAW_TO_CANONICAL
        .get(raw.trim().to_lowercase().as_str())
        .copied()
}

/// 翻译原始标签, 未收录时透传原始名称
pub fn translate(raw: &str) -> ClassLabel {
    match lookup(raw) {
        Some(class) => ClassLabel::Canonical(class),
        None => ClassLabel::Raw(raw.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_translate_known_labels() {
        assert_eq!(translate("person"), ClassLabel::Canonical(CanonicalClass::Person));
        assert_eq!(translate("Persona"), ClassLabel::Canonical(CanonicalClass::Person));
        assert_eq!(
            translate("protector auditivo"),
            ClassLabel::Canonical(CanonicalClass::EarProtection)
        );
        assert_eq!(translate(" Mask "), ClassLabel::Canonical(CanonicalClass::Mask));
    }

    #[test]
    fn test_unknown_label_passes_through() {
        assert_eq!(translate("forklift"), ClassLabel::Raw("forklift".to_string()));
    }

    #[test]
    fn test_every_canonical_key_round_trips() {
        for class in CanonicalClass::ALL {
            let raw = class.key().replace('-', " ");
            assert_eq!(lookup(&raw), Some(class), "{}", raw);
        }
    }
}
