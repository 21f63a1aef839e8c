/// 帧渲染器 (Frame renderer)
///
/// 在帧的副本上绘制: 区域边框 (仅限制区域模块) + 已接受的检测框与标签.
/// 标签文字需要加载 TrueType 字体; 没有字体时只画边框.
use std::path::Path;

use ab_glyph::{FontVec, PxScale};
use anyhow::{Context, Result};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;

use crate::camera::ActiveModule;
use crate::detection::{CanonicalClass, ClassLabel, Detection};
use crate::zones::{ZoneRect, ZoneSet, ZoneTag};

const ZONE_PRIMARY: Rgb<u8> = Rgb([0, 200, 0]);
const ZONE_OTHER: Rgb<u8> = Rgb([220, 0, 0]);
const RAW_LABEL_COLOR: Rgb<u8> = Rgb([200, 200, 200]);
const TEXT_COLOR: Rgb<u8> = Rgb([0, 0, 0]);

// 规范类别配色 (按 CanonicalClass::ALL 顺序)
const CLASS_COLORS: [[u8; 3]; 8] = [
    [255, 128, 0],
    [255, 220, 0],
    [0, 160, 255],
    [180, 0, 255],
    [0, 255, 200],
    [255, 0, 160],
    [120, 80, 40],
    [0, 90, 255],
];

pub struct FrameRenderer {
    font: Option<FontVec>,
    scale: PxScale,
}

impl Default for FrameRenderer {
    fn default() -> Self {
        Self::new(None)
    }
}

impl FrameRenderer {
    pub fn new(font: Option<FontVec>) -> Self {
        Self {
            font,
            scale: PxScale::from(16.0),
        }
    }

    /// 加载字体文件 (ttf/otf)
    pub fn from_font_file(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("failed to read font {}", path.display()))?;
        let font = FontVec::try_from_vec(bytes)
            .map_err(|e| anyhow::anyhow!("invalid font {}: {}", path.display(), e))?;
        log::info!("label font loaded: {}", path.display());
        Ok(Self::new(Some(font)))
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    /// 绘制到副本上, 输入图像不变
    pub fn render(
        &self,
        image: &RgbImage,
        module: Option<ActiveModule>,
        accepted: &[Detection],
        zones: &ZoneSet,
    ) -> RgbImage {
        let mut canvas = image.clone();

        if module == Some(ActiveModule::RestrictedAreas) {
            for zone in zones.iter() {
                self.draw_zone(&mut canvas, &zone.rect, zone.tag);
            }
        }

        for det in accepted {
            let color = label_color(&det.label);
            let (x1, y1) = (det.bbox.x1.round() as i32, det.bbox.y1.round() as i32);
            let w = det.bbox.width().round().max(1.0) as u32;
            let h = det.bbox.height().round().max(1.0) as u32;
            draw_thick_rect(&mut canvas, Rect::at(x1, y1).of_size(w, h), color);

            let text = format!("{} {:.2}", det.label, det.confidence);
            self.draw_label(&mut canvas, x1, y1, &text, color);
        }

        canvas
    }

    fn draw_zone(&self, canvas: &mut RgbImage, rect: &ZoneRect, tag: ZoneTag) {
        let color = if tag == ZoneTag(1) {
            ZONE_PRIMARY
        } else {
            ZONE_OTHER
        };
        let w = rect.width().max(1) as u32;
        let h = rect.height().max(1) as u32;
        draw_thick_rect(canvas, Rect::at(rect.x1, rect.y1).of_size(w, h), color);
        self.draw_label(canvas, rect.x1, rect.y1, &format!("Zone {}", tag), color);
    }

    /// 标签画在框的上方; 顶部放不下时画在框内
    fn draw_label(&self, canvas: &mut RgbImage, x: i32, y: i32, text: &str, color: Rgb<u8>) {
        let Some(font) = &self.font else {
            return;
        };
        let (tw, th) = text_size(self.scale, font, text);
        let (bw, bh) = (tw + 4, th + 4);
        let top = if y - bh as i32 >= 0 { y - bh as i32 } else { y };

        draw_filled_rect_mut(canvas, Rect::at(x, top).of_size(bw.max(1), bh.max(1)), color);
        draw_text_mut(canvas, TEXT_COLOR, x + 2, top + 2, self.scale, font, text);
    }
}

fn label_color(label: &ClassLabel) -> Rgb<u8> {
    match label {
        ClassLabel::Canonical(class) => CanonicalClass::ALL
            .iter()
            .position(|c| c == class)
            .and_then(|i| CLASS_COLORS.get(i))
            .map(|c| Rgb(*c))
            .unwrap_or(RAW_LABEL_COLOR),
        ClassLabel::Raw(_) => RAW_LABEL_COLOR,
    }
}

/// 2像素宽边框
fn draw_thick_rect(canvas: &mut RgbImage, rect: Rect, color: Rgb<u8>) {
    draw_hollow_rect_mut(canvas, rect, color);
    if rect.width() > 2 && rect.height() > 2 {
        let inner = Rect::at(rect.left() + 1, rect.top() + 1)
            .of_size(rect.width() - 2, rect.height() - 2);
        draw_hollow_rect_mut(canvas, inner, color);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::BBox;
    use crate::zones::Zone;

    fn zones() -> ZoneSet {
        let mut set = ZoneSet::default();
        set.insert(Zone {
            rect: ZoneRect::new(100, 100, 300, 300),
            tag: ZoneTag(1),
        });
        set.insert(Zone {
            rect: ZoneRect::new(400, 50, 500, 200),
            tag: ZoneTag(2),
        });
        set
    }

    #[test]
    fn test_zones_only_in_restricted_mode() {
        let renderer = FrameRenderer::default();
        let image = RgbImage::new(640, 480);

        let out = renderer.render(&image, Some(ActiveModule::Ppe), &[], &zones());
        assert_eq!(out, image);

        let out = renderer.render(&image, Some(ActiveModule::RestrictedAreas), &[], &zones());
        assert_eq!(*out.get_pixel(100, 200), ZONE_PRIMARY);
        assert_eq!(*out.get_pixel(400, 100), ZONE_OTHER);
        assert_eq!(*out.get_pixel(200, 200), Rgb([0, 0, 0]));
        // 输入不变
        assert_eq!(*image.get_pixel(100, 200), Rgb([0, 0, 0]));
    }

    #[test]
    fn test_accepted_detection_outline() {
        let renderer = FrameRenderer::default();
        let image = RgbImage::new(640, 480);
        let det = Detection {
            bbox: BBox::new(10.0, 20.0, 110.0, 220.0),
            label: ClassLabel::Canonical(CanonicalClass::Person),
            confidence: 0.9,
        };
        let out = renderer.render(&image, Some(ActiveModule::Ppe), &[det], &ZoneSet::default());
        assert_eq!(*out.get_pixel(10, 100), Rgb(CLASS_COLORS[0]));
        assert_eq!(*out.get_pixel(60, 100), Rgb([0, 0, 0]));
    }
}
