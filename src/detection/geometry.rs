// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 几何工具
//! Geometry helpers shared by NMS and the box tracker

use super::types::{BoundingBox, Rect};

/// 计算两个矩形的IOU (Intersection over Union)
///
/// 任一矩形宽或高不为正时直接返回0, 不会出现除零。
pub fn intersection_over_union(a: &Rect, b: &Rect) -> f32 {
    if a.is_degenerate() || b.is_degenerate() {
        return 0.0;
    }

    let min_x = a.x.max(b.x);
    let min_y = a.y.max(b.y);
    let max_x = a.xmax().min(b.xmax());
    let max_y = a.ymax().min(b.ymax());

    let intersection = (max_y - min_y).max(0.0) * (max_x - min_x).max(0.0);

    intersection / (a.area() + b.area() - intersection)
}

/// 同一物体判定
///
/// 任一框的中心点严格落在另一框内部即视为同一物体 (两个方向取或)。
/// 比IOU更宽松: 大框中嵌套的小框即使IOU很低也算同一物体。
/// 只看几何, 不看类别标签。
pub fn is_same_object(a: &Rect, b: &Rect) -> bool {
    if a.is_degenerate() || b.is_degenerate() {
        return false;
    }

    let (cx_a, cy_a) = a.center();
    let (cx_b, cy_b) = b.center();

    b.contains_strict(cx_a, cy_a) || a.contains_strict(cx_b, cy_b)
}

/// 检测器输入坐标 → 屏幕坐标
///
/// 输入图像是屏幕中心裁剪出的正方形, 缩放到 `input_size` 后送入模型。
/// 因此映射回屏幕只需统一缩放再沿长边平移。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScreenTransform {
    pub scale_factor: f32,
    pub shift_x: f32,
    pub shift_y: f32,
}

impl Default for ScreenTransform {
    fn default() -> Self {
        Self {
            scale_factor: 1.0,
            shift_x: 0.0,
            shift_y: 0.0,
        }
    }
}

impl ScreenTransform {
    pub fn for_screen(screen_width: u32, screen_height: u32, input_size: u32) -> Self {
        let mut transform = Self::default();
        let smallest = if screen_width < screen_height {
            transform.shift_y = (screen_height - screen_width) as f32 / 2.0;
            screen_width
        } else {
            transform.shift_x = (screen_width - screen_height) as f32 / 2.0;
            screen_height
        };
        transform.scale_factor = smallest as f32 / input_size as f32;
        transform
    }

    pub fn to_screen(&self, rect: &Rect) -> Rect {
        Rect::new(
            rect.x * self.scale_factor + self.shift_x,
            rect.y * self.scale_factor + self.shift_y,
            rect.width * self.scale_factor,
            rect.height * self.scale_factor,
        )
    }

    /// 射线检测用的锚点 (屏幕坐标, 左下角原点)
    ///
    /// 检测框坐标以左上角为原点, AR相机以左下角为原点, 需翻转Y轴。
    pub fn anchor_point(&self, bbox: &BoundingBox, screen_height: u32) -> (f32, f32) {
        let rect = self.to_screen(&bbox.rect());
        let y_min = screen_height as f32 - rect.y;
        (rect.x + rect.width / 2.0, y_min - rect.height / 2.0)
    }
}
