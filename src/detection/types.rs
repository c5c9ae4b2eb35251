// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 检测系统数据结构定义
/// Data structures for detection post-processing and tracking
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use super::geometry;

// ========== 公共常量 ==========

/// YOLO推理输入尺寸 (416x416)
pub const INPUT_SIZE: u32 = 416;

// FNV-1a 64位参数
const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

// ========== 数据结构 ==========

/// 轴对齐矩形 (左上角 + 宽高, 检测器输入像素坐标)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn xmax(&self) -> f32 {
        self.x + self.width
    }

    pub fn ymax(&self) -> f32 {
        self.y + self.height
    }

    pub fn area(&self) -> f32 {
        self.width * self.height
    }

    pub fn center(&self) -> (f32, f32) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    /// 宽或高不为正 (零面积框)
    pub fn is_degenerate(&self) -> bool {
        !(self.width > 0.0 && self.height > 0.0)
    }

    /// 点是否严格位于矩形内部 (落在边上不算)
    pub fn contains_strict(&self, px: f32, py: f32) -> bool {
        self.x < px && px < self.xmax() && self.y < py && py < self.ymax()
    }
}

/// 检测框ID
///
/// 由 `(x, y, width, height, label, confidence)` 内容哈希得到,
/// 结构相同的两个检测框拥有相同ID。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BoxId(u64);

impl fmt::Display for BoxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// 检测框 (Detection bounding box)
///
/// 坐标为检测器输入图像 (416x416) 的像素坐标, `x`/`y` 为左上角。
/// 除 `used` 外创建后不再修改; `used` 由下游锚点放置方在消费后置位。
///
/// 相等性与 [`BoxId`] 一致: 比较几何、标签、置信度的位模式, 不比较 `used`。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    x: f32,
    y: f32,
    width: f32,
    height: f32,
    label: String,
    confidence: f32,
    #[serde(default)]
    used: bool,
}

impl BoundingBox {
    pub fn new(
        x: f32,
        y: f32,
        width: f32,
        height: f32,
        label: impl Into<String>,
        confidence: f32,
    ) -> Self {
        Self {
            x,
            y,
            width,
            height,
            label: label.into(),
            confidence,
            used: false,
        }
    }

    pub fn from_rect(rect: Rect, label: impl Into<String>, confidence: f32) -> Self {
        Self::new(rect.x, rect.y, rect.width, rect.height, label, confidence)
    }

    pub fn x(&self) -> f32 {
        self.x
    }

    pub fn y(&self) -> f32 {
        self.y
    }

    pub fn width(&self) -> f32 {
        self.width
    }

    pub fn height(&self) -> f32 {
        self.height
    }

    pub fn xmax(&self) -> f32 {
        self.x + self.width
    }

    pub fn ymax(&self) -> f32 {
        self.y + self.height
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    pub fn used(&self) -> bool {
        self.used
    }

    pub fn set_used(&mut self, used: bool) {
        self.used = used;
    }

    pub fn rect(&self) -> Rect {
        Rect::new(self.x, self.y, self.width, self.height)
    }

    pub fn area(&self) -> f32 {
        self.width * self.height
    }

    pub fn center(&self) -> (f32, f32) {
        self.rect().center()
    }

    pub fn iou(&self, another: &BoundingBox) -> f32 {
        geometry::intersection_over_union(&self.rect(), &another.rect())
    }

    /// 同一物体判定 (中心点互含), 见 [`geometry::is_same_object`]
    pub fn is_same_object(&self, another: &BoundingBox) -> bool {
        geometry::is_same_object(&self.rect(), &another.rect())
    }

    /// 内容哈希ID (FNV-1a)
    ///
    /// 浮点数按位参与哈希: 置信度只差一个 epsilon 的两个框ID不同。
    pub fn id(&self) -> BoxId {
        let mut hash = FNV_OFFSET_BASIS;
        for value in [self.x, self.y, self.width, self.height] {
            hash = fnv1a(hash, &value.to_bits().to_le_bytes());
        }
        hash = fnv1a(hash, self.label.as_bytes());
        // 0xff 不会出现在UTF-8中, 用作标签结束符
        hash = fnv1a(hash, &[0xff]);
        hash = fnv1a(hash, &self.confidence.to_bits().to_le_bytes());
        BoxId(hash)
    }

    /// 锚点文本标签: "label|百分比置信度"
    pub fn tag(&self) -> String {
        format!("{}|{}", self.label, (self.confidence * 100.0) as i32)
    }

    fn key_bits(&self) -> [u32; 5] {
        [
            self.x.to_bits(),
            self.y.to_bits(),
            self.width.to_bits(),
            self.height.to_bits(),
            self.confidence.to_bits(),
        ]
    }
}

impl PartialEq for BoundingBox {
    fn eq(&self, other: &Self) -> bool {
        self.key_bits() == other.key_bits() && self.label == other.label
    }
}

impl Eq for BoundingBox {}

impl Hash for BoundingBox {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key_bits().hash(state);
        self.label.hash(state);
    }
}

impl fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}, {}:{} - {}:{}",
            self.label, self.confidence, self.x, self.y, self.width, self.height
        )
    }
}

fn fnv1a(hash: u64, bytes: &[u8]) -> u64 {
    bytes
        .iter()
        .fold(hash, |h, &b| (h ^ b as u64).wrapping_mul(FNV_PRIME))
}
