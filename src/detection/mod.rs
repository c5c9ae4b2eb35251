// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 检测系统 (Detection System)
///
/// 单线程、逐帧驱动, 负责检测结果的后处理与多帧稳定
/// - Detector: 预处理 → 推理 → 解码 → NMS
/// - Tracker:  多帧合并, 判定检测是否稳定
/// - Session:  推理闸门 + 每帧合并 + 重置
pub mod detector;
pub mod geometry;
pub mod session;
pub mod tracker;
pub mod types;

pub use detector::{DetectionStats, Detector};
pub use geometry::{intersection_over_union, is_same_object, ScreenTransform};
pub use session::DetectionSession;
pub use tracker::{BoxTracker, MergeKind, MergeReport, Tracker, TrackerConfig, TrackerState};
pub use types::{BoundingBox, BoxId, Rect, INPUT_SIZE};
