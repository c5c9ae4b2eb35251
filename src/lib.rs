// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
pub mod config; // 流水线配置参数
pub mod detection; // 检测后处理与多帧稳定
pub mod models; // 模型输出解码
pub mod preprocess; // 输入张量转换
pub mod recording; // 候选框录制与回放

pub use crate::config::PipelineConfig;
pub use crate::detection::{
    BoundingBox, BoxId, BoxTracker, DetectionSession, Detector, MergeKind, MergeReport, Rect,
    ScreenTransform, Tracker, TrackerConfig, TrackerState,
};
pub use crate::models::{Inference, ModelType, Postprocessor};

/// 非极大值抑制 (按置信度)
///
/// 按置信度降序稳定排序 (置信度相同保持输入顺序), 依次保留最高的框,
/// 与已保留框IOU超过阈值的框被丢弃, 保留数达到 `limit` 即停止。
/// 只与已保留的框比较, 并不保证任意两个被丢弃框之间的关系。
pub fn non_max_suppression(xs: &mut Vec<BoundingBox>, iou_threshold: f32, limit: usize) {
    suppress_by_key(xs, iou_threshold, limit, BoundingBox::confidence);
}

/// 非极大值抑制 (按面积)
///
/// 与 [`non_max_suppression`] 相同, 但以面积降序作为优先级。
pub fn non_max_suppression_by_area(xs: &mut Vec<BoundingBox>, iou_threshold: f32, limit: usize) {
    suppress_by_key(xs, iou_threshold, limit, BoundingBox::area);
}

fn suppress_by_key<F>(xs: &mut Vec<BoundingBox>, iou_threshold: f32, limit: usize, key: F)
where
    F: Fn(&BoundingBox) -> f32,
{
    xs.sort_by(|b1, b2| key(b2).total_cmp(&key(b1)));

    let mut current_index = 0;
    for index in 0..xs.len() {
        if current_index >= limit {
            break;
        }
        let mut drop = false;
        for prev_index in 0..current_index {
            let iou = xs[prev_index].iou(&xs[index]);
            if iou > iou_threshold {
                drop = true;
                break;
            }
        }
        if !drop {
            xs.swap(current_index, index);
            current_index += 1;
        }
    }
    xs.truncate(current_index);
}

/// 过滤面积过小的检测框
///
/// 面积小于 `min_area_ratio * image_width * image_height` 的框被丢弃,
/// `min_area_ratio <= 0` 时不过滤。
pub fn filter_small_boxes(
    xs: &mut Vec<BoundingBox>,
    min_area_ratio: f32,
    image_width: u32,
    image_height: u32,
) {
    if min_area_ratio <= 0.0 {
        return;
    }
    let min_area = min_area_ratio * image_width as f32 * image_height as f32;
    xs.retain(|bbox| bbox.area() >= min_area);
}
