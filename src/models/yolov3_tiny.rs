// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// YOLOv3-tiny / YOLOv4-tiny 网格解码
//
// 输出为两个特征图 (416输入): 13x13 (cell 32) 与 26x26 (cell 16),
// 布局 NHWC [1, rows, cols, 3 * (5 + C)], 每个锚框的通道为
// [tx, ty, tw, th, to, class_logits...]

use anyhow::{ensure, Context, Result};
use ndarray::{Array, Ix4, IxDyn};
use serde::{Deserialize, Serialize};

use super::{label_for, sigmoid, softmax, top_result, ModelType, Postprocessor};
use crate::detection::BoundingBox;

/// YOLOv3-tiny 锚框 (w, h) x 6
pub const YOLOV3_TINY_ANCHORS: [f32; 12] = [
    10.0, 14.0, // anchor 0
    23.0, 27.0, // anchor 1
    37.0, 58.0, // anchor 2
    81.0, 82.0, // anchor 3
    135.0, 169.0, // anchor 4
    344.0, 319.0, // anchor 5
];

/// YOLOv4-tiny 锚框 (w, h) x 6
pub const YOLOV4_TINY_ANCHORS: [f32; 12] = [
    69.0, 48.0, // anchor 0
    46.0, 279.0, // anchor 1
    133.0, 128.0, // anchor 2
    332.0, 129.0, // anchor 3
    180.0, 315.0, // anchor 4
    371.0, 363.0, // anchor 5
];

/// 单个网格的参数
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridParams {
    pub rows: usize,
    pub cols: usize,
    pub cell_width: f32,
    pub cell_height: f32,
    /// 本网格使用的第一个锚框序号 (按对计)
    pub anchor_offset: usize,
}

impl GridParams {
    pub fn new(size: usize, cell: f32, anchor_offset: usize) -> Self {
        Self {
            rows: size,
            cols: size,
            cell_width: cell,
            cell_height: cell,
            anchor_offset,
        }
    }
}

/// 两个默认网格: 13x13 / 26x26, 都从第3个锚框开始
pub fn default_grids() -> Vec<GridParams> {
    vec![GridParams::new(13, 32.0, 3), GridParams::new(26, 16.0, 3)]
}

/// 网格解码配置
#[derive(Debug, Clone, PartialEq)]
pub struct YoloGridConfig {
    pub class_count: usize,
    pub boxes_per_cell: usize,
    pub anchors: Vec<f32>,
    pub grids: Vec<GridParams>,
    pub conf_threshold: f32,
}

impl Default for YoloGridConfig {
    fn default() -> Self {
        Self {
            class_count: 11,
            boxes_per_cell: 3,
            anchors: YOLOV3_TINY_ANCHORS.to_vec(),
            grids: default_grids(),
            conf_threshold: 0.5,
        }
    }
}

impl YoloGridConfig {
    pub fn yolov4_tiny() -> Self {
        Self {
            anchors: YOLOV4_TINY_ANCHORS.to_vec(),
            ..Default::default()
        }
    }

    /// 每个锚框占用的通道数
    pub fn box_channels(&self) -> usize {
        self.class_count + 5
    }
}

/// YOLOv3-tiny / YOLOv4-tiny 后处理器
pub struct YoloGridPostprocessor {
    config: YoloGridConfig,
    labels: Vec<String>,
    model_type: ModelType,
}

impl YoloGridPostprocessor {
    pub fn new(config: YoloGridConfig, labels: Vec<String>, model_type: ModelType) -> Self {
        Self {
            config,
            labels,
            model_type,
        }
    }

    /// 解码单个特征图
    ///
    /// 先遍历列再遍历行, 每个单元依次解码 `boxes_per_cell` 个锚框。
    fn decode_feature_map(
        &self,
        output: &Array<f32, IxDyn>,
        grid: &GridParams,
    ) -> Result<Vec<BoundingBox>> {
        let output = output
            .view()
            .into_dimensionality::<Ix4>()
            .with_context(|| format!("网格输出应为4维, 实际 {:?}", output.shape()))?;

        let box_channels = self.config.box_channels();
        let (batch, rows, cols, channels) = output.dim();
        ensure!(batch >= 1, "网格输出batch为空");
        ensure!(
            rows == grid.rows && cols == grid.cols,
            "网格尺寸不匹配: 期望 {}x{}, 实际 {}x{}",
            grid.rows,
            grid.cols,
            rows,
            cols
        );
        ensure!(
            channels >= self.config.boxes_per_cell * box_channels,
            "通道数不足: 期望 {}, 实际 {}",
            self.config.boxes_per_cell * box_channels,
            channels
        );
        ensure!(
            (grid.anchor_offset + self.config.boxes_per_cell) * 2 <= self.config.anchors.len(),
            "锚框表长度 {} 不足 (offset {})",
            self.config.anchors.len(),
            grid.anchor_offset
        );

        let threshold = self.config.conf_threshold;
        let mut results = Vec::new();

        for col in 0..cols {
            for row in 0..rows {
                let cell = output.slice(ndarray::s![0, row, col, ..]);
                for b in 0..self.config.boxes_per_cell {
                    let ch = b * box_channels;

                    let objectness = sigmoid(cell[ch + 4]);
                    if objectness < threshold {
                        continue;
                    }

                    let logits: Vec<f32> = (0..self.config.class_count)
                        .map(|c| cell[ch + 5 + c])
                        .collect();
                    let Some((class_id, top_score)) = top_result(&softmax(&logits)) else {
                        continue;
                    };
                    let confidence = objectness * top_score;
                    if confidence < threshold {
                        continue;
                    }

                    let anchor = (grid.anchor_offset + b) * 2;
                    let cx = (col as f32 + sigmoid(cell[ch])) * grid.cell_width;
                    let cy = (row as f32 + sigmoid(cell[ch + 1])) * grid.cell_height;
                    let w = cell[ch + 2].exp() * self.config.anchors[anchor];
                    let h = cell[ch + 3].exp() * self.config.anchors[anchor + 1];

                    results.push(BoundingBox::new(
                        cx - w / 2.0,
                        cy - h / 2.0,
                        w,
                        h,
                        label_for(&self.labels, class_id),
                        confidence,
                    ));
                }
            }
        }

        Ok(results)
    }
}

impl Postprocessor for YoloGridPostprocessor {
    fn postprocess(&self, outputs: &[Array<f32, IxDyn>]) -> Result<Vec<BoundingBox>> {
        ensure!(
            outputs.len() >= self.config.grids.len(),
            "模型输出数量不足: 期望 {}, 实际 {}",
            self.config.grids.len(),
            outputs.len()
        );

        let mut boxes = Vec::new();
        for (output, grid) in outputs.iter().zip(&self.config.grids) {
            boxes.extend(self.decode_feature_map(output, grid)?);
        }
        Ok(boxes)
    }

    fn model_type(&self) -> ModelType {
        self.model_type
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    const CLASSES: usize = 3;

    fn postprocessor() -> YoloGridPostprocessor {
        let config = YoloGridConfig {
            class_count: CLASSES,
            grids: vec![GridParams::new(2, 32.0, 3)],
            ..Default::default()
        };
        let labels = vec!["Box".into(), "Bed".into(), "PC".into()];
        YoloGridPostprocessor::new(config, labels, ModelType::YOLOv3Tiny)
    }

    /// 全部objectness为很小值的空特征图
    fn empty_map(size: usize) -> Array<f32, IxDyn> {
        let channels = 3 * (CLASSES + 5);
        let mut map = Array::zeros(IxDyn(&[1, size, size, channels]));
        for row in 0..size {
            for col in 0..size {
                for b in 0..3 {
                    map[[0, row, col, b * (CLASSES + 5) + 4]] = -20.0;
                }
            }
        }
        map
    }

    #[test]
    fn test_decode_single_cell() {
        let pp = postprocessor();
        let mut map = empty_map(2);
        // row 1, col 0, anchor 1
        let ch = CLASSES + 5;
        map[[0, 1, 0, ch]] = 0.0; // σ = 0.5
        map[[0, 1, 0, ch + 1]] = 0.0;
        map[[0, 1, 0, ch + 2]] = 0.0; // exp = 1
        map[[0, 1, 0, ch + 3]] = 0.0;
        map[[0, 1, 0, ch + 4]] = 10.0;
        map[[0, 1, 0, ch + 5 + 1]] = 10.0; // Bed

        let boxes = pp.postprocess(&[map]).unwrap();
        assert_eq!(boxes.len(), 1);
        let b = &boxes[0];
        assert_eq!(b.label(), "Bed");
        // anchor (3 + 1) = 135x169
        assert_abs_diff_eq!(b.width(), 135.0, epsilon = 1e-3);
        assert_abs_diff_eq!(b.height(), 169.0, epsilon = 1e-3);
        // 中心 x = (0 + 0.5) * 32, y = (1 + 0.5) * 32
        assert_abs_diff_eq!(b.center().0, 16.0, epsilon = 1e-3);
        assert_abs_diff_eq!(b.center().1, 48.0, epsilon = 1e-3);
        assert!(b.confidence() > 0.99);
    }

    #[test]
    fn test_low_class_confidence_is_dropped() {
        let pp = postprocessor();
        let mut map = empty_map(2);
        // objectness 高, 但三个类别均匀 → 约 1/3
        map[[0, 0, 0, 4]] = 10.0;
        assert!(pp.postprocess(&[map]).unwrap().is_empty());
    }

    #[test]
    fn test_column_major_order() {
        let pp = postprocessor();
        let mut map = empty_map(2);
        for (row, col) in [(0, 1), (1, 0)] {
            map[[0, row, col, 4]] = 10.0;
            map[[0, row, col, 5]] = 10.0;
        }
        let boxes = pp.postprocess(&[map]).unwrap();
        assert_eq!(boxes.len(), 2);
        // 先列后行: (row 1, col 0) 在前
        assert!(boxes[0].center().0 < boxes[1].center().0);
    }

    #[test]
    fn test_shape_mismatch_is_error() {
        let pp = postprocessor();
        assert!(pp.postprocess(&[]).is_err());
        assert!(pp.postprocess(&[empty_map(3)]).is_err());
        let flat = Array::zeros(IxDyn(&[1, 2, 2]));
        assert!(pp.postprocess(&[flat]).is_err());
        let narrow = Array::zeros(IxDyn(&[1, 2, 2, 5]));
        assert!(pp.postprocess(&[narrow]).is_err());
    }

    #[test]
    fn test_yolov4_tiny_anchors() {
        let config = YoloGridConfig::yolov4_tiny();
        assert_eq!(config.anchors[6], 332.0);
        assert_eq!(config.grids, default_grids());
    }
}
