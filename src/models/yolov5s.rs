// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// YOLOv5s 单阶段解码
//
// 输出布局 [1, 1, 5 + C, N]: 第 i 个候选框读取 t[0, 0, ch, i],
// ch = [cx, cy, w, h, objectness, class_probs...]

use anyhow::{ensure, Context, Result};
use ndarray::{Array, Ix4, IxDyn};

use super::{label_for, top_result, ModelType, Postprocessor};
use crate::detection::BoundingBox;

/// YOLOv5s 解码配置
#[derive(Debug, Clone, PartialEq)]
pub struct YOLOv5sConfig {
    pub class_count: usize,
    /// objectness 低于该值的槽位直接跳过
    pub objectness_floor: f32,
}

impl Default for YOLOv5sConfig {
    fn default() -> Self {
        Self {
            class_count: 11,
            objectness_floor: 0.35,
        }
    }
}

/// YOLOv5s 后处理器
pub struct YOLOv5sPostprocessor {
    config: YOLOv5sConfig,
    labels: Vec<String>,
}

impl YOLOv5sPostprocessor {
    pub fn new(config: YOLOv5sConfig, labels: Vec<String>) -> Self {
        Self { config, labels }
    }
}

impl Postprocessor for YOLOv5sPostprocessor {
    fn postprocess(&self, outputs: &[Array<f32, IxDyn>]) -> Result<Vec<BoundingBox>> {
        let output = outputs.first().context("YOLOv5s 缺少输出张量")?;
        let output = output
            .view()
            .into_dimensionality::<Ix4>()
            .with_context(|| format!("YOLOv5s 输出应为4维, 实际 {:?}", output.shape()))?;

        let (batch, group, channels, slots) = output.dim();
        ensure!(batch >= 1 && group >= 1, "YOLOv5s 输出为空");
        ensure!(
            channels >= 5 + self.config.class_count,
            "通道数不足: 期望 {}, 实际 {}",
            5 + self.config.class_count,
            channels
        );

        let mut results = Vec::new();
        for i in 0..slots {
            let objectness = output[[0, 0, 4, i]];
            if objectness < self.config.objectness_floor {
                continue;
            }

            let scores: Vec<f32> = (0..self.config.class_count)
                .map(|c| output[[0, 0, 5 + c, i]] * objectness)
                .collect();
            let Some((class_id, class_conf)) = top_result(&scores) else {
                continue;
            };

            let cx = output[[0, 0, 0, i]];
            let cy = output[[0, 0, 1, i]];
            let w = output[[0, 0, 2, i]];
            let h = output[[0, 0, 3, i]];

            results.push(BoundingBox::new(
                cx - w / 2.0,
                cy - h / 2.0,
                w,
                h,
                label_for(&self.labels, class_id),
                class_conf * objectness,
            ));
        }

        Ok(results)
    }

    fn model_type(&self) -> ModelType {
        ModelType::YOLOv5s
    }
}
