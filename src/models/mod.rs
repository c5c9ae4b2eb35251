// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 模型输出解码
///
/// # 架构说明
///
/// 推理本身由外部执行器完成 (见 [`Inference`]), 本模块只负责:
/// - **YOLO网格解码**: YOLOv3-tiny / YOLOv4-tiny, 两个分辨率的网格
///   - 文件: `yolov3_tiny.rs`
/// - **单阶段解码**: YOLOv5s, 每个输出槽位一个候选框
///   - 文件: `yolov5s.rs`
///
/// ## 核心流程
/// ```text
/// 原始输出 [Array<f32, IxDyn>] → Postprocessor::postprocess → Vec<BoundingBox>
/// ```
use std::path::Path;

use anyhow::{Context, Result};
use ndarray::{Array, IxDyn};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::PipelineConfig;
use crate::detection::BoundingBox;

pub mod yolov3_tiny; // YOLOv3-tiny / YOLOv4-tiny 网格解码
pub mod yolov5s; // YOLOv5s 单阶段解码

pub use yolov3_tiny::{
    GridParams, YoloGridConfig, YoloGridPostprocessor, YOLOV3_TINY_ANCHORS, YOLOV4_TINY_ANCHORS,
};
pub use yolov5s::{YOLOv5sConfig, YOLOv5sPostprocessor};

/// 默认类别表 (家具/电器, 共11类)
pub const DEFAULT_LABELS: [&str; 11] = [
    "Box",
    "Monitor",
    "Refrigerator",
    "Microwave Oven",
    "Television",
    "Door",
    "Bed",
    "Humidifier",
    "Printer",
    "Drawer",
    "PC",
];

/// 模型类型枚举
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelType {
    /// YOLOv3-tiny, 13x13 + 26x26 两个网格
    #[serde(rename = "yolov3-tiny")]
    YOLOv3Tiny,
    /// YOLOv4-tiny, 网格结构同v3-tiny, 锚框不同
    #[serde(rename = "yolov4-tiny")]
    YOLOv4Tiny,
    /// YOLOv5s 单阶段输出
    #[serde(rename = "yolov5s")]
    YOLOv5s,
}

impl ModelType {
    /// 从模型路径推断模型类型
    pub fn from_path(path: &str) -> Self {
        let path = path.to_ascii_lowercase();
        if path.contains("yolov5") || path.contains("v5s") {
            ModelType::YOLOv5s
        } else if path.contains("yolov4") || path.contains("v4-tiny") {
            ModelType::YOLOv4Tiny
        } else {
            ModelType::YOLOv3Tiny
        }
    }

    /// 获取模型推荐的置信度阈值
    pub fn default_conf_threshold(&self) -> f32 {
        0.5
    }

    /// 获取模型推荐的IOU阈值
    pub fn default_iou_threshold(&self) -> f32 {
        0.5
    }

    /// 模型对应的锚框表 (6对 w,h), YOLOv5s无锚框
    pub fn anchors(&self) -> Option<&'static [f32; 12]> {
        match self {
            ModelType::YOLOv3Tiny => Some(&YOLOV3_TINY_ANCHORS),
            ModelType::YOLOv4Tiny => Some(&YOLOV4_TINY_ANCHORS),
            ModelType::YOLOv5s => None,
        }
    }
}

/// 后处理器统一接口
///
/// 输入为推理执行器的原始输出, 输出为检测器输入坐标系下的检测框 (未做NMS)。
pub trait Postprocessor {
    fn postprocess(&self, outputs: &[Array<f32, IxDyn>]) -> Result<Vec<BoundingBox>>;

    fn model_type(&self) -> ModelType;
}

/// 推理执行器接口 (外部提供, 例如 ONNX Runtime / Barracuda 等)
///
/// 输入为 NHWC 张量 `[1, H, W, 3]`, 返回模型全部输出。
pub trait Inference {
    fn run(&mut self, input: Array<f32, IxDyn>) -> Result<Vec<Array<f32, IxDyn>>>;
}

impl<F> Inference for F
where
    F: FnMut(Array<f32, IxDyn>) -> Result<Vec<Array<f32, IxDyn>>>,
{
    fn run(&mut self, input: Array<f32, IxDyn>) -> Result<Vec<Array<f32, IxDyn>>> {
        self(input)
    }
}

/// 按配置构建后处理器
pub fn build_postprocessor(config: &PipelineConfig) -> Box<dyn Postprocessor> {
    match config.model {
        ModelType::YOLOv3Tiny | ModelType::YOLOv4Tiny => Box::new(YoloGridPostprocessor::new(
            config.grid_config(),
            config.labels.clone(),
            config.model,
        )),
        ModelType::YOLOv5s => Box::new(YOLOv5sPostprocessor::new(
            config.yolov5s_config(),
            config.labels.clone(),
        )),
    }
}

// ========== 数值工具 ==========

pub fn sigmoid(value: f32) -> f32 {
    1.0 / (1.0 + (-value).exp())
}

/// softmax (先减去最大值)
pub fn softmax(values: &[f32]) -> Vec<f32> {
    let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exp: Vec<f32> = values.iter().map(|v| (v - max).exp()).collect();
    let sum: f32 = exp.iter().sum();
    exp.into_iter().map(|v| v / sum).collect()
}

/// 最大值及其下标, 相同取第一个; 空切片返回None
pub fn top_result(values: &[f32]) -> Option<(usize, f32)> {
    values
        .iter()
        .copied()
        .enumerate()
        .fold(None, |best, (i, v)| match best {
            Some((_, b)) if v <= b => best,
            _ => Some((i, v)),
        })
}

/// 类别名称, 下标越界时返回 "class_{i}"
pub(crate) fn label_for(labels: &[String], index: usize) -> String {
    labels
        .get(index)
        .cloned()
        .unwrap_or_else(|| format!("class_{index}"))
}

// ========== 类别标签 ==========

static LINE_BREAK: Lazy<Regex> = Lazy::new(|| Regex::new(r"\r\n|\n|\r").expect("换行正则"));

/// 解析标签文本: 按换行切分, 去掉空行
pub fn parse_labels(text: &str) -> Vec<String> {
    LINE_BREAK
        .split(text)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// 读取标签文件
pub fn load_labels<P: AsRef<Path>>(path: P) -> Result<Vec<String>> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("读取标签文件失败: {}", path.display()))?;
    Ok(parse_labels(&text))
}

pub fn default_labels() -> Vec<String> {
    DEFAULT_LABELS.iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_model_type_from_path() {
        assert_eq!(ModelType::from_path("models/yolov5s.onnx"), ModelType::YOLOv5s);
        assert_eq!(ModelType::from_path("YOLOv4-tiny.onnx"), ModelType::YOLOv4Tiny);
        assert_eq!(ModelType::from_path("yolov3-tiny.onnx"), ModelType::YOLOv3Tiny);
        assert_eq!(ModelType::from_path("custom.onnx"), ModelType::YOLOv3Tiny);
        assert!(ModelType::YOLOv5s.anchors().is_none());
        assert_eq!(ModelType::YOLOv4Tiny.anchors().map(|a| a[0]), Some(69.0));
    }

    #[test]
    fn test_model_type_serde_names() {
        let json = serde_json::to_string(&ModelType::YOLOv3Tiny).unwrap();
        assert_eq!(json, "\"yolov3-tiny\"");
        let back: ModelType = serde_json::from_str("\"yolov5s\"").unwrap();
        assert_eq!(back, ModelType::YOLOv5s);
    }

    #[test]
    fn test_sigmoid_and_softmax() {
        assert_abs_diff_eq!(sigmoid(0.0), 0.5);
        assert!(sigmoid(-1000.0) >= 0.0);
        assert_abs_diff_eq!(sigmoid(1000.0), 1.0);

        let probs = softmax(&[1.0, 2.0, 3.0]);
        assert_abs_diff_eq!(probs.iter().sum::<f32>(), 1.0, epsilon = 1e-6);
        assert!(probs[2] > probs[1] && probs[1] > probs[0]);

        // 大数值不溢出
        let probs = softmax(&[1000.0, 1000.0]);
        assert_abs_diff_eq!(probs[0], 0.5, epsilon = 1e-6);
    }

    #[test]
    fn test_top_result_first_max_wins() {
        assert_eq!(top_result(&[0.1, 0.7, 0.7, 0.2]), Some((1, 0.7)));
        assert_eq!(top_result(&[]), None);
    }

    #[test]
    fn test_parse_labels() {
        let labels = parse_labels("Box\r\nMonitor\n\nBed\rPC\n");
        assert_eq!(labels, ["Box", "Monitor", "Bed", "PC"]);
        assert_eq!(default_labels().len(), 11);
        assert_eq!(label_for(&labels, 9), "class_9");
    }
}
