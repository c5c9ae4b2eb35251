// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 流水线配置 - 通过JSON文件调整参数

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::detection::{TrackerConfig, INPUT_SIZE};
use crate::models::yolov3_tiny::default_grids;
use crate::models::{default_labels, GridParams, ModelType, YOLOv5sConfig, YoloGridConfig};

/// 流水线参数配置
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    // === 模型 ===
    pub model: ModelType,
    pub input_size: u32,
    pub labels: Vec<String>,
    /// 锚框表, 为空时使用模型默认值
    pub anchors: Vec<f32>,
    pub grids: Vec<GridParams>,

    // === 检测参数 ===
    pub detection_conf_threshold: f32, // 检测置信度阈值
    pub nms_iou_threshold: f32,        // NMS IOU阈值
    pub max_detections: usize,         // 每帧最多保留框数
    pub min_box_area_ratio: f32,       // 最小面积占比, 0 表示不过滤
    pub objectness_floor: f32,         // YOLOv5s objectness下限

    // === 多帧稳定 ===
    pub tracker: TrackerConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let model = ModelType::YOLOv3Tiny;
        Self {
            model,
            input_size: INPUT_SIZE,
            labels: default_labels(),
            anchors: Vec::new(),
            grids: default_grids(),

            detection_conf_threshold: model.default_conf_threshold(),
            nms_iou_threshold: model.default_iou_threshold(),
            max_detections: 5,
            min_box_area_ratio: 0.07,
            objectness_floor: 0.35,

            tracker: TrackerConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// 从JSON文件加载配置
    ///
    /// 文件不存在时写出默认配置, 解析失败时使用默认值。
    pub fn load<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(json) => match Self::from_json(&json) {
                Ok(config) => {
                    info!("配置已从 {} 加载", path.display());
                    config
                }
                Err(e) => {
                    warn!("配置文件解析失败: {:#}, 使用默认值", e);
                    Self::default()
                }
            },
            Err(_) => {
                info!("配置文件不存在, 创建默认配置: {}", path.display());
                let config = Self::default();
                if let Err(e) = config.save(path) {
                    warn!("{:#}", e);
                }
                config
            }
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("解析配置JSON失败")
    }

    /// 保存配置到JSON文件
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self).context("序列化配置失败")?;
        fs::write(path, json).with_context(|| format!("保存配置失败: {}", path.display()))?;
        info!("配置已保存到 {}", path.display());
        Ok(())
    }

    pub fn class_count(&self) -> usize {
        self.labels.len()
    }

    /// 网格解码参数 (YOLOv3-tiny / YOLOv4-tiny)
    pub fn grid_config(&self) -> YoloGridConfig {
        let anchors = if self.anchors.is_empty() {
            self.model
                .anchors()
                .map(|a| a.to_vec())
                .unwrap_or_default()
        } else {
            self.anchors.clone()
        };
        YoloGridConfig {
            class_count: self.class_count(),
            boxes_per_cell: 3,
            anchors,
            grids: self.grids.clone(),
            conf_threshold: self.detection_conf_threshold,
        }
    }

    pub fn yolov5s_config(&self) -> YOLOv5sConfig {
        YOLOv5sConfig {
            class_count: self.class_count(),
            objectness_floor: self.objectness_floor,
        }
    }

    /// 打印当前配置
    pub fn print_summary(&self) {
        println!("\n当前流水线配置:");
        println!("  模型: {:?} ({}x{})", self.model, self.input_size, self.input_size);
        println!("  类别数: {}", self.class_count());
        println!("  检测置信度: {:.2}", self.detection_conf_threshold);
        println!(
            "  NMS IOU: {:.2}, 最多 {} 个框",
            self.nms_iou_threshold, self.max_detections
        );
        println!("  最小面积占比: {:.2}", self.min_box_area_ratio);
        println!("  稳定帧数阈值: {}", self.tracker.stability_threshold);
        println!("  替换置信度差: {:.2}", self.tracker.supersede_margin);
        println!(
            "  空间合并: {} (IOU {:.2}, 最多 {} 个框)\n",
            self.tracker.spatial_merge,
            self.tracker.spatial_iou_threshold,
            self.tracker.spatial_max_boxes
        );
    }
}
