// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 检测器: 预处理 → 推理 → 解码 → NMS → 面积过滤

use std::time::Instant;

use anyhow::{Context, Result};
use image::RgbaImage;
use log::debug;
use ndarray::{Array, IxDyn};

use super::types::BoundingBox;
use crate::config::PipelineConfig;
use crate::models::{build_postprocessor, Inference, ModelType, Postprocessor};
use crate::preprocess::transform_input;
use crate::{filter_small_boxes, non_max_suppression};

/// 单帧检测耗时与数量统计
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DetectionStats {
    pub preprocess_ms: f64,
    pub inference_ms: f64,
    pub parse_ms: f64,
    pub nms_ms: f64,
    pub candidates: usize, // 解码得到的框数
    pub kept: usize,       // NMS与面积过滤后保留的框数
}

pub struct Detector<I: Inference> {
    engine: I,
    postprocessor: Box<dyn Postprocessor>,
    input_size: u32,
    nms_iou_threshold: f32,
    max_detections: usize,
    min_box_area_ratio: f32,
    last_stats: DetectionStats,
}

impl<I: Inference> Detector<I> {
    pub fn new(engine: I, config: &PipelineConfig) -> Self {
        Self::with_postprocessor(engine, build_postprocessor(config), config)
    }

    pub fn with_postprocessor(
        engine: I,
        postprocessor: Box<dyn Postprocessor>,
        config: &PipelineConfig,
    ) -> Self {
        debug!(
            "检测器: {:?}, 输入 {}x{}",
            postprocessor.model_type(),
            config.input_size,
            config.input_size
        );
        Self {
            engine,
            postprocessor,
            input_size: config.input_size,
            nms_iou_threshold: config.nms_iou_threshold,
            max_detections: config.max_detections,
            min_box_area_ratio: config.min_box_area_ratio,
            last_stats: DetectionStats::default(),
        }
    }

    /// 完整检测流程
    pub fn detect(&mut self, image: &RgbaImage) -> Result<Vec<BoundingBox>> {
        let t_pre = Instant::now();
        let input = transform_input(image, self.input_size)?;
        let preprocess_ms = t_pre.elapsed().as_secs_f64() * 1000.0;

        let t_infer = Instant::now();
        let outputs = self.engine.run(input).context("推理失败")?;
        let inference_ms = t_infer.elapsed().as_secs_f64() * 1000.0;

        let boxes = self.detect_outputs(&outputs)?;
        self.last_stats.preprocess_ms = preprocess_ms;
        self.last_stats.inference_ms = inference_ms;
        Ok(boxes)
    }

    /// 跳过推理, 直接处理模型原始输出
    pub fn detect_outputs(&mut self, outputs: &[Array<f32, IxDyn>]) -> Result<Vec<BoundingBox>> {
        let t_parse = Instant::now();
        let mut boxes = self.postprocessor.postprocess(outputs)?;
        let parse_ms = t_parse.elapsed().as_secs_f64() * 1000.0;
        let candidates = boxes.len();

        let t_nms = Instant::now();
        non_max_suppression(&mut boxes, self.nms_iou_threshold, self.max_detections);
        filter_small_boxes(
            &mut boxes,
            self.min_box_area_ratio,
            self.input_size,
            self.input_size,
        );
        let nms_ms = t_nms.elapsed().as_secs_f64() * 1000.0;

        self.last_stats = DetectionStats {
            preprocess_ms: 0.0,
            inference_ms: 0.0,
            parse_ms,
            nms_ms,
            candidates,
            kept: boxes.len(),
        };
        debug!(
            "解码 {} 个框, 保留 {} 个 | 解码 {:.2}ms NMS {:.2}ms",
            candidates,
            boxes.len(),
            parse_ms,
            nms_ms
        );
        Ok(boxes)
    }

    pub fn last_stats(&self) -> DetectionStats {
        self.last_stats
    }

    pub fn model_type(&self) -> ModelType {
        self.postprocessor.model_type()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;

    struct FixedOutputs(Vec<Array<f32, IxDyn>>);

    impl Inference for FixedOutputs {
        fn run(&mut self, input: Array<f32, IxDyn>) -> Result<Vec<Array<f32, IxDyn>>> {
            assert_eq!(input.shape(), &[1, 416, 416, 3]);
            Ok(self.0.clone())
        }
    }

    /// YOLOv5s输出: 两个重叠的大框 + 一个过小的框
    fn yolov5s_outputs() -> Vec<Array<f32, IxDyn>> {
        let slots = [
            [200.0, 200.0, 200.0, 200.0, 0.9, 0.9],
            [205.0, 205.0, 200.0, 200.0, 0.8, 0.9],
            [50.0, 50.0, 20.0, 20.0, 0.9, 0.9],
        ];
        let channels = 5 + 11;
        let mut t = Array::zeros(IxDyn(&[1, 1, channels, slots.len()]));
        for (i, s) in slots.iter().enumerate() {
            for ch in 0..5 {
                t[[0, 0, ch, i]] = s[ch];
            }
            t[[0, 0, 5, i]] = s[5];
        }
        vec![t]
    }

    fn config() -> PipelineConfig {
        PipelineConfig {
            model: crate::models::ModelType::YOLOv5s,
            ..Default::default()
        }
    }

    #[test]
    fn test_detect_runs_full_pipeline() {
        let mut detector = Detector::new(FixedOutputs(yolov5s_outputs()), &config());
        let boxes = detector.detect(&RgbaImage::new(416, 416)).unwrap();
        assert_eq!(boxes.len(), 1);
        assert_eq!(boxes[0].label(), "Box");
        assert_eq!(detector.model_type(), crate::models::ModelType::YOLOv5s);

        let stats = detector.last_stats();
        assert_eq!(stats.candidates, 3);
        assert_eq!(stats.kept, 1);
    }

    #[test]
    fn test_wrong_image_size_is_error() {
        let mut detector = Detector::new(FixedOutputs(yolov5s_outputs()), &config());
        assert!(detector.detect(&RgbaImage::new(100, 100)).is_err());
    }

    #[test]
    fn test_inference_error_propagates() {
        let engine = |_: Array<f32, IxDyn>| -> Result<Vec<Array<f32, IxDyn>>> {
            bail!("device lost")
        };
        let mut detector = Detector::new(engine, &config());
        let err = detector.detect(&RgbaImage::new(416, 416)).unwrap_err();
        assert!(format!("{err:#}").contains("device lost"));
    }
}
