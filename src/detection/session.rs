// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 逐帧检测会话
//!
//! 每帧: 检测 (推理空闲时) → 用最近一次检测结果做多帧合并。
//! 推理完成前不会再次调度推理, 合并仍使用上一次的结果。
//! 检测稳定后不再推理和合并, 直到 `restart`。
//! `restart` 时正在进行的推理, 其结果在提交时被丢弃。

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::Result;
use image::RgbaImage;
use log::{debug, info};

use super::detector::Detector;
use super::tracker::{BoxTracker, MergeKind, MergeReport, Tracker, TrackerConfig};
use super::types::{BoundingBox, BoxId};
use crate::models::Inference;
use crate::recording::Recording;

pub struct DetectionSession<I: Inference> {
    detector: Detector<I>,
    tracker: BoxTracker,
    latest: Vec<BoundingBox>,
    busy: bool,
    stale: bool, // 当前推理在 restart 之前发起
    frame_counter: u64,
    inference_counter: u64,
    recording: Option<Recording>,
}

impl<I: Inference> DetectionSession<I> {
    pub fn new(detector: Detector<I>, config: TrackerConfig) -> Self {
        Self {
            detector,
            tracker: BoxTracker::new(config),
            latest: Vec::new(),
            busy: false,
            stale: false,
            frame_counter: 0,
            inference_counter: 0,
            recording: None,
        }
    }

    /// 申请一次推理; 上一次推理未完成或已稳定时返回false
    pub fn try_schedule(&mut self) -> bool {
        if self.busy || self.tracker.recognition_finished() {
            return false;
        }
        self.busy = true;
        self.inference_counter += 1;
        debug!("推理开始 {}", self.inference_counter);
        true
    }

    /// 推理完成, 提交本次检测结果
    pub fn submit(&mut self, boxes: Vec<BoundingBox>) {
        self.busy = false;
        if self.stale {
            self.stale = false;
            debug!("丢弃重置前发起的推理结果 ({} 个框)", boxes.len());
            return;
        }
        debug!(
            "推理完成 {}, 检测到 {} 个框",
            self.inference_counter,
            boxes.len()
        );
        if let Some(recording) = self.recording.as_mut() {
            recording.push(boxes.clone());
        }
        self.latest = boxes;
    }

    /// 推理失败或被取消, 释放推理闸门
    pub fn cancel_inference(&mut self) {
        self.busy = false;
        self.stale = false;
    }

    /// 开始录制每次推理提交的检测框
    pub fn start_recording(&mut self) {
        self.recording = Some(Recording::default());
    }

    /// 结束录制并取出录制内容
    pub fn take_recording(&mut self) -> Option<Recording> {
        self.recording.take()
    }

    /// 用最近一次检测结果做一次合并
    pub fn advance(&mut self) -> MergeReport {
        let report = self.tracker.update(&self.latest);
        if report.stable && report.kind != MergeKind::Frozen {
            info!(
                "第 {} 帧检测稳定, 共推理 {} 次",
                self.frame_counter, self.inference_counter
            );
        }
        report
    }

    /// 处理一帧图像
    ///
    /// 推理出错时释放闸门并返回错误, 已保存的框不受影响。
    pub fn on_frame(&mut self, image: &RgbaImage) -> Result<MergeReport> {
        self.frame_counter += 1;
        debug!("第 {} 帧", self.frame_counter);

        if self.try_schedule() {
            match self.detector.detect(image) {
                Ok(boxes) => self.submit(boxes),
                Err(e) => {
                    self.cancel_inference();
                    return Err(e);
                }
            }
        }
        Ok(self.advance())
    }

    pub fn retained(&self) -> &BTreeMap<BoxId, BoundingBox> {
        self.tracker.retained()
    }

    pub fn mark_used(&mut self, id: BoxId) -> bool {
        self.tracker.mark_used(id)
    }

    pub fn recognition_finished(&self) -> bool {
        self.tracker.recognition_finished()
    }

    pub fn stability_counter(&self) -> u32 {
        self.tracker.stability_counter()
    }

    pub fn stable_for(&self) -> Option<Duration> {
        self.tracker.stable_for()
    }

    pub fn is_busy(&self) -> bool {
        self.busy
    }

    pub fn frame_counter(&self) -> u64 {
        self.frame_counter
    }

    pub fn inference_counter(&self) -> u64 {
        self.inference_counter
    }

    pub fn grouping_counter(&self) -> u64 {
        self.tracker.grouping_counter()
    }

    /// 清空所有状态, 重新开始检测
    ///
    /// 推理闸门保持不变: 进行中的推理完成前不会发起新的推理。
    pub fn restart(&mut self) {
        info!("重新开始检测");
        self.tracker.reset();
        self.latest.clear();
        self.stale = self.busy;
        self.frame_counter = 0;
        self.inference_counter = 0;
    }
}
