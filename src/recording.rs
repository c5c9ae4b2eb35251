// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 候选框录制
//!
//! 按帧保存检测器输出 (NMS之后), 供 `replay` 离线重放多帧合并。

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::detection::{BoundingBox, MergeReport, Tracker};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Recording {
    pub frames: Vec<Vec<BoundingBox>>,
}

impl Recording {
    pub fn push(&mut self, frame: Vec<BoundingBox>) {
        self.frames.push(frame);
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path)
            .with_context(|| format!("读取录制文件失败: {}", path.display()))?;
        serde_json::from_str(&json)
            .with_context(|| format!("解析录制文件失败: {}", path.display()))
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string(self).context("序列化录制失败")?;
        fs::write(path, json).with_context(|| format!("写入录制文件失败: {}", path.display()))
    }

    /// 逐帧送入跟踪器, 返回每帧的合并报告
    ///
    /// `repeat` 为循环次数, 跟踪器稳定后提前结束。
    pub fn replay<T: Tracker>(&self, tracker: &mut T, repeat: usize) -> Vec<MergeReport> {
        let mut reports = Vec::new();
        'outer: for _ in 0..repeat {
            for frame in &self.frames {
                let report = tracker.update(frame);
                reports.push(report);
                if report.stable {
                    break 'outer;
                }
            }
        }
        reports
    }
}
