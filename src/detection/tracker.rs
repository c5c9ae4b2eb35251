// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 多帧检测框合并与稳定判定
//! Temporal/spatial box merging and stability tracking
//!
//! 每帧把新的候选框与已保存的框 (retained set) 合并:
//! 1. 时间合并: 同一物体保留置信度高的框, 新物体直接加入
//! 2. 空间合并: 去掉嵌套的小框, 再按面积做一次NMS
//!
//! 连续若干帧没有任何变化即认为检测已稳定 (`Stable`), 此后冻结,
//! 直到外部调用 `reset`/`restart`。

use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};

use log::{debug, info};
use serde::{Deserialize, Serialize};

use super::types::{BoundingBox, BoxId};
use crate::non_max_suppression_by_area;

// ========== 配置 ==========

/// 跟踪器参数
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub stability_threshold: u32, // 稳定帧数阈值 (严格大于才算稳定)
    pub supersede_margin: f32,    // 新框置信度需高出的幅度
    pub spatial_merge: bool,      // 是否执行空间合并
    pub spatial_iou_threshold: f32,
    pub spatial_max_boxes: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            stability_threshold: 150,
            supersede_margin: 0.05,
            spatial_merge: true,
            spatial_iou_threshold: 0.5,
            spatial_max_boxes: 5,
        }
    }
}

// ========== 状态与结果 ==========

/// 跟踪器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerState {
    /// 持续合并新的检测结果
    Collecting,
    /// 已稳定, 不再合并
    Stable,
}

/// 单帧合并类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeKind {
    /// 已保存集合与候选集合都为空
    Idle,
    /// 首帧: 候选框原样写入
    Bootstrap,
    /// 有新增或替换, 稳定计数清零
    Changed,
    /// 无任何变化, 稳定计数加一
    Steady,
    /// 已处于稳定状态, 未做合并
    Frozen,
}

/// 单帧合并报告
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeReport {
    pub kind: MergeKind,
    pub inserted: usize,   // 新物体
    pub superseded: usize, // 被更高置信度替换的旧框
    pub pruned: usize,     // 空间合并去掉的框
    pub stability_counter: u32,
    pub stable: bool,
}

// ========== 跟踪器统一接口 ==========

/// 逐帧跟踪器 Trait
pub trait Tracker {
    /// 合并一帧候选框, 返回本帧合并结果
    fn update(&mut self, candidates: &[BoundingBox]) -> MergeReport;

    /// 重置跟踪器 (清除所有已保存框, 回到 Collecting)
    fn reset(&mut self);

    /// 获取当前保存的框数量
    fn track_count(&self) -> usize;
}

// ========== 跟踪器实现 ==========

pub struct BoxTracker {
    config: TrackerConfig,
    state: TrackerState,
    retained: BTreeMap<BoxId, BoundingBox>,
    stability_counter: u32,
    stable_since: Option<Instant>,
    grouping_counter: u64,
}

impl Default for BoxTracker {
    fn default() -> Self {
        Self::new(TrackerConfig::default())
    }
}

impl BoxTracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            state: TrackerState::Collecting,
            retained: BTreeMap::new(),
            stability_counter: 0,
            stable_since: None,
            grouping_counter: 0,
        }
    }

    pub fn state(&self) -> TrackerState {
        self.state
    }

    /// 检测是否已稳定 (可以开始放置锚点)
    pub fn recognition_finished(&self) -> bool {
        self.state == TrackerState::Stable
    }

    pub fn stability_counter(&self) -> u32 {
        self.stability_counter
    }

    /// 本轮连续稳定持续的时间 (稳定计数为0时返回None)
    pub fn stable_for(&self) -> Option<Duration> {
        self.stable_since.map(|t| t.elapsed())
    }

    /// 已执行的合并次数 (不含首帧)
    pub fn grouping_counter(&self) -> u64 {
        self.grouping_counter
    }

    /// 当前保存的框 (ID → 框)
    pub fn retained(&self) -> &BTreeMap<BoxId, BoundingBox> {
        &self.retained
    }

    pub fn get(&self, id: BoxId) -> Option<&BoundingBox> {
        self.retained.get(&id)
    }

    /// 下游消费后标记为已使用, ID不存在时返回false
    pub fn mark_used(&mut self, id: BoxId) -> bool {
        match self.retained.get_mut(&id) {
            Some(bbox) => {
                bbox.set_used(true);
                true
            }
            None => false,
        }
    }

    /// 合并一帧候选框
    pub fn merge_frame(&mut self, candidates: &[BoundingBox]) -> MergeReport {
        if self.state == TrackerState::Stable {
            return self.report(MergeKind::Frozen, 0, 0, 0);
        }

        // 首帧: 原样保存, 不计稳定帧
        if self.retained.is_empty() {
            if candidates.is_empty() {
                return self.report(MergeKind::Idle, 0, 0, 0);
            }
            self.retained = candidates.iter().map(|b| (b.id(), b.clone())).collect();
            debug!("首帧保存 {} 个检测框", self.retained.len());
            return self.report(MergeKind::Bootstrap, candidates.len(), 0, 0);
        }

        self.grouping_counter += 1;
        debug!(
            "第 {} 次合并 | 候选: {}, 已保存: {}",
            self.grouping_counter,
            candidates.len(),
            self.retained.len()
        );

        let (merged, inserted, superseded) = self.temporal_merge(candidates);

        let before = merged.len();
        self.retained = if self.config.spatial_merge {
            self.spatial_merge(merged)
        } else {
            merged
        };
        let pruned = before - self.retained.len();

        // 空间合并去掉框也算变化
        let stable_frame = inserted == 0 && superseded == 0 && pruned == 0;
        if stable_frame {
            self.stability_counter = self.stability_counter.saturating_add(1);
            if self.stability_counter == 1 {
                self.stable_since = Some(Instant::now());
            }
        } else {
            self.stability_counter = 0;
            self.stable_since = None;
        }

        if self.stability_counter > self.config.stability_threshold {
            self.state = TrackerState::Stable;
            info!(
                "检测已稳定: 连续 {} 帧无变化, 保留 {} 个框",
                self.stability_counter,
                self.retained.len()
            );
        }

        let kind = if stable_frame {
            MergeKind::Steady
        } else {
            MergeKind::Changed
        };
        self.report(kind, inserted, superseded, pruned)
    }

    /// 时间合并
    ///
    /// 每个候选框与每个已保存框比较, 属于同一物体时保留置信度高的一方
    /// (新框需高出 `supersede_margin`)。没有匹配的候选框作为新物体加入。
    /// 候选框只要输给任一已保存框就不会加入。
    /// 已被替换的旧框不会被之后的比较重新加回。
    fn temporal_merge(
        &self,
        candidates: &[BoundingBox],
    ) -> (BTreeMap<BoxId, BoundingBox>, usize, usize) {
        let mut insertions: Vec<BoundingBox> = Vec::new();
        let mut removals: BTreeSet<BoxId> = BTreeSet::new();
        let mut inserted = 0;

        for candidate in candidates {
            let mut unique = true;
            let mut discarded = false;
            for (id, saved) in &self.retained {
                if !candidate.is_same_object(saved) {
                    continue;
                }
                unique = false;
                if candidate.confidence() > saved.confidence() + self.config.supersede_margin {
                    debug!("替换: {} → {}", saved, candidate);
                    removals.insert(*id);
                } else {
                    // 输给任一已保存框即丢弃, 它替换掉的旧框仍然移除
                    discarded = true;
                }
            }

            if unique {
                debug!("新物体: {}", candidate);
                inserted += 1;
                insertions.push(candidate.clone());
            } else if !discarded {
                insertions.push(candidate.clone());
            }
        }

        let superseded = removals.len();

        // 快照重建, 不在遍历中修改原集合
        let mut merged: BTreeMap<BoxId, BoundingBox> = self
            .retained
            .iter()
            .filter(|(id, _)| !removals.contains(id))
            .map(|(id, bbox)| (*id, bbox.clone()))
            .collect();
        for bbox in insertions {
            let id = bbox.id();
            if !removals.contains(&id) {
                merged.entry(id).or_insert(bbox);
            }
        }

        debug!(
            "时间合并后 {} 个框 (新增 {}, 替换 {})",
            merged.len(),
            inserted,
            superseded
        );
        (merged, inserted, superseded)
    }

    /// 空间合并
    ///
    /// 第一步: 两两比较同一物体的框, 宽和高都严格更大的一方保留,
    /// 互不占优时都保留。第二步: 按面积做NMS并限制数量。
    fn spatial_merge(&self, merged: BTreeMap<BoxId, BoundingBox>) -> BTreeMap<BoxId, BoundingBox> {
        let boxes: Vec<BoundingBox> = merged.into_values().collect();
        let mut discarded = vec![false; boxes.len()];

        for i in 0..boxes.len() {
            for j in (i + 1)..boxes.len() {
                if discarded[i] || discarded[j] {
                    continue;
                }
                let (a, b) = (&boxes[i], &boxes[j]);
                if !a.is_same_object(b) {
                    continue;
                }
                if a.width() > b.width() && a.height() > b.height() {
                    discarded[j] = true;
                } else if b.width() > a.width() && b.height() > a.height() {
                    discarded[i] = true;
                }
            }
        }

        let mut survivors: Vec<BoundingBox> = boxes
            .into_iter()
            .zip(discarded)
            .filter(|(_, discarded)| !discarded)
            .map(|(bbox, _)| bbox)
            .collect();

        non_max_suppression_by_area(
            &mut survivors,
            self.config.spatial_iou_threshold,
            self.config.spatial_max_boxes,
        );

        debug!("空间合并后 {} 个框", survivors.len());
        survivors.into_iter().map(|b| (b.id(), b)).collect()
    }

    /// 清空所有状态, 回到 Collecting
    pub fn restart(&mut self) {
        debug!("重置跟踪器, 清除 {} 个框", self.retained.len());
        self.retained.clear();
        self.state = TrackerState::Collecting;
        self.stability_counter = 0;
        self.stable_since = None;
        self.grouping_counter = 0;
    }

    fn report(
        &self,
        kind: MergeKind,
        inserted: usize,
        superseded: usize,
        pruned: usize,
    ) -> MergeReport {
        MergeReport {
            kind,
            inserted,
            superseded,
            pruned,
            stability_counter: self.stability_counter,
            stable: self.recognition_finished(),
        }
    }
}

impl Tracker for BoxTracker {
    fn update(&mut self, candidates: &[BoundingBox]) -> MergeReport {
        self.merge_frame(candidates)
    }

    fn reset(&mut self) {
        self.restart();
    }

    fn track_count(&self) -> usize {
        self.retained.len()
    }
}
