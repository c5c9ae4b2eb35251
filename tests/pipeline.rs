// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

use anyhow::Result;
use approx::assert_abs_diff_eq;
use image::RgbaImage;
use ndarray::{Array, IxDyn};

use archeck::detection::MergeKind;
use archeck::models::{ModelType, DEFAULT_LABELS};
use archeck::recording::Recording;
use archeck::{BoxTracker, DetectionSession, Detector, PipelineConfig, TrackerConfig};

const CLASSES: usize = 11;
const BOX_CHANNELS: usize = CLASSES + 5;

/// 单个目标: (网格尺寸, 行, 列, 锚框序号, tw, class)
struct Target {
    grid: usize,
    row: usize,
    col: usize,
    anchor: usize,
    tw: f32,
    class: usize,
}

fn grid_outputs(targets: &[Target]) -> Vec<Array<f32, IxDyn>> {
    [13usize, 26]
        .iter()
        .map(|&size| {
            let mut map = Array::zeros(IxDyn(&[1, size, size, 3 * BOX_CHANNELS]));
            for row in 0..size {
                for col in 0..size {
                    for b in 0..3 {
                        map[[0, row, col, b * BOX_CHANNELS + 4]] = -20.0;
                    }
                }
            }
            for t in targets.iter().filter(|t| t.grid == size) {
                let ch = t.anchor * BOX_CHANNELS;
                map[[0, t.row, t.col, ch + 2]] = t.tw;
                map[[0, t.row, t.col, ch + 3]] = t.tw;
                map[[0, t.row, t.col, ch + 4]] = 8.0;
                map[[0, t.row, t.col, ch + 5 + t.class]] = 8.0;
            }
            map
        })
        .collect()
}

fn scene() -> Vec<Array<f32, IxDyn>> {
    grid_outputs(&[
        // 13x13 中心大框: Bed
        Target {
            grid: 13,
            row: 6,
            col: 6,
            anchor: 2,
            tw: 0.0,
            class: 6,
        },
        // 26x26 左上角: Monitor, 尺寸 x2
        Target {
            grid: 26,
            row: 1,
            col: 3,
            anchor: 0,
            tw: std::f32::consts::LN_2,
            class: 1,
        },
        // 面积过小, 被过滤
        Target {
            grid: 26,
            row: 20,
            col: 20,
            anchor: 0,
            tw: -1.0,
            class: 0,
        },
    ])
}

#[test]
fn test_grid_decoding_through_detector() {
    let config = PipelineConfig::default();
    let outputs = scene();
    let engine =
        move |_: Array<f32, IxDyn>| -> Result<Vec<Array<f32, IxDyn>>> { Ok(outputs.clone()) };
    let mut detector = Detector::new(engine, &config);

    let boxes = detector.detect(&RgbaImage::new(416, 416)).unwrap();
    let mut labels: Vec<_> = boxes.iter().map(|b| b.label()).collect();
    labels.sort();
    assert_eq!(labels, ["Bed", "Monitor"]);

    let bed = boxes.iter().find(|b| b.label() == "Bed").unwrap();
    assert_abs_diff_eq!(bed.width(), 344.0, epsilon = 1e-2);
    assert_abs_diff_eq!(bed.height(), 319.0, epsilon = 1e-2);
    assert_abs_diff_eq!(bed.center().0, 208.0, epsilon = 1e-2);

    let monitor = boxes.iter().find(|b| b.label() == "Monitor").unwrap();
    assert_abs_diff_eq!(monitor.width(), 162.0, epsilon = 1e-2);
    assert_abs_diff_eq!(monitor.center().0, 56.0, epsilon = 1e-2);
    assert_abs_diff_eq!(monitor.center().1, 24.0, epsilon = 1e-2);

    let stats = detector.last_stats();
    assert_eq!(stats.candidates, 3);
    assert_eq!(stats.kept, 2);
}

#[test]
fn test_session_converges_and_freezes() {
    let config = PipelineConfig {
        tracker: TrackerConfig {
            stability_threshold: 3,
            ..Default::default()
        },
        ..Default::default()
    };
    let outputs = scene();
    let engine =
        move |_: Array<f32, IxDyn>| -> Result<Vec<Array<f32, IxDyn>>> { Ok(outputs.clone()) };
    let mut session =
        DetectionSession::new(Detector::new(engine, &config), config.tracker.clone());

    let frame = RgbaImage::new(416, 416);
    let first = session.on_frame(&frame).unwrap();
    assert_eq!(first.kind, MergeKind::Bootstrap);
    for _ in 0..3 {
        assert_eq!(session.on_frame(&frame).unwrap().kind, MergeKind::Steady);
    }
    assert!(session.on_frame(&frame).unwrap().stable);
    assert!(session.recognition_finished());
    assert_eq!(session.retained().len(), 2);
    assert_eq!(session.inference_counter(), 5);

    // 稳定后不再推理
    assert_eq!(session.on_frame(&frame).unwrap().kind, MergeKind::Frozen);
    assert_eq!(session.inference_counter(), 5);
    assert_eq!(session.frame_counter(), 6);

    let id = *session.retained().keys().next().unwrap();
    assert!(session.mark_used(id));
    assert!(session.retained()[&id].used());

    session.restart();
    assert!(session.retained().is_empty());
    assert_eq!(session.on_frame(&frame).unwrap().kind, MergeKind::Bootstrap);
}

#[test]
fn test_yolov4_tiny_uses_its_anchors() {
    let config = PipelineConfig {
        model: ModelType::YOLOv4Tiny,
        min_box_area_ratio: 0.0,
        ..Default::default()
    };
    let outputs = grid_outputs(&[Target {
        grid: 13,
        row: 6,
        col: 6,
        anchor: 0,
        tw: 0.0,
        class: 10,
    }]);
    let engine = |_: Array<f32, IxDyn>| -> Result<Vec<Array<f32, IxDyn>>> { Ok(Vec::new()) };
    let mut detector = Detector::new(engine, &config);
    let boxes = detector.detect_outputs(&outputs).unwrap();
    assert_eq!(boxes.len(), 1);
    assert_eq!(boxes[0].label(), DEFAULT_LABELS[10]);
    // v4-tiny 第3个锚框 332x129
    assert_abs_diff_eq!(boxes[0].width(), 332.0, epsilon = 1e-2);
    assert_abs_diff_eq!(boxes[0].height(), 129.0, epsilon = 1e-2);
}

#[test]
fn test_recording_replay_with_config_from_disk() {
    let dir = std::env::temp_dir();
    let config_path = dir.join(format!("archeck_it_config_{}.json", std::process::id()));
    let recording_path = dir.join(format!("archeck_it_rec_{}.json", std::process::id()));

    let mut config = PipelineConfig::default();
    config.tracker.stability_threshold = 4;
    config.save(&config_path).unwrap();

    let config_json = r#"{"stability_threshold": 4}"#;
    let tracker_config: TrackerConfig = serde_json::from_str(config_json).unwrap();
    assert_eq!(tracker_config, config.tracker);

    let json = r#"{"frames": [
        [{"x": 10, "y": 10, "width": 200, "height": 200, "label": "Bed", "confidence": 0.6}],
        [{"x": 12, "y": 12, "width": 198, "height": 198, "label": "Bed", "confidence": 0.9},
         {"x": 300, "y": 300, "width": 100, "height": 100, "label": "PC", "confidence": 0.7}],
        [{"x": 11, "y": 11, "width": 199, "height": 199, "label": "Bed", "confidence": 0.8}]
    ]}"#;
    std::fs::write(&recording_path, json).unwrap();

    let loaded = PipelineConfig::load(&config_path);
    let recording = Recording::load(&recording_path).unwrap();
    assert_eq!(recording.len(), 3);

    let mut tracker = BoxTracker::new(loaded.tracker.clone());
    let reports = recording.replay(&mut tracker, 10);
    assert!(reports.last().unwrap().stable);
    assert_eq!(tracker.retained().len(), 2);
    let best = tracker
        .retained()
        .values()
        .find(|b| b.label() == "Bed")
        .unwrap();
    assert_eq!(best.confidence(), 0.9);

    std::fs::remove_file(&config_path).unwrap();
    std::fs::remove_file(&recording_path).unwrap();
}
