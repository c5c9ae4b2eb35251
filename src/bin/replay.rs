// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 回放工具 (Replay)
///
/// 读取录制的逐帧候选框 (JSON), 离线执行多帧合并,
/// 输出稳定后的检测框及其屏幕锚点。
use anyhow::Result;
use clap::Parser;
use log::{info, warn};

use archeck::recording::Recording;
use archeck::{BoxTracker, MergeKind, PipelineConfig, ScreenTransform, Tracker};

#[derive(Parser, Debug)]
#[command(author, version, about = "回放录制的检测结果并执行多帧合并", long_about = None)]
struct Args {
    /// 录制文件 (JSON)
    #[arg(short, long)]
    recording: String,

    /// 配置文件, 不存在时创建默认配置
    #[arg(short, long, default_value = "archeck.json")]
    config: String,

    /// 覆盖稳定帧数阈值
    #[arg(long)]
    stability_threshold: Option<u32>,

    /// 关闭空间合并
    #[arg(long, default_value_t = false)]
    no_spatial_merge: bool,

    /// 录制循环次数 (稳定后提前结束)
    #[arg(long, default_value_t = 1)]
    repeat: usize,

    /// 屏幕尺寸 WxH, 用于计算锚点
    #[arg(long, default_value = "1080x1920")]
    screen: String,

    /// 以JSON输出最终保留的框
    #[arg(long, default_value_t = false)]
    json: bool,
}

fn parse_screen(screen: &str) -> Option<(u32, u32)> {
    let (w, h) = screen.split_once('x')?;
    Some((w.trim().parse().ok()?, h.trim().parse().ok()?))
}

/// 达到稳定需要的连续无变化帧数
fn frames_to_stable(threshold: u32) -> u32 {
    threshold.saturating_add(1)
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = PipelineConfig::load(&args.config);
    if let Some(threshold) = args.stability_threshold {
        config.tracker.stability_threshold = threshold;
    }
    if args.no_spatial_merge {
        config.tracker.spatial_merge = false;
    }
    config.print_summary();

    let recording = Recording::load(&args.recording)?;
    info!("读取 {} 帧: {}", recording.len(), args.recording);

    let mut tracker = BoxTracker::new(config.tracker.clone());
    let reports = recording.replay(&mut tracker, args.repeat.max(1));

    let changed = reports
        .iter()
        .filter(|r| r.kind == MergeKind::Changed)
        .count();
    println!("\n========== 回放结果 ==========");
    println!("  合并帧数: {}", reports.len());
    println!("  变化帧数: {}", changed);
    println!("  稳定计数: {}", tracker.stability_counter());
    println!("  状态: {:?}", tracker.state());
    println!("  保留框数: {}", tracker.track_count());

    if !tracker.recognition_finished() {
        warn!(
            "未达到稳定 (需连续 {} 帧无变化)",
            frames_to_stable(config.tracker.stability_threshold)
        );
    }

    if args.json {
        let boxes: Vec<_> = tracker.retained().values().collect();
        println!("{}", serde_json::to_string_pretty(&boxes)?);
        return Ok(());
    }

    let (screen_w, screen_h) = parse_screen(&args.screen).unwrap_or_else(|| {
        warn!("屏幕尺寸格式错误: {}, 使用 1080x1920", args.screen);
        (1080, 1920)
    });
    let transform = ScreenTransform::for_screen(screen_w, screen_h, config.input_size);
    for (id, bbox) in tracker.retained() {
        let (ax, ay) = transform.anchor_point(bbox, screen_h);
        println!("  [{}] {}  锚点 ({:.1}, {:.1})", id, bbox.tag(), ax, ay);
    }

    Ok(())
}
