mod args;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use std::time::Instant;

use yolo_v3_eval::config::read_class_names;
use yolo_v3_eval::detector::PredictionArchive;
use yolo_v3_eval::evaluation::Evaluator;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = args::Args::parse();

    let class_names = read_class_names(&args.classes)
        .with_context(|| format!("failed to read class names from {}", args.classes.display()))?;
    let config = args.to_config(class_names);

    info!("model: {}", if args.full { "yolov3" } else { "yolov3-tiny" });
    info!("input size: {}", config.input_size);
    info!("score threshold: {}, iou threshold: {}", config.score_threshold, config.iou_threshold);

    let archive = PredictionArchive::open(
        &args.predictions,
        &config.anchors,
        config.input_size,
        config.num_classes(),
    )
        .with_context(|| format!("failed to open {}", args.predictions.display()))?;

    let mut evaluator = Evaluator::new(config, archive)?;

    let start = Instant::now();
    let summary = evaluator
        .run(&args.annotation_path)
        .with_context(|| format!("evaluation of {} failed", args.annotation_path.display()))?;

    let t = start.elapsed().as_secs_f64();
    info!(
        "done: {} images in {:.1}s ({} skipped, {} predictions)",
        summary.images, t, summary.skipped, summary.predicted_boxes
    );

    Ok(())
}
