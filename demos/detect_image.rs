use anyhow::{Context, Result};
use lib::annotate::{find_font, FrameAnnotator};
use lib::yolo::model::YoloDetector;
use lib::yolo::DetectionModel;

/// Run the detector and the counter over a single image.
///
/// `cargo run --example detect_image -- <image> [model]`
fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut args = std::env::args().skip(1);
    let image_path = args.next().context("usage: detect_image <image> [model]")?;
    let model_path = args.next().unwrap_or_else(|| "yolov8s.onnx".to_string());

    let mut detector = YoloDetector::new(&model_path, 0.25, 0.7)?;

    println!("读取图片...");
    let img = image::open(&image_path)
        .with_context(|| format!("open {}", image_path))?
        .to_rgb8();

    println!("开始检测...");
    let detections = detector.infer(&img)?;

    println!("检测到 {} 个目标:", detections.len());
    for d in &detections {
        println!(
            "目标: {}, 置信度: {:.2}%, 坐标: ({}, {}) - ({}, {})",
            d.label,
            d.confidence * 100.0,
            d.x1,
            d.y1,
            d.x2,
            d.y2
        );
    }

    let annotator = FrameAnnotator::new(find_font(None));
    let (_, counts) = annotator.annotate(img, &detections);
    println!("People: {}, Vehicles: {}", counts.people, counts.vehicles);
    Ok(())
}
