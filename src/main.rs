use anyhow::{Context, Result};
use clap::Parser;
use lib::annotate::{find_font, FrameAnnotator};
use lib::capture;
use lib::config::{AppConfig, Cli};
use lib::display::{DisplaySink, HeadlessDisplay, WindowDisplay};
use lib::pipeline::Pipeline;
use lib::yolo::download::ensure_model;
use lib::yolo::model::YoloDetector;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = AppConfig::load(&cli)?;
    log::debug!("config {:#?}", config);

    let model_path = ensure_model(&config.model, config.model_url.as_deref())?;
    let detector = YoloDetector::new(&model_path, config.model_conf, config.iou)?;

    // 打不开摄像头直接退出
    let source = capture::open_source(&config.source, config.width, config.height)
        .with_context(|| format!("could not open source {}", config.source))?;

    let display: Box<dyn DisplaySink> = if config.headless {
        Box::new(HeadlessDisplay::new())
    } else {
        Box::new(WindowDisplay::new(config.window_title.clone()))
    };
    let annotator = FrameAnnotator::new(find_font(config.font.as_deref()));

    let mut pipeline = Pipeline::new(source, detector, display, annotator);
    pipeline.run()?;
    Ok(())
}
