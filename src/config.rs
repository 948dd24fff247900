use anyhow::{Context, Result};
use clap::Parser;
use ::config::{Config, Environment, File};
use serde::Deserialize;
use std::path::PathBuf;

const DEFAULT_MODEL: &str = "yolov8s.onnx";
const DEFAULT_SOURCE: &str = "0";
const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;
const DEFAULT_MODEL_CONF: f32 = 0.25;
const DEFAULT_IOU: f32 = 0.7;
const DEFAULT_WINDOW_TITLE: &str = "frame";

#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Count people and vehicles in a live camera feed")]
pub struct Cli {
    /// TOML config file; flags below override it
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// YOLOv8 ONNX model
    #[arg(long)]
    pub model: Option<PathBuf>,
    /// Where to download the model from when it is not on disk
    #[arg(long)]
    pub model_url: Option<String>,
    /// Camera index or device path, image directory, or stub://[frames]
    #[arg(long)]
    pub source: Option<String>,
    /// TrueType font for labels
    #[arg(long)]
    pub font: Option<PathBuf>,
    #[arg(long)]
    pub width: Option<u32>,
    #[arg(long)]
    pub height: Option<u32>,
    /// Score floor inside the detector, before the counting threshold
    #[arg(long)]
    pub model_conf: Option<f32>,
    /// NMS IoU threshold
    #[arg(long)]
    pub iou: Option<f32>,
    /// Run without a window
    #[arg(long)]
    pub headless: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub model: PathBuf,
    pub model_url: Option<String>,
    pub source: String,
    pub font: Option<PathBuf>,
    pub width: u32,
    pub height: u32,
    pub model_conf: f32,
    pub iou: f32,
    pub headless: bool,
    pub window_title: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            model: PathBuf::from(DEFAULT_MODEL),
            model_url: None,
            source: DEFAULT_SOURCE.to_string(),
            font: None,
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            model_conf: DEFAULT_MODEL_CONF,
            iou: DEFAULT_IOU,
            headless: false,
            window_title: DEFAULT_WINDOW_TITLE.to_string(),
        }
    }
}

impl AppConfig {
    /// Defaults, then the config file, then `YOLO_COUNTER_*` variables, then flags.
    pub fn load(cli: &Cli) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = &cli.config {
            builder = builder.add_source(File::from(path.as_path()));
        }
        let config: AppConfig = builder
            .add_source(Environment::with_prefix("YOLO_COUNTER"))
            .build()
            .context("read config")?
            .try_deserialize()
            .context("parse config")?;

        let config = config.merge_cli(cli);
        config.validate()?;
        Ok(config)
    }

    fn merge_cli(mut self, cli: &Cli) -> Self {
        if let Some(model) = &cli.model {
            self.model = model.clone();
        }
        if let Some(url) = &cli.model_url {
            self.model_url = Some(url.clone());
        }
        if let Some(source) = &cli.source {
            self.source = source.clone();
        }
        if let Some(font) = &cli.font {
            self.font = Some(font.clone());
        }
        self.width = cli.width.unwrap_or(self.width);
        self.height = cli.height.unwrap_or(self.height);
        self.model_conf = cli.model_conf.unwrap_or(self.model_conf);
        self.iou = cli.iou.unwrap_or(self.iou);
        self.headless |= cli.headless;
        self
    }

    fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.width > 0 && self.height > 0,
            "frame size must be non-zero, got {}x{}",
            self.width,
            self.height
        );
        anyhow::ensure!(
            (0.0..=1.0).contains(&self.model_conf),
            "model_conf must be within 0..=1, got {}",
            self.model_conf
        );
        anyhow::ensure!(
            (0.0..=1.0).contains(&self.iou),
            "iou must be within 0..=1, got {}",
            self.iou
        );
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::fs;

    #[test]
    fn defaults_without_file_or_flags() {
        let config = AppConfig::load(&Cli::default()).unwrap();
        assert_eq!(config.model, PathBuf::from("yolov8s.onnx"));
        assert_eq!(config.source, "0");
        assert_eq!((config.width, config.height), (640, 480));
        assert!(!config.headless);
    }

    #[test]
    fn flags_override_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("counter.toml");
        fs::write(
            &path,
            "model = \"models/yolov8n.onnx\"\nsource = \"stub://5\"\nwidth = 320\niou = 0.5\n",
        )
        .unwrap();

        let cli = Cli::parse_from([
            "yolo_counter",
            "--config",
            path.to_str().unwrap(),
            "--source",
            "/dev/video1",
            "--headless",
        ]);
        let config = AppConfig::load(&cli).unwrap();

        assert_eq!(config.model, PathBuf::from("models/yolov8n.onnx"));
        assert_eq!(config.source, "/dev/video1");
        assert_eq!(config.width, 320);
        assert_eq!(config.height, 480);
        assert_eq!(config.iou, 0.5);
        assert!(config.headless);
    }

    #[test]
    fn rejects_out_of_range_values() {
        let cli = Cli::parse_from(["yolo_counter", "--iou", "1.5"]);
        assert!(AppConfig::load(&cli).is_err());

        let cli = Cli::parse_from(["yolo_counter", "--width", "0"]);
        assert!(AppConfig::load(&cli).is_err());
    }
}
