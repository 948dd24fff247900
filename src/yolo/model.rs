use anyhow::{bail, Context, Result};
use image::{imageops, imageops::FilterType, RgbImage};
use ndarray::{s, Array, Array4, ArrayView, Axis, Ix3, IxDyn};
use ort::{
    execution_providers::CUDAExecutionProvider,
    inputs,
    session::{builder::GraphOptimizationLevel, Session},
    value::Tensor,
};
use regex::Regex;
use std::path::Path;

use super::{Detection, DetectionModel};

/// Raw box straight out of the network, scaled to the source frame but not yet clamped.
#[derive(Debug, Clone)]
struct Candidate {
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
    class_id: usize,
    confidence: f32,
}

impl Candidate {
    fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }

    /// Intersection over union; 0 for disjoint or empty boxes.
    fn iou(&self, other: &Candidate) -> f32 {
        let overlap_w = (self.x2.min(other.x2) - self.x1.max(other.x1)).max(0.0);
        let overlap_h = (self.y2.min(other.y2) - self.y1.max(other.y1)).max(0.0);
        let overlap = overlap_w * overlap_h;
        let union = self.area() + other.area() - overlap;
        if union <= 0.0 {
            0.0
        } else {
            overlap / union
        }
    }

    /// Clamp to the frame and truncate to whole pixels.
    fn into_detection(self, classes: &[String], img_width: u32, img_height: u32) -> Option<Detection> {
        let max_x = img_width.saturating_sub(1) as f32;
        let max_y = img_height.saturating_sub(1) as f32;
        let label = classes
            .get(self.class_id)
            .cloned()
            .unwrap_or_else(|| "unknown".to_string());
        Detection::new(
            (
                self.x1.clamp(0.0, max_x) as i32,
                self.y1.clamp(0.0, max_y) as i32,
                self.x2.clamp(0.0, max_x) as i32,
                self.y2.clamp(0.0, max_y) as i32,
            ),
            self.class_id,
            label,
            self.confidence,
        )
    }
}

pub struct YoloDetector {
    session: Session,
    classes: Vec<String>,
    input_width: u32,
    input_height: u32,
    conf_threshold: f32,
    iou_threshold: f32,
}

impl YoloDetector {
    pub fn new<P: AsRef<Path>>(
        model_path: P,
        conf_threshold: f32,
        iou_threshold: f32,
    ) -> Result<Self> {
        let model_path = model_path.as_ref();
        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(4)?
            .with_execution_providers([CUDAExecutionProvider::default().build()])?
            .commit_from_file(model_path)
            .with_context(|| format!("load model {}", model_path.display()))?;

        let mut result = Self {
            session,
            classes: vec![],
            input_width: 640,
            input_height: 640,
            conf_threshold,
            iou_threshold,
        };
        result.classes = result
            .names()
            .context("model has no `names` metadata")?;

        log::info!(
            "YoloDetector: loaded {} ({} classes)",
            model_path.display(),
            result.classes.len()
        );
        Ok(result)
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    /// Custom metadata entry stored by the exporter; missing and unreadable look the same.
    pub fn metadata_entry(&self, key: &str) -> Option<String> {
        self.session.metadata().ok()?.custom(key).ok().flatten()
    }

    pub fn names(&self) -> Option<Vec<String>> {
        self.metadata_entry("names").map(|names| parse_names(&names))
    }

    pub fn detect(&mut self, img: &RgbImage) -> Result<Vec<Detection>> {
        // 预处理
        let input_tensor = self.prepare_input(img)?;

        // 推理与数据转换
        let output_array = {
            let outputs = self.session.run(inputs!["images" => input_tensor])?;

            let (shape_ref, data_slice) = outputs["output0"].try_extract_tensor::<f32>()?;

            let shape_usize: Vec<usize> = shape_ref.iter().map(|&x| x as usize).collect();

            let output_view_3d = ArrayView::from_shape(IxDyn(&shape_usize), data_slice)?
                .into_dimensionality::<Ix3>()
                .context("unexpected model output shape (want 3 dims)")?;

            output_view_3d.permuted_axes([0, 2, 1]).to_owned()
        };

        // 后处理
        let candidates = decode_output(
            &output_array,
            (self.input_width, self.input_height),
            img.dimensions(),
            self.conf_threshold,
        )?;
        Ok(nms(candidates, self.iou_threshold)
            .into_iter()
            .filter_map(|c| c.into_detection(&self.classes, img.width(), img.height()))
            .collect())
    }

    fn prepare_input(&self, img: &RgbImage) -> Result<Tensor<f32>> {
        let img_resized = imageops::resize(
            img,
            self.input_width,
            self.input_height,
            FilterType::CatmullRom,
        );

        let mut input: Array4<f32> =
            Array::zeros((1, 3, self.input_height as usize, self.input_width as usize));

        for (x, y, pixel) in img_resized.enumerate_pixels() {
            let (x, y) = (x as usize, y as usize);
            let [r, g, b] = pixel.0;
            input[[0, 0, y, x]] = (r as f32) / 255.0;
            input[[0, 1, y, x]] = (g as f32) / 255.0;
            input[[0, 2, y, x]] = (b as f32) / 255.0;
        }

        Ok(Tensor::from_array(input)?)
    }
}

impl DetectionModel for YoloDetector {
    fn infer(&mut self, frame: &RgbImage) -> Result<Vec<Detection>> {
        self.detect(frame)
    }
}

/// Pulls quoted class names out of the python-dict string ultralytics stores in metadata.
fn parse_names(names: &str) -> Vec<String> {
    let re = Regex::new(r#"(['"])([-()\w '"]+)(['"])"#).expect("static regex");
    let mut names_ = vec![];
    for (_, [_, name, _]) in re.captures_iter(names).map(|x| x.extract()) {
        names_.push(name.to_string());
    }
    names_
}

/// `output` is `[1, boxes, 4 + classes]`: centre x, centre y, w, h, then per-class scores.
fn decode_output(
    output: &Array<f32, Ix3>,
    (input_width, input_height): (u32, u32),
    (img_width, img_height): (u32, u32),
    conf_threshold: f32,
) -> Result<Vec<Candidate>> {
    let values_per_box = output.shape()[2];
    if values_per_box < 4 {
        bail!("model output has {} values per box, need at least 4", values_per_box);
    }

    let mut boxes = Vec::new();
    let output_2d = output.slice(s![0, .., ..]);

    for row in output_2d.axis_iter(Axis(0)) {
        let row: Vec<_> = row.iter().copied().collect();

        let (class_id, prob) = row
            .iter()
            .skip(4)
            .enumerate()
            .map(|(index, value)| (index, *value))
            .reduce(|accum, row| if row.1 > accum.1 { row } else { accum })
            .unwrap_or((0, 0.0));

        if prob < conf_threshold {
            continue;
        }

        let xc = row[0] / (input_width as f32) * (img_width as f32);
        let yc = row[1] / (input_height as f32) * (img_height as f32);
        let w = row[2] / (input_width as f32) * (img_width as f32);
        let h = row[3] / (input_height as f32) * (img_height as f32);

        boxes.push(Candidate {
            x1: xc - w / 2.0,
            y1: yc - h / 2.0,
            x2: xc + w / 2.0,
            y2: yc + h / 2.0,
            class_id,
            confidence: prob,
        });
    }
    Ok(boxes)
}

/// Greedy per-class suppression, highest confidence first.
fn nms(mut boxes: Vec<Candidate>, iou_threshold: f32) -> Vec<Candidate> {
    boxes.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut result = Vec::new();
    while !boxes.is_empty() {
        let current = boxes.remove(0);
        boxes.retain(|other| {
            other.class_id != current.class_id || current.iou(other) < iou_threshold
        });
        result.push(current);
    }
    result
}
