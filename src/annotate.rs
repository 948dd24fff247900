//! Per-frame filtering, counting and drawing.

use anyhow::{Context, Result};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use rusttype::{Font, Scale};
use std::path::Path;

use crate::yolo::Detection;

/// A detection must score strictly above this to be drawn or counted.
pub const CONFIDENCE_THRESHOLD: f32 = 0.4;
pub const PERSON_CLASS: &str = "person";
pub const VEHICLE_CLASSES: [&str; 5] = ["car", "truck", "bus", "motorbike", "bicycle"];

const BOX_THICKNESS: u32 = 2;
const TEXT_SCALE: f32 = 24.0;
/// Baseline-left corners of the count overlays.
const PEOPLE_ORIGIN: (i32, i32) = (10, 50);
const VEHICLES_ORIGIN: (i32, i32) = (10, 100);
const PEOPLE_COLOUR: Rgb<u8> = Rgb([0, 255, 0]);
const VEHICLES_COLOUR: Rgb<u8> = Rgb([255, 0, 0]);

const BASE_COLOURS: [[i64; 3]; 3] = [[255, 0, 0], [0, 255, 0], [0, 0, 255]];
const COLOUR_INCREMENTS: [[i64; 3]; 3] = [[1, -2, 1], [-2, 1, -1], [1, -1, 2]];

/// Fonts tried when none is configured.
const FALLBACK_FONTS: [&str; 4] = [
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/Library/Fonts/Arial.ttf",
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameCounts {
    pub people: u32,
    pub vehicles: u32,
}

impl FrameCounts {
    fn record(&mut self, label: &str) {
        if label == PERSON_CLASS {
            self.people += 1;
        } else if VEHICLE_CLASSES.contains(&label) {
            self.vehicles += 1;
        }
    }
}

/// Box colour for a class index. Same index, same colour.
pub fn class_colour(class_id: usize) -> Rgb<u8> {
    let index = class_id % BASE_COLOURS.len();
    let step = (class_id / BASE_COLOURS.len()) as i64;
    let base = BASE_COLOURS[index];
    let increment = COLOUR_INCREMENTS[index];
    Rgb(std::array::from_fn(|c| {
        (base[c] + (increment[c] * step).rem_euclid(5)).clamp(0, 255) as u8
    }))
}

pub fn load_font(path: &Path) -> Result<Font<'static>> {
    let bytes = std::fs::read(path).with_context(|| format!("read font {}", path.display()))?;
    Font::try_from_vec(bytes).with_context(|| format!("parse font {}", path.display()))
}

/// The configured font, or the first system font that loads.
pub fn find_font(configured: Option<&Path>) -> Option<Font<'static>> {
    if let Some(path) = configured {
        match load_font(path) {
            Ok(font) => return Some(font),
            Err(err) => log::warn!("{:#}", err),
        }
    }
    FALLBACK_FONTS
        .iter()
        .find_map(|path| load_font(Path::new(path)).ok())
}

pub struct FrameAnnotator {
    font: Option<Font<'static>>,
    scale: Scale,
}

impl FrameAnnotator {
    pub fn new(font: Option<Font<'static>>) -> Self {
        if font.is_none() {
            log::warn!("no font available, labels and counts will not be drawn");
        }
        Self {
            font,
            scale: Scale::uniform(TEXT_SCALE),
        }
    }

    pub fn without_text() -> Self {
        Self {
            font: None,
            scale: Scale::uniform(TEXT_SCALE),
        }
    }

    /// Draw every detection above `CONFIDENCE_THRESHOLD` and count people and vehicles among them.
    pub fn annotate(&self, mut frame: RgbImage, detections: &[Detection]) -> (RgbImage, FrameCounts) {
        let mut counts = FrameCounts::default();

        for detection in detections
            .iter()
            .filter(|d| d.confidence > CONFIDENCE_THRESHOLD)
        {
            counts.record(&detection.label);

            let colour = class_colour(detection.class_id);
            draw_box(&mut frame, detection, colour);
            self.draw_label(
                &mut frame,
                (detection.x1, detection.y1),
                colour,
                &detection_label(detection),
            );
        }

        for (text, origin, colour) in count_overlays(counts) {
            self.draw_label(&mut frame, origin, colour, &text);
        }

        (frame, counts)
    }

    /// `(x, y)` is where the text sits on, like a baseline; flips below when it would leave the frame.
    fn draw_label(&self, frame: &mut RgbImage, (x, y): (i32, i32), colour: Rgb<u8>, text: &str) {
        let Some(font) = &self.font else {
            return;
        };
        let (_, height) = text_size(self.scale, font, text);
        draw_text_mut(frame, colour, x, text_top(y, height), self.scale, font, text);
    }
}

fn detection_label(detection: &Detection) -> String {
    format!("{} {:.2}", detection.label, detection.confidence)
}

fn count_overlays(counts: FrameCounts) -> [(String, (i32, i32), Rgb<u8>); 2] {
    [
        (format!("People: {}", counts.people), PEOPLE_ORIGIN, PEOPLE_COLOUR),
        (format!("Vehicles: {}", counts.vehicles), VEHICLES_ORIGIN, VEHICLES_COLOUR),
    ]
}

/// Top row for text of `height` sitting on `y`, or hanging from it near the top edge.
fn text_top(y: i32, height: i32) -> i32 {
    if y - height < 0 {
        y
    } else {
        y - height
    }
}

/// Hollow rectangle covering `(x1, y1)..=(x2, y2)`, growing inwards.
///
/// Corners are pulled in to just outside the frame first, so edges that lie
/// off-screen stay off-screen and the sizes stay small.
fn draw_box(frame: &mut RgbImage, detection: &Detection, colour: Rgb<u8>) {
    let margin = BOX_THICKNESS as i64;
    let (frame_width, frame_height) = (frame.width() as i64, frame.height() as i64);
    let clamp_x = |x: i32| (x as i64).clamp(-margin, frame_width + margin);
    let clamp_y = |y: i32| (y as i64).clamp(-margin, frame_height + margin);
    let (x1, x2) = (clamp_x(detection.x1), clamp_x(detection.x2));
    let (y1, y2) = (clamp_y(detection.y1), clamp_y(detection.y2));

    let mut width = (x2 - x1 + 1) as u32;
    let mut height = (y2 - y1 + 1) as u32;
    for inset in 0..margin {
        let rect = Rect::at((x1 + inset) as i32, (y1 + inset) as i32).of_size(width, height);
        draw_hollow_rect_mut(frame, rect, colour);
        if width <= 2 || height <= 2 {
            break;
        }
        width -= 2;
        height -= 2;
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::ops::Range;

    const BLACK: Rgb<u8> = Rgb([0, 0, 0]);

    fn detection(box_: (i32, i32, i32, i32), class_id: usize, label: &str, confidence: f32) -> Detection {
        Detection::new(box_, class_id, label, confidence).unwrap()
    }

    fn frame() -> RgbImage {
        RgbImage::from_pixel(120, 90, BLACK)
    }

    #[test]
    fn single_person_is_counted_and_boxed() {
        let annotator = FrameAnnotator::without_text();
        let person = detection((10, 10, 50, 50), 0, "person", 0.9);

        let (out, counts) = annotator.annotate(frame(), &[person]);

        assert_eq!(counts, FrameCounts { people: 1, vehicles: 0 });
        let colour = class_colour(0);
        assert_eq!(*out.get_pixel(10, 10), colour);
        assert_eq!(*out.get_pixel(50, 50), colour);
        assert_eq!(*out.get_pixel(30, 10), colour);
        assert_eq!(*out.get_pixel(11, 11), colour);
        assert_eq!(*out.get_pixel(30, 30), BLACK);
        assert_eq!(*out.get_pixel(51, 51), BLACK);
        assert_eq!(*out.get_pixel(9, 9), BLACK);
    }

    #[test]
    fn other_classes_are_drawn_but_not_counted() {
        let annotator = FrameAnnotator::without_text();
        let car = detection((5, 5, 20, 20), 2, "car", 0.5);
        let dog = detection((60, 40, 100, 80), 16, "dog", 0.9);

        let (out, counts) = annotator.annotate(frame(), &[car, dog]);

        assert_eq!(counts, FrameCounts { people: 0, vehicles: 1 });
        assert_eq!(*out.get_pixel(5, 5), class_colour(2));
        assert_eq!(*out.get_pixel(60, 40), class_colour(16));
        assert_eq!(*out.get_pixel(100, 80), class_colour(16));
    }

    #[test]
    fn detections_at_or_below_threshold_are_ignored() {
        let annotator = FrameAnnotator::without_text();
        let input = frame();
        let detections = [
            detection((10, 10, 40, 40), 5, "bus", 0.39),
            detection((50, 10, 80, 40), 0, "person", CONFIDENCE_THRESHOLD),
        ];

        let (out, counts) = annotator.annotate(input.clone(), &detections);

        assert_eq!(counts, FrameCounts::default());
        assert_eq!(out, input);
    }

    #[test]
    fn every_vehicle_class_counts_once() {
        let annotator = FrameAnnotator::without_text();
        let detections: Vec<_> = VEHICLE_CLASSES
            .iter()
            .enumerate()
            .map(|(i, label)| detection((i as i32 * 10, 0, i as i32 * 10 + 8, 8), 1, label, 0.8))
            .chain([
                detection((0, 50, 10, 60), 0, "person", 0.41),
                detection((20, 50, 30, 60), 0, "person", 0.99),
            ])
            .collect();

        let (_, counts) = annotator.annotate(frame(), &detections);
        assert_eq!(counts, FrameCounts { people: 2, vehicles: 5 });
    }

    #[test]
    fn empty_detections_leave_the_frame_alone() {
        let annotator = FrameAnnotator::without_text();
        let input = frame();

        let (out, counts) = annotator.annotate(input.clone(), &[]);

        assert_eq!(out.dimensions(), input.dimensions());
        assert_eq!(out, input);
        assert_eq!(counts, FrameCounts::default());
    }

    #[test]
    fn boxes_touching_the_edge_are_clipped() {
        let annotator = FrameAnnotator::without_text();
        let edge = detection((100, 70, 119, 89), 0, "person", 0.9);
        let tiny = detection((0, 0, 1, 1), 2, "car", 0.9);

        let (out, counts) = annotator.annotate(frame(), &[edge, tiny]);

        assert_eq!(out.dimensions(), (120, 90));
        assert_eq!(counts, FrameCounts { people: 1, vehicles: 1 });
        assert_eq!(*out.get_pixel(119, 89), class_colour(0));
        assert_eq!(*out.get_pixel(1, 1), class_colour(2));
    }

    #[test]
    fn colours_are_deterministic() {
        for class_id in 0..80 {
            assert_eq!(class_colour(class_id), class_colour(class_id));
        }
        assert_eq!(class_colour(0), Rgb([255, 0, 0]));
        assert_eq!(class_colour(1), Rgb([0, 255, 0]));
        assert_eq!(class_colour(2), Rgb([0, 0, 255]));
        // -2 mod 5 wraps to 3, 256 clamps to 255
        assert_eq!(class_colour(3), Rgb([255, 3, 1]));
    }

    #[test]
    fn huge_boxes_are_clamped_to_the_frame() {
        let annotator = FrameAnnotator::without_text();
        let wide = detection((-2_000_000_000, 0, 2_000_000_000, 10), 0, "person", 0.9);

        let (out, counts) = annotator.annotate(RgbImage::new(64, 64), &[wide]);

        assert_eq!(out.dimensions(), (64, 64));
        assert_eq!(counts, FrameCounts { people: 1, vehicles: 0 });
        assert_eq!(*out.get_pixel(10, 0), class_colour(0));
        assert_eq!(*out.get_pixel(10, 10), class_colour(0));
        assert_eq!(*out.get_pixel(10, 5), BLACK);
    }

    #[test]
    fn label_and_overlay_text() {
        assert_eq!(detection_label(&detection((0, 0, 5, 5), 2, "car", 0.5)), "car 0.50");
        assert_eq!(detection_label(&detection((0, 0, 5, 5), 0, "person", 0.876)), "person 0.88");

        let [people, vehicles] = count_overlays(FrameCounts { people: 1, vehicles: 3 });
        assert_eq!(people, ("People: 1".to_string(), (10, 50), PEOPLE_COLOUR));
        assert_eq!(vehicles, ("Vehicles: 3".to_string(), (10, 100), VEHICLES_COLOUR));
    }

    #[test]
    fn text_sits_above_its_anchor_unless_at_the_top() {
        assert_eq!(text_top(50, 20), 30);
        assert_eq!(text_top(20, 20), 0);
        assert_eq!(text_top(5, 20), 5);
    }

    fn count_pixels(
        img: &RgbImage,
        rows: Range<u32>,
        cols: Range<u32>,
        keep: impl Fn(&Rgb<u8>) -> bool,
    ) -> usize {
        img.enumerate_pixels()
            .filter(|(x, y, p)| rows.contains(y) && cols.contains(x) && keep(p))
            .count()
    }

    #[test]
    fn text_is_rendered_with_a_system_font() {
        let Some(font) = find_font(None) else {
            eprintln!("no system font, skipping");
            return;
        };
        let annotator = FrameAnnotator::new(Some(font));

        let (out, _) = annotator.annotate(RgbImage::from_pixel(200, 150, BLACK), &[]);
        let green = |p: &Rgb<u8>| p.0[1] > 0 && p.0[0] == 0 && p.0[2] == 0;
        let red = |p: &Rgb<u8>| p.0[0] > 0 && p.0[1] == 0 && p.0[2] == 0;
        assert!(count_pixels(&out, 20..55, 0..200, green) > 0);
        assert!(count_pixels(&out, 70..105, 0..200, red) > 0);
        assert_eq!(count_pixels(&out, 0..150, 0..200, |p| p.0[2] > 0), 0);

        // label at the top edge hangs inside the box
        let car = detection((0, 0, 150, 60), 2, "car", 0.5);
        let (out, counts) = annotator.annotate(RgbImage::from_pixel(200, 150, BLACK), &[car]);
        assert_eq!(counts.vehicles, 1);
        let blue = |p: &Rgb<u8>| p.0[2] > 0 && p.0[0] == 0 && p.0[1] == 0;
        assert!(count_pixels(&out, 2..30, 2..148, blue) > 0);
    }

    #[test]
    fn missing_font_file_is_an_error() {
        assert!(load_font(Path::new("/nonexistent/font.ttf")).is_err());
    }
}
