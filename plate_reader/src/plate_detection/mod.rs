pub mod anpr;
pub mod bounding_box_render;
pub mod candidate_finder;
pub mod debug_view;
pub mod image_reader;
pub mod plate_locator;
pub mod tesseract_ocr;

use std::path::PathBuf;

use opencv::core::Point;
use opencv::core::Rect;
use opencv::core::Vector;
use opencv::prelude::Mat;

/// A BGR image read from disk.
#[derive(Clone)]
pub struct PlateImage {
    pub path: PathBuf,
    pub image: Mat,
}

impl PlateImage {
    pub fn new(path: PathBuf, image: Mat) -> Self {
        Self { path, image }
    }
}

/// A located plate and the text read from it.
#[derive(Clone, Debug)]
pub struct PlateReading {
    pub text: Option<String>,
    pub plate: Rect,
    pub contour: Vector<Point>,
}

impl PlateReading {
    pub fn new(text: Option<String>, plate: Rect, contour: Vector<Point>) -> Self {
        Self {
            text,
            plate,
            contour,
        }
    }
}

/// Outcome of recognition on one image. `reading` is `None` when no
/// candidate looked like a plate.
#[derive(Clone)]
pub struct PlateResult {
    pub path: PathBuf,
    pub image: Mat,
    pub reading: Option<PlateReading>,
}

/// Strips characters outside ASCII so the text can be drawn with the
/// Hershey fonts.
pub fn cleanup_text(text: &str) -> String {
    text.chars()
        .filter(|c| c.is_ascii())
        .collect::<String>()
        .trim()
        .to_string()
}
