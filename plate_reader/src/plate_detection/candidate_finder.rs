use opencv::core::bitwise_and;
use opencv::core::min_max_loc;
use opencv::core::Point;
use opencv::core::Size;
use opencv::core::Vector;
use opencv::core::BORDER_CONSTANT;
use opencv::core::BORDER_DEFAULT;
use opencv::core::CV_32F;
use opencv::core::CV_8U;
use opencv::imgproc::contour_area;
use opencv::imgproc::dilate;
use opencv::imgproc::erode;
use opencv::imgproc::find_contours;
use opencv::imgproc::gaussian_blur;
use opencv::imgproc::get_structuring_element;
use opencv::imgproc::morphology_default_border_value;
use opencv::imgproc::morphology_ex;
use opencv::imgproc::sobel;
use opencv::imgproc::threshold;
use opencv::imgproc::CHAIN_APPROX_SIMPLE;
use opencv::imgproc::MORPH_BLACKHAT;
use opencv::imgproc::MORPH_CLOSE;
use opencv::imgproc::MORPH_RECT;
use opencv::imgproc::RETR_EXTERNAL;
use opencv::imgproc::THRESH_BINARY;
use opencv::imgproc::THRESH_OTSU;
use opencv::prelude::*;

use super::debug_view::DebugView;
use crate::error::Result;

/// Kernel matching the proportions of a Mexican plate's characters.
const PLATE_KERNEL: (i32, i32) = (12, 7);
const DENOISE_ITERATIONS: i32 = 3;
/// Sobel with this aperture computes the Scharr derivative.
const SCHARR_KSIZE: i32 = -1;

/// Finds regions of a grayscale image that may contain a licence plate.
pub struct CandidateFinder {
    rect_kernel: Mat,
    square_kernel: Mat,
    debug: DebugView,
}

impl CandidateFinder {
    pub fn new(debug: DebugView) -> Result<Self> {
        let rect_kernel = get_structuring_element(
            MORPH_RECT,
            Size::new(PLATE_KERNEL.0, PLATE_KERNEL.1),
            Point::new(-1, -1),
        )?;
        let square_kernel = get_structuring_element(MORPH_RECT, Size::new(3, 3), Point::new(-1, -1))?;

        Ok(Self {
            rect_kernel,
            square_kernel,
            debug,
        })
    }

    /// Returns the `keep` largest external contours of the plate mask, largest
    /// first.
    pub fn locate_candidates(&self, gray: &Mat, keep: usize) -> Result<Vec<Vector<Point>>> {
        // Dark characters on a light plate stand out after a blackhat.
        let blackhat = morph(gray, MORPH_BLACKHAT, &self.rect_kernel)?;
        self.debug.show("Blackhat", &blackhat, false)?;

        let light = otsu(&morph(gray, MORPH_CLOSE, &self.square_kernel)?)?;
        self.debug.show("Light Regions", &light, false)?;

        let grad_x = scaled_gradient_x(&blackhat)?;
        self.debug.show("Scharr", &grad_x, false)?;

        let mut blurred = Mat::default();
        gaussian_blur(&grad_x, &mut blurred, Size::new(5, 5), 0.0, 0.0, BORDER_DEFAULT)?;
        let closed = morph(&blurred, MORPH_CLOSE, &self.rect_kernel)?;
        let thresh = otsu(&closed)?;
        self.debug.show("Grad Thresh", &thresh, false)?;

        let thresh = denoise(&thresh)?;
        self.debug.show("Grad Erode/Dilate", &thresh, false)?;

        let mut masked = Mat::default();
        bitwise_and(&thresh, &thresh, &mut masked, &light)?;
        let thresh = denoise(&masked)?;
        self.debug.show("Final", &thresh, true)?;

        let mut contours = Vector::<Vector<Point>>::new();
        find_contours(
            &thresh,
            &mut contours,
            RETR_EXTERNAL,
            CHAIN_APPROX_SIMPLE,
            Point::new(0, 0),
        )?;

        let mut by_area = Vec::with_capacity(contours.len());
        for contour in contours {
            let area = contour_area(&contour, false)?;
            by_area.push((area, contour));
        }
        by_area.sort_by(|a, b| b.0.total_cmp(&a.0));
        by_area.truncate(keep);

        tracing::debug!("Found {} plate candidates", by_area.len());
        Ok(by_area.into_iter().map(|(_, contour)| contour).collect())
    }
}

unsafe impl Send for CandidateFinder {}
unsafe impl Sync for CandidateFinder {}

fn morph(src: &Mat, op: i32, kernel: &Mat) -> Result<Mat> {
    let mut dst = Mat::default();
    morphology_ex(
        src,
        &mut dst,
        op,
        kernel,
        Point::new(-1, -1),
        1,
        BORDER_CONSTANT,
        morphology_default_border_value()?,
    )?;
    Ok(dst)
}

pub(crate) fn otsu(src: &Mat) -> Result<Mat> {
    let mut dst = Mat::default();
    threshold(src, &mut dst, 0.0, 255.0, THRESH_BINARY | THRESH_OTSU)?;
    Ok(dst)
}

/// Erodes then dilates with a 3x3 kernel to drop small blobs.
fn denoise(src: &Mat) -> Result<Mat> {
    let border_value = morphology_default_border_value()?;
    let mut eroded = Mat::default();
    erode(
        src,
        &mut eroded,
        &Mat::default(),
        Point::new(-1, -1),
        DENOISE_ITERATIONS,
        BORDER_CONSTANT,
        border_value,
    )?;
    let mut dilated = Mat::default();
    dilate(
        &eroded,
        &mut dilated,
        &Mat::default(),
        Point::new(-1, -1),
        DENOISE_ITERATIONS,
        BORDER_CONSTANT,
        border_value,
    )?;
    Ok(dilated)
}

/// Absolute Scharr derivative along x, min-max scaled into an 8 bit image.
/// A flat input yields an all-zero image.
fn scaled_gradient_x(src: &Mat) -> Result<Mat> {
    let mut grad = Mat::default();
    sobel(src, &mut grad, CV_32F, 1, 0, SCHARR_KSIZE, 1.0, 0.0, BORDER_DEFAULT)?;
    let grad = opencv::core::abs(&grad)?.to_mat()?;

    let mut min_val = 0.0;
    let mut max_val = 0.0;
    min_max_loc(
        &grad,
        Some(&mut min_val),
        Some(&mut max_val),
        None,
        None,
        &Mat::default(),
    )?;

    let mut scaled = Mat::default();
    if max_val > min_val {
        let alpha = 255.0 / (max_val - min_val);
        grad.convert_to(&mut scaled, CV_8U, alpha, -min_val * alpha)?;
    } else {
        grad.convert_to(&mut scaled, CV_8U, 0.0, 0.0)?;
    }
    Ok(scaled)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use opencv::core::Rect;
    use opencv::core::Scalar;
    use opencv::core::CV_8UC1;
    use opencv::imgproc::rectangle;
    use opencv::imgproc::LINE_8;

    /// A dark scene with a light plate holding seven dark glyphs.
    pub(crate) fn synthetic_plate_scene() -> Mat {
        let mut image =
            Mat::new_rows_cols_with_default(240, 400, CV_8UC1, Scalar::all(40.0)).unwrap();
        rectangle(
            &mut image,
            Rect::new(100, 90, 200, 60),
            Scalar::all(220.0),
            -1,
            LINE_8,
            0,
        )
        .unwrap();
        for glyph in 0..7 {
            rectangle(
                &mut image,
                Rect::new(112 + glyph * 26, 102, 8, 36),
                Scalar::all(20.0),
                -1,
                LINE_8,
                0,
            )
            .unwrap();
        }
        image
    }

    #[test]
    fn flat_image_has_no_candidates() {
        let finder = CandidateFinder::new(DebugView::default()).unwrap();
        let gray = Mat::new_rows_cols_with_default(120, 160, CV_8UC1, Scalar::all(128.0)).unwrap();

        let candidates = finder.locate_candidates(&gray, 5).unwrap();
        assert!(candidates.is_empty());
    }

    #[test]
    fn flat_gradient_scales_to_zero() {
        let gray = Mat::new_rows_cols_with_default(20, 20, CV_8UC1, Scalar::all(0.0)).unwrap();
        let scaled = scaled_gradient_x(&gray).unwrap();

        assert_eq!(scaled.typ(), CV_8U);
        assert_eq!(opencv::core::count_non_zero(&scaled).unwrap(), 0);
    }

    #[test]
    fn plate_scene_yields_sorted_candidates() {
        let finder = CandidateFinder::new(DebugView::default()).unwrap();
        let gray = synthetic_plate_scene();

        let candidates = finder.locate_candidates(&gray, 5).unwrap();
        assert!(!candidates.is_empty());
        assert!(candidates.len() <= 5);

        let areas: Vec<f64> = candidates
            .iter()
            .map(|c| contour_area(c, false).unwrap())
            .collect();
        assert!(areas.windows(2).all(|pair| pair[0] >= pair[1]));
    }

    #[test]
    fn keep_bounds_the_candidate_count() {
        let finder = CandidateFinder::new(DebugView::default()).unwrap();
        let gray = synthetic_plate_scene();

        let candidates = finder.locate_candidates(&gray, 1).unwrap();
        assert_eq!(candidates.len(), 1);
    }
}
