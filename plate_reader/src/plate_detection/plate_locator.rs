use opencv::core::Point;
use opencv::core::Rect;
use opencv::core::Scalar;
use opencv::core::Vector;
use opencv::imgproc::bounding_rect;
use opencv::imgproc::flood_fill;
use opencv::prelude::*;

use super::candidate_finder::otsu;
use super::debug_view::DebugView;
use crate::error::Result;

/// The thresholded plate crop and the contour it was cut from.
pub struct LocatedPlate {
    pub roi: Mat,
    pub rect: Rect,
    pub contour: Vector<Point>,
}

/// Picks the candidate whose bounding box has the proportions of a plate.
pub struct PlateLocator {
    min_ar: f64,
    max_ar: f64,
    debug: DebugView,
}

impl PlateLocator {
    pub fn new(min_ar: f64, max_ar: f64, debug: DebugView) -> Self {
        Self {
            min_ar,
            max_ar,
            debug,
        }
    }

    fn is_plate_shaped(&self, rect: &Rect) -> bool {
        if rect.height <= 0 || rect.width <= rect.height {
            return false;
        }
        let ratio = rect.width as f64 / rect.height as f64;
        ratio >= self.min_ar && ratio <= self.max_ar
    }

    /// Returns the first candidate, in the given order, that passes the
    /// aspect ratio filter, with its crop binarized using Otsu.
    pub fn locate(
        &self,
        gray: &Mat,
        candidates: &[Vector<Point>],
        clear_border: bool,
    ) -> Result<Option<LocatedPlate>> {
        for (i, contour) in candidates.iter().enumerate() {
            let rect = bounding_rect(contour)?;
            tracing::debug!(
                candidate = i,
                x = rect.x,
                y = rect.y,
                width = rect.width,
                height = rect.height,
                aspect_ratio = rect.width as f64 / rect.height.max(1) as f64,
                "Checking plate candidate"
            );

            if !self.is_plate_shaped(&rect) {
                continue;
            }
            tracing::debug!(candidate = i, "Candidate matches plate aspect ratio");

            let plate = gray.apply_1(rect)?.try_clone()?;
            let mut roi = otsu(&plate)?;
            if clear_border {
                clear_border_blobs(&mut roi)?;
            }

            self.debug.show("License Plate", &plate, false)?;
            self.debug.show("ROI", &roi, true)?;

            return Ok(Some(LocatedPlate {
                roi,
                rect,
                contour: contour.clone(),
            }));
        }

        Ok(None)
    }
}

/// Removes every 8-connected foreground component of a binary image that
/// touches the image edge.
pub fn clear_border_blobs(binary: &mut Mat) -> Result<()> {
    let rows = binary.rows();
    let cols = binary.cols();
    if rows == 0 || cols == 0 {
        return Ok(());
    }

    let mut edge = Vec::with_capacity(2 * (rows + cols) as usize);
    for col in 0..cols {
        edge.push(Point::new(col, 0));
        edge.push(Point::new(col, rows - 1));
    }
    for row in 0..rows {
        edge.push(Point::new(0, row));
        edge.push(Point::new(cols - 1, row));
    }

    for seed in edge {
        if *binary.at_2d::<u8>(seed.y, seed.x)? == 0 {
            continue;
        }
        let mut filled = Rect::default();
        flood_fill(
            binary,
            seed,
            Scalar::all(0.0),
            &mut filled,
            Scalar::all(0.0),
            Scalar::all(0.0),
            8,
        )?;
    }
    Ok(())
}
