use std::path::Path;
use std::path::PathBuf;

use crossbeam::channel::Sender;
use opencv::core::Point;
use opencv::core::Scalar;
use opencv::core::Vector;
use opencv::imgcodecs::imwrite;
use opencv::imgproc::box_points;
use opencv::imgproc::min_area_rect;
use opencv::imgproc::polylines;
use opencv::imgproc::put_text;
use opencv::imgproc::FONT_HERSHEY_SIMPLEX;
use opencv::imgproc::LINE_8;
use opencv::prelude::Mat;
use opencv::prelude::MatTraitConst;
use rusted_pipe::channels::read_channel::InputGenerator;
use rusted_pipe::channels::typed_read_channel::ReadChannel1;
use rusted_pipe::graph::processor::TerminalProcessor;
use rusted_pipe::RustedPipeError;

use super::cleanup_text;
use super::debug_view::DebugView;
use super::{PlateReading, PlateResult};
use crate::error::Result;

/// Prints each recognized plate, draws it on the image and optionally saves
/// or shows the annotated image.
///
/// The path of every handled image is sent on `done` so the caller knows
/// when the whole directory went through.
pub struct BoundingBoxRender {
    output_dir: Option<PathBuf>,
    display: DebugView,
    done: Sender<PathBuf>,
}

impl BoundingBoxRender {
    pub fn new(output_dir: Option<PathBuf>, display: DebugView, done: Sender<PathBuf>) -> Self {
        Self {
            output_dir,
            display,
            done,
        }
    }

    fn report(&self, result: PlateResult) -> Result<()> {
        let PlateResult {
            path,
            mut image,
            reading,
        } = result;

        let text = reading.as_ref().and_then(|r| r.text.as_deref());
        match (&reading, text) {
            (Some(reading), Some(text)) => {
                println!("[INFO] {}: {}", path.display(), text);
                render(&mut image, reading)?;
            }
            (Some(_), None) => println!("[INFO] {}: plate found but no text read", path.display()),
            (None, _) => println!("[INFO] {}: no plate found", path.display()),
        }

        if image.empty() {
            return Ok(());
        }
        if let Some(dir) = self.output_dir.as_ref() {
            save(dir, &path, &image)?;
        }
        self.display.show("Output ANPR", &image, true)
    }
}

/// Draws the rotated box around the plate in green and its text above it.
pub fn render(image: &mut Mat, reading: &PlateReading) -> Result<()> {
    let color = Scalar::from((0.0, 255.0, 0.0));
    let thickness_px = 2;

    let mut corners = Mat::default();
    box_points(min_area_rect(&reading.contour)?, &mut corners)?;
    let mut polygon = Vector::<Point>::new();
    for i in 0..corners.rows() {
        let x = *corners.at_2d::<f32>(i, 0)?;
        let y = *corners.at_2d::<f32>(i, 1)?;
        polygon.push(Point::new(x.round() as i32, y.round() as i32));
    }
    let polygons = Vector::<Vector<Point>>::from_iter([polygon]);
    polylines(image, &polygons, true, color, thickness_px, LINE_8, 0)?;

    if let Some(text) = reading.text.as_deref() {
        put_text(
            image,
            &cleanup_text(text),
            Point::new(reading.plate.x, reading.plate.y - 15),
            FONT_HERSHEY_SIMPLEX,
            0.75,
            color,
            thickness_px,
            LINE_8,
            false,
        )?;
    }
    Ok(())
}

fn save(dir: &Path, source: &Path, image: &Mat) -> Result<()> {
    let Some(name) = source.file_name() else {
        return Ok(());
    };
    let target = dir.join(name);
    match target.to_str() {
        Some(target) => {
            if !imwrite(target, image, &Vector::<i32>::new())? {
                tracing::warn!("Could not write {}", target);
            }
        }
        None => tracing::warn!("Skipping non UTF-8 output path {}", target.display()),
    }
    Ok(())
}

impl TerminalProcessor for BoundingBoxRender {
    type INPUT = ReadChannel1<PlateResult>;
    fn handle(
        &mut self,
        mut input: <Self::INPUT as InputGenerator>::INPUT,
    ) -> std::result::Result<(), RustedPipeError> {
        let Some(packet) = input.c1_owned() else {
            return Ok(());
        };
        let path = packet.data.path.clone();

        if let Err(e) = self.report(packet.data) {
            tracing::error!("Cannot render {}: {}", path.display(), e);
        }
        if self.done.send(path).is_err() {
            tracing::warn!("Nobody is waiting for rendered plates");
        }

        Ok(())
    }
}

unsafe impl Send for BoundingBoxRender {}
unsafe impl Sync for BoundingBoxRender {}
