use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};

use crossbeam::channel::Receiver;
use opencv::core::Size;
use opencv::imgcodecs::imread;
use opencv::imgcodecs::IMREAD_COLOR;
use opencv::imgproc::resize;
use opencv::imgproc::INTER_AREA;
use opencv::prelude::Mat;
use opencv::prelude::MatTraitConst;
use rusted_pipe::channels::typed_write_channel::WriteChannel1;
use rusted_pipe::graph::processor::ProcessorWriter;
use rusted_pipe::graph::processor::SourceProcessor;
use rusted_pipe::DataVersion;
use rusted_pipe::RustedPipeError;
use walkdir::WalkDir;

use super::PlateImage;
use crate::error::{AnprError, Result};

const IMAGE_EXTENSIONS: [&str; 7] = ["jpg", "jpeg", "png", "bmp", "tif", "tiff", "webp"];

/// Width every image is scaled to before plate localization. The kernel
/// sizes of the candidate finder are tuned for plates at this scale.
pub const WORKING_WIDTH: i32 = 600;

/// Emits every image under a directory, in path order, then ends the stream.
///
/// Files that cannot be decoded are still emitted with an empty image so
/// that each listed file produces exactly one result downstream.
pub struct ImageReader {
    pending: VecDeque<PathBuf>,
    gate: Option<Receiver<()>>,
    emitted: usize,
}

impl ImageReader {
    pub fn new(input: &Path) -> Result<Self> {
        Ok(Self {
            pending: list_images(input)?.into(),
            gate: None,
            emitted: 0,
        })
    }

    /// Waits for a message on `gate` before emitting each image after the
    /// first, so only one image is in the graph at a time.
    pub fn with_gate(mut self, gate: Receiver<()>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Number of images not yet emitted.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    fn wait_turn(&mut self) {
        if self.emitted == 0 {
            return;
        }
        if let Some(gate) = self.gate.as_ref() {
            if gate.recv().is_err() {
                self.gate = None;
            }
        }
    }
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|known| known.eq_ignore_ascii_case(ext))
        })
        .unwrap_or(false)
}

/// Lists the image files under `input`, subdirectories included, sorted. A
/// path to a single file is returned as is.
pub fn list_images(input: &Path) -> Result<Vec<PathBuf>> {
    let metadata = fs::metadata(input).map_err(|source| AnprError::Input {
        path: input.to_path_buf(),
        source,
    })?;
    if metadata.is_file() {
        return Ok(vec![input.to_path_buf()]);
    }

    let mut images = Vec::new();
    for entry in WalkDir::new(input) {
        let entry = entry.map_err(|source| AnprError::Walk {
            path: input.to_path_buf(),
            source,
        })?;
        if entry.file_type().is_file() && has_image_extension(entry.path()) {
            images.push(entry.into_path());
        }
    }
    images.sort();
    Ok(images)
}

/// Scales `image` to `width` pixels, keeping its aspect ratio.
pub fn resize_to_width(image: &Mat, width: i32) -> Result<Mat> {
    if image.empty() || image.cols() == width {
        return Ok(image.try_clone()?);
    }

    let ratio = width as f64 / image.cols() as f64;
    let height = ((image.rows() as f64 * ratio) as i32).max(1);
    let mut resized = Mat::default();
    resize(
        image,
        &mut resized,
        Size::new(width, height),
        0.0,
        0.0,
        INTER_AREA,
    )?;
    Ok(resized)
}

fn read_image(path: &Path) -> Mat {
    let Some(name) = path.to_str() else {
        tracing::warn!("Skipping non UTF-8 path {}", path.display());
        return Mat::default();
    };

    let image = match imread(name, IMREAD_COLOR) {
        Ok(image) if !image.empty() => image,
        Ok(image) => {
            tracing::warn!("Cannot decode {}", path.display());
            return image;
        }
        Err(e) => {
            tracing::warn!("Cannot decode {}: {}", path.display(), e);
            return Mat::default();
        }
    };

    resize_to_width(&image, WORKING_WIDTH).unwrap_or_else(|e| {
        tracing::warn!("Cannot resize {}: {}", path.display(), e);
        Mat::default()
    })
}

impl SourceProcessor for ImageReader {
    type OUTPUT = WriteChannel1<PlateImage>;
    fn handle(
        &mut self,
        mut output: ProcessorWriter<Self::OUTPUT>,
    ) -> std::result::Result<(), RustedPipeError> {
        if self.pending.is_empty() {
            return Err(RustedPipeError::EndOfStream());
        }
        self.wait_turn();
        let Some(path) = self.pending.pop_front() else {
            return Err(RustedPipeError::EndOfStream());
        };

        let image = read_image(&path);
        self.emitted += 1;

        let frame_ts = DataVersion::from_now();
        tracing::debug!("Read {} at {}", path.display(), frame_ts.timestamp_ns);
        if let Err(e) = output.writer.c1().write(PlateImage::new(path, image), &frame_ts) {
            tracing::error!("Cannot write image: {:?}", e);
        }
        Ok(())
    }
}

unsafe impl Send for ImageReader {}
unsafe impl Sync for ImageReader {}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel::unbounded;
    use opencv::core::Scalar;
    use opencv::core::CV_8UC3;
    use pretty_assertions::assert_eq;

    #[test]
    fn lists_only_images_sorted() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.png", "a.JPG", "notes.txt", "c.jpeg", "README"] {
            fs::write(dir.path().join(name), b"").unwrap();
        }
        fs::create_dir(dir.path().join("nested.png")).unwrap();

        let images = list_images(dir.path()).unwrap();
        let names: Vec<_> = images
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["a.JPG", "b.png", "c.jpeg"]);
    }

    #[test]
    fn walks_subdirectories() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("jalisco/2023")).unwrap();
        fs::write(dir.path().join("top.png"), b"").unwrap();
        fs::write(dir.path().join("jalisco/gdl.jpg"), b"").unwrap();
        fs::write(dir.path().join("jalisco/2023/zap.bmp"), b"").unwrap();
        fs::write(dir.path().join("jalisco/2023/list.csv"), b"").unwrap();

        let images = list_images(dir.path()).unwrap();
        let relative: Vec<_> = images
            .iter()
            .map(|p| p.strip_prefix(dir.path()).unwrap().to_path_buf())
            .collect();
        assert_eq!(
            relative,
            vec![
                PathBuf::from("jalisco/2023/zap.bmp"),
                PathBuf::from("jalisco/gdl.jpg"),
                PathBuf::from("top.png"),
            ]
        );
    }

    #[test]
    fn single_file_is_its_own_listing() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("plate.png");
        fs::write(&file, b"").unwrap();

        assert_eq!(list_images(&file).unwrap(), vec![file]);
    }

    #[test]
    fn missing_input_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing");

        assert!(matches!(
            list_images(&missing),
            Err(AnprError::Input { .. })
        ));
    }

    #[test]
    fn reader_counts_pending_images() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["1.png", "2.bmp"] {
            fs::write(dir.path().join(name), b"").unwrap();
        }

        let reader = ImageReader::new(dir.path()).unwrap();
        assert_eq!(reader.len(), 2);
        assert!(!reader.is_empty());
    }

    #[test]
    fn wide_images_are_scaled_to_working_width() {
        let image = Mat::new_rows_cols_with_default(300, 1200, CV_8UC3, Scalar::all(90.0)).unwrap();

        let resized = resize_to_width(&image, WORKING_WIDTH).unwrap();
        assert_eq!((resized.cols(), resized.rows()), (600, 150));
    }

    #[test]
    fn decoded_files_come_out_at_working_width() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("wide.png");
        let image = Mat::new_rows_cols_with_default(500, 2000, CV_8UC3, Scalar::all(90.0)).unwrap();
        opencv::imgcodecs::imwrite(file.to_str().unwrap(), &image, &opencv::core::Vector::<i32>::new())
            .unwrap();

        let read = read_image(&file);
        assert_eq!((read.cols(), read.rows()), (600, 150));
    }

    #[test]
    fn undecodable_file_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("broken.jpg");
        fs::write(&file, b"not a jpeg").unwrap();

        assert!(read_image(&file).empty());
    }

    #[test]
    fn gate_holds_back_every_image_after_the_first() {
        let dir = tempfile::tempdir().unwrap();
        let (gate_s, gate_r) = unbounded();
        let mut reader = ImageReader::new(dir.path()).unwrap().with_gate(gate_r);

        // The first image never waits.
        reader.wait_turn();

        reader.emitted = 1;
        gate_s.send(()).unwrap();
        reader.wait_turn();
        assert!(gate_s.is_empty());

        drop(gate_s);
        reader.wait_turn();
        assert!(reader.gate.is_none());
    }
}
