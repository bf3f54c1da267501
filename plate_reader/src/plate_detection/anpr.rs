use opencv::imgproc::cvt_color;
use opencv::imgproc::COLOR_BGR2GRAY;
use opencv::prelude::Mat;
use opencv::prelude::MatTraitConst;
use rusted_pipe::channels::read_channel::InputGenerator;
use rusted_pipe::channels::typed_read_channel::ReadChannel1;
use rusted_pipe::channels::typed_write_channel::WriteChannel1;
use rusted_pipe::graph::processor::Processor;
use rusted_pipe::graph::processor::ProcessorWriter;
use rusted_pipe::RustedPipeError;

use super::candidate_finder::CandidateFinder;
use super::debug_view::DebugView;
use super::plate_locator::PlateLocator;
use super::tesseract_ocr::{TesseractOcr, TesseractOptions};
use super::{PlateImage, PlateReading, PlateResult};
use crate::config::AnprConfig;
use crate::error::{AnprError, Result};

/// Locates the licence plate of a BGR image and reads it with Tesseract.
pub struct Anpr {
    keep: usize,
    clear_border: bool,
    finder: CandidateFinder,
    locator: PlateLocator,
    ocr: TesseractOcr,
    debug: DebugView,
}

impl Anpr {
    /// Intermediate images go to `debug`; pass `DebugView::default()` to
    /// skip them.
    pub fn new(
        config: &AnprConfig,
        tessdata: Option<&str>,
        lang: &str,
        debug: DebugView,
    ) -> Result<Self> {
        config.validate()?;
        let options = TesseractOptions::new(config.psm);

        Ok(Self {
            keep: config.keep,
            clear_border: config.clear_border,
            finder: CandidateFinder::new(debug.clone())?,
            locator: PlateLocator::new(config.min_ar, config.max_ar, debug.clone()),
            ocr: TesseractOcr::new(tessdata, lang, &options)?,
            debug,
        })
    }

    /// Returns the plate found in `image` and its text, or `None` when no
    /// region looked like a plate.
    pub fn find_and_ocr(&mut self, image: &Mat) -> Result<Option<PlateReading>> {
        let gray = if image.channels() == 1 {
            image.try_clone()?
        } else {
            let mut gray = Mat::default();
            cvt_color(image, &mut gray, COLOR_BGR2GRAY, 0)?;
            gray
        };

        let candidates = self.finder.locate_candidates(&gray, self.keep)?;
        let Some(located) = self.locator.locate(&gray, &candidates, self.clear_border)? else {
            return Ok(None);
        };

        let text = self.ocr.read(&located.roi)?;
        self.debug.show("License Plate", &located.roi, false)?;

        Ok(Some(PlateReading::new(text, located.rect, located.contour)))
    }
}

unsafe impl Send for Anpr {}
unsafe impl Sync for Anpr {}

impl Processor for Anpr {
    type INPUT = ReadChannel1<PlateImage>;
    type OUTPUT = WriteChannel1<PlateResult>;
    fn handle(
        &mut self,
        mut input: <Self::INPUT as InputGenerator>::INPUT,
        mut output: ProcessorWriter<Self::OUTPUT>,
    ) -> std::result::Result<(), RustedPipeError> {
        let Some(packet) = input.c1_owned() else {
            return Ok(());
        };
        let PlateImage { path, image } = packet.data;
        tracing::info!("Recognizing {}", path.display());

        let reading = if image.empty() {
            tracing::warn!("{}", AnprError::EmptyImage { path: path.clone() });
            None
        } else {
            match self.find_and_ocr(&image) {
                Ok(reading) => reading,
                Err(e) => {
                    tracing::error!("Recognition failed for {}: {}", path.display(), e);
                    None
                }
            }
        };

        let result = PlateResult {
            path,
            image,
            reading,
        };
        if let Err(e) = output.writer.c1().write(result, &packet.version) {
            tracing::error!("Cannot write plate result: {:?}", e);
        }

        Ok(())
    }
}
