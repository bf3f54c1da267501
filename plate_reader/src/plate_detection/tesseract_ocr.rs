use std::ffi::CString;
use std::fmt;

use leptess::tesseract::TessApi;
use opencv::core::CV_8UC1;
use opencv::prelude::Mat;
use opencv::prelude::MatTraitConst;
use opencv::prelude::MatTraitConstManual;
use tesseract_plumbing::TessBaseApi;

use crate::config::SINGLE_LINE_PSM;
use crate::error::{AnprError, Result};

/// Characters that can appear on a plate.
pub const PLATE_ALPHABET: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Tesseract settings used to read a plate crop.
#[derive(Clone, Debug, PartialEq)]
pub struct TesseractOptions {
    pub whitelist: String,
    pub psm: u32,
}

impl TesseractOptions {
    pub fn new(psm: u32) -> Self {
        Self {
            whitelist: PLATE_ALPHABET.to_string(),
            psm,
        }
    }

    /// The options as Tesseract variable assignments.
    pub fn variables(&self) -> [(&'static str, String); 2] {
        [
            ("tessedit_char_whitelist", self.whitelist.clone()),
            ("tessedit_pageseg_mode", self.psm.to_string()),
        ]
    }
}

impl Default for TesseractOptions {
    fn default() -> Self {
        Self::new(SINGLE_LINE_PSM)
    }
}

/// Same form as the `tesseract` command line flags.
impl fmt::Display for TesseractOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "-c tessedit_char_whitelist={} --psm {}",
            self.whitelist, self.psm
        )
    }
}

pub struct TesseractOcr {
    ocr: TessApi,
}

impl TesseractOcr {
    /// Loads `lang` from `tessdata`, or from Tesseract's default location when
    /// `None`.
    pub fn new(tessdata: Option<&str>, lang: &str, options: &TesseractOptions) -> Result<Self> {
        let mut api = TessApi::new(tessdata, lang).map_err(|e| AnprError::TesseractInit {
            lang: lang.to_string(),
            message: format!("{e:?}"),
        })?;

        for (name, value) in options.variables() {
            set_variable(&mut api.raw, name, &value)?;
        }
        tracing::debug!("Tesseract ready with options: {}", options);

        Ok(Self { ocr: api })
    }

    /// Reads the text of a single channel 8 bit plate crop. Returns `None`
    /// when nothing was recognized.
    pub fn read(&mut self, roi: &Mat) -> Result<Option<String>> {
        if roi.empty() || roi.typ() != CV_8UC1 {
            return Err(AnprError::Ocr {
                message: format!("expected a non-empty CV_8UC1 crop, got type {}", roi.typ()),
            });
        }

        // Make it contiguous
        let roi = roi.try_clone()?;
        let cols = roi.cols();
        let rows = roi.rows();
        self.ocr
            .raw
            .set_image(roi.data_bytes()?, cols, rows, 1, cols)
            .map_err(|e| AnprError::Ocr {
                message: format!("{e:?}"),
            })?;

        let text = self.ocr.get_utf8_text().map_err(|e| AnprError::Ocr {
            message: format!("{e:?}"),
        })?;
        let text = text.trim();

        if text.is_empty() {
            Ok(None)
        } else {
            Ok(Some(text.to_string()))
        }
    }
}

unsafe impl Send for TesseractOcr {}
unsafe impl Sync for TesseractOcr {}

fn set_variable(raw: &mut TessBaseApi, name: &str, value: &str) -> Result<()> {
    let to_cstring = |s: &str| {
        CString::new(s).map_err(|_| AnprError::TesseractVariable {
            name: name.to_string(),
            message: "value contains a NUL byte".to_string(),
        })
    };
    raw.set_variable(&to_cstring(name)?, &to_cstring(value)?)
        .map_err(|e| AnprError::TesseractVariable {
            name: name.to_string(),
            message: format!("{e:?}"),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn options_render_as_command_line_flags() {
        assert_eq!(
            TesseractOptions::default().to_string(),
            "-c tessedit_char_whitelist=ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789 --psm 7"
        );
        assert_eq!(
            TesseractOptions::new(8).to_string(),
            "-c tessedit_char_whitelist=ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789 --psm 8"
        );
    }

    #[test]
    fn options_map_to_tesseract_variables() {
        let [whitelist, psm] = TesseractOptions::new(6).variables();
        assert_eq!(whitelist, ("tessedit_char_whitelist", PLATE_ALPHABET.to_string()));
        assert_eq!(psm, ("tessedit_pageseg_mode", "6".to_string()));
    }
}
