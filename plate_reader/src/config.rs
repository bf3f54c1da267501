use crate::error::{AnprError, Result};

/// Tesseract page segmentation mode that treats the image as one line of text.
pub const SINGLE_LINE_PSM: u32 = 7;

/// Highest page segmentation mode Tesseract understands.
pub const MAX_PSM: u32 = 13;

/// Parameters of the plate localization and OCR steps.
///
/// The aspect ratio bounds are tuned for Mexican plates, which are roughly
/// twice as wide as they are tall.
#[derive(Clone, Debug, PartialEq)]
pub struct AnprConfig {
    /// Minimum width / height ratio of a plate bounding box.
    pub min_ar: f64,
    /// Maximum width / height ratio of a plate bounding box.
    pub max_ar: f64,
    /// Number of largest contours kept as plate candidates.
    pub keep: usize,
    pub psm: u32,
    /// Drop foreground blobs touching the edge of the plate crop before OCR.
    pub clear_border: bool,
}

impl Default for AnprConfig {
    fn default() -> Self {
        Self {
            min_ar: 1.3,
            max_ar: 3.0,
            keep: 5,
            psm: SINGLE_LINE_PSM,
            clear_border: false,
        }
    }
}

impl AnprConfig {
    pub fn validate(&self) -> Result<()> {
        if self.min_ar.is_nan() || self.min_ar <= 0.0 {
            return Err(invalid(format!(
                "minimum aspect ratio must be positive, got {}",
                self.min_ar
            )));
        }
        if self.min_ar > self.max_ar {
            return Err(invalid(format!(
                "minimum aspect ratio {} is above maximum {}",
                self.min_ar, self.max_ar
            )));
        }
        if self.keep == 0 {
            return Err(invalid("at least one candidate must be kept".to_string()));
        }
        if self.psm > MAX_PSM {
            return Err(invalid(format!(
                "page segmentation mode must be between 0 and {MAX_PSM}, got {}",
                self.psm
            )));
        }
        Ok(())
    }
}

fn invalid(message: String) -> AnprError {
    AnprError::InvalidConfig { message }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = AnprConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.psm, 7);
        assert_eq!(config.keep, 5);
    }

    #[test]
    fn rejects_inverted_ratio_bounds() {
        let config = AnprConfig {
            min_ar: 4.0,
            max_ar: 2.0,
            ..AnprConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(AnprError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn rejects_non_positive_ratio() {
        let config = AnprConfig {
            min_ar: 0.0,
            ..AnprConfig::default()
        };
        assert!(config.validate().is_err());

        let config = AnprConfig {
            min_ar: f64::NAN,
            ..AnprConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_keep_and_unknown_psm() {
        let config = AnprConfig {
            keep: 0,
            ..AnprConfig::default()
        };
        assert!(config.validate().is_err());

        let config = AnprConfig {
            psm: 14,
            ..AnprConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
