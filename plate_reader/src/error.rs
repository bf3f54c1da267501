use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while locating and reading licence plates.
#[derive(Error, Debug)]
pub enum AnprError {
    #[error("OpenCV error: {0}")]
    OpenCv(#[from] opencv::Error),

    #[error("Cannot initialise Tesseract with language {lang}: {message}")]
    TesseractInit { lang: String, message: String },

    #[error("Cannot set Tesseract variable {name}: {message}")]
    TesseractVariable { name: String, message: String },

    #[error("Tesseract OCR failed: {message}")]
    Ocr { message: String },

    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    #[error("Cannot read input {path}")]
    Input {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot list images under {path}")]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("Image {path} is empty or could not be decoded")]
    EmptyImage { path: PathBuf },
}

pub type Result<T> = std::result::Result<T, AnprError>;
