pub mod config;
pub mod error;
pub mod logging;
pub mod plate_detection;

pub use config::AnprConfig;
pub use error::{AnprError, Result};
