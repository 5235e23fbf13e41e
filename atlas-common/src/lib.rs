//! # Atlas Common Library
//!
//! Shared code for the historical-event atlas services:
//! - Error and result types
//! - Configuration file and root folder resolution
//! - Historical period derivation
//! - Logging initialisation

pub mod config;
pub mod error;
pub mod logging;
pub mod period;

pub use error::{Error, Result};
pub use period::Period;
