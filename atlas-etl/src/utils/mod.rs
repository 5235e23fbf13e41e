//! Utility modules for atlas-etl

pub mod db_retry;
pub mod year_parser;

pub use db_retry::retry_on_lock;
pub use year_parser::{parse_iso_year, parse_year_label};
