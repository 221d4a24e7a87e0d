//! Utility modules for labelify.

mod duration;

pub use duration::{DurationParseError, parse_duration};
