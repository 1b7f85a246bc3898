//! Utility modules
//!
//! - `file` - path expansion for config files
//! - `time` - dated index names

pub mod file;
pub mod time;
