//! Distribution file parsing and launch configuration resolution

mod dist_file;
mod merge;
mod resolver;

pub use dist_file::*;
pub use merge::*;
pub use resolver::*;
