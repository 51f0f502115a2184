pub mod builder;
pub mod compiled_units;
pub mod output_parser;

pub use builder::{BuildFlags, build_package};
pub use output_parser::{BuildOutput, extract_json, parse_build_json};
