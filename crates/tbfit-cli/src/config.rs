mod builder;
mod defaults;
mod file;
mod models;

pub use builder::{build_evaluate_config, build_fit_config, materials_path};
