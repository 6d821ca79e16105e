pub mod archive;
pub mod cli;
pub mod commands;
pub mod config;
pub mod curve_fit;
pub mod fits;
pub mod image_analysis;
pub mod isolation_forest;
pub mod layout;
pub mod logging;
pub mod models;
pub mod ranking;
pub mod render;
pub mod report;
pub mod server;
pub mod spectra;
pub mod synthetic;
pub mod tables;
pub mod utils;
pub mod verify;
pub mod wcs;

// Re-export commonly used items
pub use config::PipelineConfig;
pub use layout::ProjectLayout;
