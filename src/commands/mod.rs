pub mod analyze_images;
pub mod analyze_spectra;
pub mod download;
pub mod rank;
pub mod report;
pub mod run_pipeline;
pub mod setup_check;
pub mod test_data;
pub mod verify;

pub use analyze_images::analyze_images;
pub use analyze_spectra::analyze_spectra;
pub use download::download;
pub use rank::rank;
pub use report::make_report;
pub use run_pipeline::{run_pipeline, RunOptions};
pub use setup_check::setup_check;
pub use test_data::create_test_data;
pub use verify::{verify, verify_with};
