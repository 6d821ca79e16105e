use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "jwst-lab")]
#[command(
    about = "Search public JWST imaging and spectra for anomaly candidates",
    long_about = None
)]
#[command(version)]
pub struct Cli {
    /// Pipeline configuration file (YAML)
    #[arg(short, long, default_value = "config.yaml", global = true)]
    pub config: PathBuf,

    /// Directory holding data/ and outputs/
    #[arg(short, long, default_value = ".", global = true)]
    pub base_dir: PathBuf,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Check configuration, directories and (optionally) archive access
    Check {
        /// Also send a request to the MAST archive
        #[arg(long)]
        probe_archive: bool,
    },

    /// Query MAST and download JWST products within the configured budget
    Download,

    /// Create synthetic JWST-like images for offline runs
    TestData {
        /// Number of images to create
        #[arg(long, default_value = "3")]
        images: usize,

        /// Image width and height in pixels
        #[arg(long, default_value = "1024")]
        size: usize,
    },

    /// Detect sources in downloaded images and score them for anomalies
    AnalyzeImages,

    /// Extract spectral features and score spectra for anomalies
    AnalyzeSpectra,

    /// Merge image and spectral candidates into one ranked table
    Rank,

    /// Write the Markdown results report
    Report,

    /// Cross-check the top ranked candidates
    Verify,

    /// Run every stage in order
    Run {
        /// Use synthetic images instead of downloading
        #[arg(long)]
        test_mode: bool,

        /// Reuse the manifest from an earlier download
        #[arg(long)]
        skip_download: bool,
    },

    /// Serve the results dashboard
    Serve {
        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Port to listen on
        #[arg(short, long, default_value = "8000")]
        port: u16,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_flags_and_global_options() {
        let cli = Cli::parse_from([
            "jwst-lab",
            "run",
            "--test-mode",
            "--base-dir",
            "/tmp/lab",
            "-v",
        ]);
        assert!(cli.verbose);
        assert_eq!(cli.base_dir, PathBuf::from("/tmp/lab"));
        assert_eq!(cli.config, PathBuf::from("config.yaml"));
        match cli.command {
            Commands::Run {
                test_mode,
                skip_download,
            } => {
                assert!(test_mode);
                assert!(!skip_download);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_serve_defaults() {
        let cli = Cli::parse_from(["jwst-lab", "serve"]);
        match cli.command {
            Commands::Serve { host, port } => {
                assert_eq!(host, "127.0.0.1");
                assert_eq!(port, 8000);
            }
            _ => panic!("expected serve"),
        }
    }
}
