use anyhow::Result;
use clap::Parser;

use jwst_lab::cli::{Cli, Commands};
use jwst_lab::commands::{
    analyze_images, analyze_spectra, create_test_data, download, make_report, rank, run_pipeline,
    setup_check, verify, RunOptions,
};
use jwst_lab::config::PipelineConfig;
use jwst_lab::layout::ProjectLayout;
use jwst_lab::synthetic::SyntheticOptions;

fn load_config(cli: &Cli) -> Result<PipelineConfig> {
    let config = PipelineConfig::load(&cli.config)?;
    config.validate()?;
    Ok(config)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    jwst_lab::logging::init(cli.verbose);

    let layout = ProjectLayout::new(&cli.base_dir);

    match &cli.command {
        Commands::Check { probe_archive } => {
            setup_check(&cli.config, &layout, *probe_archive)?;
        }
        Commands::Download => {
            let config = load_config(&cli)?;
            download(&config, &layout)?;
        }
        Commands::TestData { images, size } => {
            let config = load_config(&cli)?;
            let options = SyntheticOptions {
                n_images: *images,
                size: *size,
                seed: config.random_seed,
            };
            create_test_data(&layout, &options)?;
        }
        Commands::AnalyzeImages => {
            let config = load_config(&cli)?;
            analyze_images(&config, &layout)?;
        }
        Commands::AnalyzeSpectra => {
            let config = load_config(&cli)?;
            analyze_spectra(&config, &layout)?;
        }
        Commands::Rank => {
            rank(&layout)?;
        }
        Commands::Report => {
            let config = load_config(&cli)?;
            make_report(&config, &layout)?;
        }
        Commands::Verify => {
            let config = load_config(&cli)?;
            verify(&config, &layout)?;
        }
        Commands::Run {
            test_mode,
            skip_download,
        } => {
            let options = RunOptions {
                test_mode: *test_mode,
                skip_download: *skip_download,
                ..RunOptions::default()
            };
            run_pipeline(&cli.config, &layout, &options)?;
        }
        Commands::Serve { host, port } => {
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(jwst_lab::server::run_server(layout, host.clone(), *port))?;
        }
    }

    Ok(())
}
