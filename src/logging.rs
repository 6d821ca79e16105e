use tracing_subscriber::EnvFilter;

/// `RUST_LOG` wins when set; otherwise `info`, or `debug` with `--verbose`
pub fn default_filter(verbose: bool) -> &'static str {
    if verbose {
        "jwst_lab=debug,tower_http=debug,info"
    } else {
        "info"
    }
}

pub fn init(verbose: bool) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_filter(verbose))),
        )
        .with_target(false)
        .init();
}
