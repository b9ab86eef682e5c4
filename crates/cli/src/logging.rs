use env_logger::{Builder, Env, Target};

/// Filter applied when `RUST_LOG` is unset.
/// `--quiet` and `--verbose` win over the configured `log_level`.
pub fn default_filter(verbose: bool, quiet: bool, configured: Option<&str>) -> String {
    if quiet {
        return "warn".to_string();
    }
    if verbose {
        return "debug".to_string();
    }
    configured
        .map(str::trim)
        .filter(|level| !level.is_empty())
        .unwrap_or("info")
        .to_string()
}

/// Log to stderr so stdout stays free for command output.
/// Calling it twice is harmless.
pub fn init(verbose: bool, quiet: bool, configured: Option<&str>) {
    let filter = default_filter(verbose, quiet, configured);
    let mut builder = Builder::from_env(Env::default().default_filter_or(filter));
    builder.target(Target::Stderr);
    if builder.try_init().is_err() {
        log::debug!("Logger already initialized");
    }
}
