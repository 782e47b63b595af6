//! Tracing subscriber setup for programs embedding the inspector.

use tracing_subscriber::EnvFilter;

/// Crates whose detail is raised to `debug` in verbose mode.
const INSPECT_TARGETS: &[&str] = &["a3s_inspect_core", "a3s_inspect_registry"];

/// Build the filter used by [`init_tracing`].
///
/// `RUST_LOG` wins when set. Otherwise the default level is `info`, and the
/// inspect crates log at `debug` when `verbose` is true.
pub fn env_filter(verbose: bool) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives(verbose)))
}

fn default_directives(verbose: bool) -> String {
    let mut directives = vec!["info".to_string()];
    if verbose {
        directives.extend(INSPECT_TARGETS.iter().map(|t| format!("{}=debug", t)));
    }
    directives.join(",")
}

/// Install a global `fmt` subscriber.
///
/// Returns false if a subscriber was already installed.
pub fn init_tracing(verbose: bool, json: bool) -> bool {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter(verbose))
        .with_target(false);
    if json {
        builder.json().try_init().is_ok()
    } else {
        builder.try_init().is_ok()
    }
}
