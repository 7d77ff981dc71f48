//! Tracing subscriber setup for host applications.

use tracing_subscriber::filter::Directive;
use tracing_subscriber::EnvFilter;

/// Default directive applied on top of `RUST_LOG`.
pub const DEFAULT_DIRECTIVE: &str = "rentflow_core=info";

/// Install a global fmt subscriber filtered by `RUST_LOG` plus `directive`.
///
/// Falls back to [`DEFAULT_DIRECTIVE`] when `directive` does not parse.
/// Later calls are ignored once a subscriber is installed.
pub fn init_tracing(directive: &str) {
    let mut filter = EnvFilter::from_default_env();
    if let Ok(directive) = directive
        .parse::<Directive>()
        .or_else(|_| DEFAULT_DIRECTIVE.parse::<Directive>())
    {
        filter = filter.add_directive(directive);
    }

    if tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .is_err()
    {
        tracing::debug!("Tracing subscriber already installed");
    }
}
