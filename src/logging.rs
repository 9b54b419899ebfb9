use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize JSON logging on stderr.
///
/// Stdout carries the native messaging frames, so nothing else may write
/// there. `quiet` wins over `verbose`; `RUST_LOG` directives still apply.
pub fn init_logging(quiet: bool, verbose: bool) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_current_span(false)
                .with_span_list(false),
        )
        .with(
            EnvFilter::from_default_env().add_directive(
                directive(quiet, verbose)
                    .parse()
                    .expect("Invalid log directive"),
            ),
        )
        .init();
}

fn directive(quiet: bool, verbose: bool) -> &'static str {
    match (quiet, verbose) {
        (true, _) => "refresh_it=error",
        (false, true) => "refresh_it=debug",
        (false, false) => "refresh_it=info",
    }
}
