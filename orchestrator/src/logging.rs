//! Diagnostics on stderr through `tracing`.
//!
//! The pass report on stdout and `.orchestrator/state.json` are the product
//! output; neither depends on the log level chosen here.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Filter directive for the number of `-v` flags, used when `RUST_LOG` is unset.
pub fn directive_for(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "orchestrator=info,warn",
        2 => "orchestrator=debug,warn",
        _ => "orchestrator=trace,info",
    }
}

/// Install the stderr subscriber. `RUST_LOG` takes precedence over `verbosity`.
pub fn init(verbosity: u8) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(directive_for(verbosity)));
    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(verbosity > 1)
                .compact(),
        )
        .try_init();
    if let Err(err) = installed {
        eprintln!("logging disabled: {err}");
    }
}
