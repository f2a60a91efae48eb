//! Tracing setup for the `schemaman` binary.
//!
//! Log lines go to stderr so stdout carries only command output. Unless
//! `RUST_LOG` says otherwise, the schemaman crates log at the requested
//! level and every dependency logs warnings only.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

use crate::config::RunOptions;

const OWN_TARGETS: [&str; 3] = ["schemaman", "schemaman_core", "schemaman_state"];

/// Filter directive used when `RUST_LOG` is unset.
pub fn default_directive(level: Level) -> String {
    let level = level.as_str().to_ascii_lowercase();
    OWN_TARGETS
        .iter()
        .fold(String::from("warn"), |mut directive, target| {
            directive.push_str(&format!(",{target}={level}"));
            directive
        })
}

/// Log level implied by the run options.
pub fn level_for(options: RunOptions) -> Level {
    if options.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    }
}

/// Install the global subscriber, as JSON lines when `json` is set.
///
/// Only the first call in a process takes effect.
pub fn init_tracing(json: bool, level: Level) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(level)));

    let output = fmt::layer().with_target(false).with_writer(std::io::stderr);
    let output = if json {
        output.json().boxed()
    } else {
        output.boxed()
    };

    tracing_subscriber::registry()
        .with(output)
        .with(filter)
        .try_init()
        .ok();
}
