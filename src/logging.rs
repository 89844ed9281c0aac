//! Logger setup for the host binary.
//!
//! `PROCWATCH_LOG` (or `RUST_LOG`) wins over the configured level. Logs go to
//! stderr so they do not interleave with the REPL prompt on stdout.

use env_logger::{Builder, Env, Target};

pub const LOG_ENV: &str = "PROCWATCH_LOG";

/// Install the global logger. Calling it twice is harmless.
pub fn init_logging(default_level: &str) {
    let env = Env::default()
        .filter_or(LOG_ENV, std::env::var("RUST_LOG").unwrap_or_else(|_| default_level.to_string()));
    let _ = Builder::from_env(env).target(Target::Stderr).try_init();
}
