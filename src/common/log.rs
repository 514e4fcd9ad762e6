//! Logging helpers
//!
//! The library itself only emits through the `log` macros; this module
//! provides the initialization helper for embedders and tests.

/// Initialize the logging system
///
/// # Parameters
///
/// * `level` - Default log level, overridable through `RUST_LOG`
pub fn init_logger(level: &str) {
    let env = env_logger::Env::default().filter_or("RUST_LOG", level);

    let _ = env_logger::Builder::from_env(env).try_init();
}
