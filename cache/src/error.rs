use thiserror::Error;

/// Errors raised by the control-plane operations of the cache (building,
/// configuring, and starting the background worker).
///
/// Data-path operations (`get`, `set`, `del`) never fail with an error; they
/// signal misses and rejections through `Option`/`bool` return values.
#[derive(Debug, Error)]
pub enum Error {
  #[error("Invalid configuration value for '{field}': {message}")]
  InvalidConfig {
    field: &'static str,
    message: String,
  },

  #[error("Failed to spawn the cache worker thread: {0}")]
  WorkerSpawn(#[from] std::io::Error),
}

/// A specialized `Result` type for `fibre_lru` operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;
