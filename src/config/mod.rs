//! The configuration surface of the binary: a small TOML file.

use std::num::{NonZeroU64, NonZeroUsize};
use std::path::PathBuf;

use serde::Deserialize;
pub use validator::Validate;

use crate::collector::Strategy;

/// The default config, also used as the editor template of
/// [`crate::cli::Cli::get_config_from_editor`].
pub const DEFAULT_CONFIG_STR: &str = include_str!("default.toml");

/// The parsed and validated configuration.
#[non_exhaustive]
#[derive(Debug, Deserialize, Clone, Validate)]
pub struct Config {
    /// The listing endpoint to page through, without query parameters.
    #[validate(url(message = "base_url must be a valid URL"))]
    pub base_url: String,
    /// The page size of every window request.
    pub limit: NonZeroU64,
    /// The pool size of the `threads` strategy.
    pub workers: NonZeroUsize,
    /// The execution strategy, unless overridden on the command line.
    pub strategy: Strategy,
    /// The directory the output file is written to.
    pub output_dir: PathBuf,
    /// The output file is named `<output_prefix>_<strategy>.json`.
    #[validate(length(min = 1, message = "output_prefix must not be empty"))]
    pub output_prefix: String,
    /// The request timeout in seconds. `0` disables the timeout.
    pub timeout: u64,
}
