//! Session options for the skip scan.
//!
//! Register [`SkipScanOptions`] with
//! `SessionConfig::with_option_extension` to make `SET skip_scan.enable`
//! available. Sessions without the extension behave as if it were enabled.

use datafusion::common::config::{ConfigExtension, ConfigOptions};
use datafusion::common::extensions_options;

extensions_options! {
    /// Options controlling [`SkipScanRule`](crate::optimizer::SkipScanRule).
    pub struct SkipScanOptions {
        /// Replace eligible `DISTINCT` index scans with skip scans.
        pub enable: bool, default = true
    }
}

impl ConfigExtension for SkipScanOptions {
    const PREFIX: &'static str = "skip_scan";
}

impl SkipScanOptions {
    /// Whether the skip scan is enabled for a session with `config`.
    pub fn enabled(config: &ConfigOptions) -> bool {
        config
            .extensions
            .get::<SkipScanOptions>()
            .map(|options| options.enable)
            .unwrap_or(true)
    }
}
