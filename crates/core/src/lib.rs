pub mod config;
pub mod error;
pub mod tags;

/// Package name used to build the `managed-by` tag.
pub const PACKAGE_NAME: &str = "rowdy";

/// Crate version used to build the `managed-by` tag.
pub const PACKAGE_VERSION: &str = env!("CARGO_PKG_VERSION");
