pub mod api;
pub mod config;
pub mod domain;
pub mod infrastructure;

/// Returns the NewsFlux user agent string with the current version
///
/// Format: "NewsFlux/X.Y.Z"
///
/// The version is read from Cargo.toml at compile time, ensuring it's
/// always in sync with the package version.
pub fn user_agent() -> String {
    format!("NewsFlux/{}", env!("CARGO_PKG_VERSION"))
}
