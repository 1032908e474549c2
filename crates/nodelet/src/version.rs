//! Version information for nodelet.

/// Nodelet version from Cargo.toml
pub const NODELET_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Version information reported on the health endpoint.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct VersionInfo {
    pub nodelet: &'static str,
}

impl Default for VersionInfo {
    fn default() -> Self {
        Self {
            nodelet: NODELET_VERSION,
        }
    }
}

impl VersionInfo {
    pub fn new() -> Self {
        Self::default()
    }
}
