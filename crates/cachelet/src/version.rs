//! Version information for cachelet.

/// Cachelet version from Cargo.toml
pub const CACHELET_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Highest client protocol version this server understands.
pub const PROTOCOL_VERSION: u8 = 1;

/// Version information reported to clients after authentication.
#[derive(Debug, Clone, serde::Serialize)]
pub struct VersionInfo {
    /// Cachelet server version.
    pub cachelet: &'static str,
    /// Client protocol version.
    pub protocol: u8,
    /// Cluster name (if configured).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster: Option<String>,
}

impl Default for VersionInfo {
    fn default() -> Self {
        Self {
            cachelet: CACHELET_VERSION,
            protocol: PROTOCOL_VERSION,
            cluster: None,
        }
    }
}

impl VersionInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cluster(mut self, cluster: String) -> Self {
        self.cluster = Some(cluster);
        self
    }
}
