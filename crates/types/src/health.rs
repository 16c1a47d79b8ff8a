use serde::Serialize;

/// Public observability payload returned by `/health`.
///
/// Fields stay integer/boolean/string-only so the structure serializes
/// deterministically and can be shared between crates without extra
/// dependencies.
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
    pub storage_backend: String,
    pub storage_healthy: bool,
    pub node_count: u64,
    pub uptime_seconds: u64,
    pub version: String,
}
