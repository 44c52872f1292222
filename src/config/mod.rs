use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000"). Optional for the cleanup binary.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// PostgreSQL connection string
    pub database_url: String,

    /// Hugging Face Space base URL exposing the face fusion API
    #[serde(default = "default_hf_space_url")]
    pub hf_space_url: String,

    /// Hugging Face API token (the Space is private)
    pub hf_api_token: String,

    /// Upstream call timeout in seconds
    #[serde(default = "default_fusion_timeout_secs")]
    pub fusion_timeout_secs: u64,

    /// Maximum attempts per fusion call (including the first)
    #[serde(default = "default_fusion_max_attempts")]
    pub fusion_max_attempts: u32,

    /// R2 bucket name
    pub r2_bucket: String,

    /// R2 access key ID (S3-compatible)
    pub r2_access_key: String,

    /// R2 secret access key (S3-compatible)
    pub r2_secret_key: String,

    /// R2 endpoint URL
    pub r2_endpoint: String,

    /// Public base URL under which stored objects are reachable
    pub r2_public_base: String,

    /// Optional JSON file overriding the built-in historical figure catalog
    #[serde(default)]
    pub figures_path: Option<String>,

    /// How long generated artifacts are retained before the expiry sweep
    #[serde(default = "default_retention_hours")]
    pub retention_hours: i64,

    /// Upper bound on in-flight upstream fusion calls
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,

    /// Self-heal window for a leaked capacity slot, in seconds
    #[serde(default = "default_capacity_ttl_secs")]
    pub capacity_ttl_secs: u64,

    /// Period of the background expiry sweep, in hours
    #[serde(default = "default_cleanup_interval_hours")]
    pub cleanup_interval_hours: u64,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_hf_space_url() -> String {
    "https://mnraynor90-facefusionfastapi-private.hf.space".to_string()
}

fn default_fusion_timeout_secs() -> u64 {
    300
}

fn default_fusion_max_attempts() -> u32 {
    3
}

fn default_retention_hours() -> i64 {
    48
}

fn default_max_concurrent_jobs() -> usize {
    2
}

fn default_capacity_ttl_secs() -> u64 {
    300
}

fn default_cleanup_interval_hours() -> u64 {
    6
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }
}
