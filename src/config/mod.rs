use std::env;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub database_max_connections: u32,
    pub host: String,
    pub port: u16,
    /// Hard ceiling on alert webhook bodies, in bytes.
    pub alert_max_payload_bytes: usize,
    /// Findings processed per reconciliation transaction.
    pub reconcile_batch_size: usize,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, env::VarError> {
        Ok(Self {
            database_url: env::var("DATABASE_URL")?,
            database_max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .unwrap_or(10),
            host: env::var("BACKEND_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env::var("BACKEND_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .unwrap_or(3000),
            alert_max_payload_bytes: env::var("ALERT_MAX_PAYLOAD_BYTES")
                .unwrap_or_else(|_| "1048576".to_string())
                .parse()
                .unwrap_or(1_048_576),
            reconcile_batch_size: env::var("RECONCILE_BATCH_SIZE")
                .unwrap_or_else(|_| "250".to_string())
                .parse()
                .unwrap_or(250),
        })
    }
}
