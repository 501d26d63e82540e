use secrecy::Secret;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: String,
    pub host: String,
    pub port: u16,

    // Database pool
    pub db_max_connections: u32,
    pub db_acquire_timeout_secs: u64,

    // Auth
    pub jwt_secret: Secret<String>,
    pub token_ttl_hours: i64,

    // First administrator, created at startup when no admin exists
    pub bootstrap_admin_email: Option<String>,
    pub bootstrap_admin_password: Option<Secret<String>>,

    // Receipts
    pub gym_name: String,

    // S3-compatible object storage
    pub s3: Option<S3Config>,

    pub cors_origin: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: Secret<String>,
    /// Defaults to `https://s3.<region>.amazonaws.com`
    pub endpoint: Option<String>,
}

impl S3Config {
    pub fn endpoint(&self) -> String {
        match &self.endpoint {
            Some(endpoint) => endpoint.trim_end_matches('/').to_string(),
            None => format!("https://s3.{}.amazonaws.com", self.region),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, config::ConfigError> {
        // Load .env file if it exists (for local development)
        let _ = dotenvy::dotenv();

        let config = config::Config::builder()
            .add_source(config::Environment::default().separator("__"))
            .build()?;

        // S3 is only enabled when all of its required keys are present
        let s3 = match (
            config.get::<String>("s3_bucket").ok(),
            config.get::<String>("s3_region").ok(),
            config.get::<String>("s3_access_key_id").ok(),
            config.get::<String>("s3_secret_access_key").ok(),
        ) {
            (Some(bucket), Some(region), Some(access_key_id), Some(secret_access_key)) => {
                Some(S3Config {
                    bucket,
                    region,
                    access_key_id,
                    secret_access_key: Secret::new(secret_access_key),
                    endpoint: config.get("s3_endpoint").ok(),
                })
            }
            _ => None,
        };

        Ok(Self {
            database_url: config.get("database_url")?,
            host: config.get("host").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: config.get("port")?,

            db_max_connections: config.get("db_max_connections").unwrap_or(20),
            db_acquire_timeout_secs: config.get("db_acquire_timeout_secs").unwrap_or(3),

            jwt_secret: Secret::new(config.get("jwt_secret")?),
            token_ttl_hours: config.get("token_ttl_hours").unwrap_or(12),

            bootstrap_admin_email: config.get("bootstrap_admin_email").ok(),
            bootstrap_admin_password: config
                .get::<String>("bootstrap_admin_password")
                .ok()
                .map(Secret::new),

            gym_name: config
                .get("gym_name")
                .unwrap_or_else(|_| "GymDesk".to_string()),

            s3,

            cors_origin: config.get("cors_origin").ok(),
        })
    }
}
