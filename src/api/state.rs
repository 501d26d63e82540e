use axum::extract::FromRef;
use sqlx::PgPool;

use crate::config::Config;
use crate::services::s3::S3Client;

/// Shared application state handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Config,
    /// None when S3 is not configured
    pub storage: Option<S3Client>,
}

impl AppState {
    pub fn new(pool: PgPool, config: Config) -> Self {
        let storage = config
            .s3
            .clone()
            .map(|s3| S3Client::new(reqwest::Client::new(), s3));

        Self {
            pool,
            config,
            storage,
        }
    }
}

impl FromRef<AppState> for PgPool {
    fn from_ref(state: &AppState) -> PgPool {
        state.pool.clone()
    }
}
