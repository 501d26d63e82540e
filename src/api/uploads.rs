use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    routing::post,
    Json, Router,
};
use serde::Serialize;
use uuid::Uuid;

use crate::api::middleware::auth::AuthUser;
use crate::api::state::AppState;
use crate::error::{AppError, Result};
use crate::models::user::Role;
use crate::services::s3::sanitize_file_name;

const DEFAULT_FOLDER: &str = "uploads";
const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub key: String,
    pub url: String,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/uploads", post(upload))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
}

/// Keeps folder names to safe path segments
fn sanitize_folder(folder: &str) -> Result<String> {
    let segments: Vec<&str> = folder
        .split('/')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();

    if segments.is_empty() {
        return Ok(DEFAULT_FOLDER.to_string());
    }

    let valid = segments.iter().all(|s| {
        *s != ".."
            && *s != "."
            && s.chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    });
    if !valid {
        return Err(AppError::Validation(
            "folder may only contain letters, digits, '-', '_' and '/'".to_string(),
        ));
    }

    Ok(segments.join("/"))
}

pub fn object_key(folder: &str, file_name: &str) -> String {
    format!("{}/{}-{}", folder, Uuid::new_v4(), sanitize_file_name(file_name))
}

async fn upload(
    State(state): State<AppState>,
    auth: AuthUser,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<UploadResponse>)> {
    auth.require(&[Role::Admin])?;

    let storage = state
        .storage
        .as_ref()
        .ok_or_else(|| AppError::StorageUnavailable("File storage is not configured".to_string()))?;

    let mut folder = DEFAULT_FOLDER.to_string();
    let mut file: Option<(String, String, Vec<u8>)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("Invalid multipart body: {}", e)))?
    {
        match field.name() {
            Some("folder") => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| AppError::Validation(format!("Invalid folder field: {}", e)))?;
                folder = sanitize_folder(&value)?;
            }
            Some("file") => {
                let file_name = field.file_name().unwrap_or("file").to_string();
                let content_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::Validation(format!("Invalid file field: {}", e)))?;
                file = Some((file_name, content_type, bytes.to_vec()));
            }
            _ => {}
        }
    }

    let (file_name, content_type, bytes) =
        file.ok_or_else(|| AppError::Validation("file is required".to_string()))?;
    if bytes.is_empty() {
        return Err(AppError::Validation("file is empty".to_string()));
    }

    let key = object_key(&folder, &file_name);
    let size = bytes.len();
    let url = storage
        .put_object(&key, &content_type, bytes)
        .await
        .map_err(|e| AppError::Internal(e.into()))?;

    tracing::info!(key = %key, size, uploaded_by = %auth.user_id, "File uploaded");

    Ok((StatusCode::CREATED, Json(UploadResponse { key, url })))
}
