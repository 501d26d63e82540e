use axum::{
    extract::State,
    http::StatusCode,
    routing::get,
    Json, Router,
};
use chrono::NaiveDate;
use serde::Deserialize;
use uuid::Uuid;

use crate::api::extract::{AppJson, AppPath, AppQuery};
use crate::api::middleware::auth::AuthUser;
use crate::api::state::AppState;
use crate::api::{hash_password, required, validate_email};
use crate::error::{AppError, Result};
use crate::models::member::{CreateMemberData, Member, MemberFilter, UpdateMemberData};
use crate::models::user::{CreateUserData, Role, User};

#[derive(Debug, Deserialize)]
pub struct ListMembersQuery {
    pub search: Option<String>,
    pub active: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct CreateMemberRequest {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub photo_url: Option<String>,
    /// When present a member login is created alongside the record
    pub password: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateMemberRequest {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub photo_url: Option<String>,
}

impl UpdateMemberRequest {
    /// Validates the request and stores the email in its canonical form
    fn normalized(mut self) -> Result<Self> {
        self.email = self.email.as_deref().map(validate_email).transpose()?;
        for (field, value) in [("first_name", &self.first_name), ("last_name", &self.last_name)] {
            if let Some(value) = value {
                required(field, value)?;
            }
        }
        Ok(self)
    }

    /// Members editing themselves may only touch contact fields
    fn into_data(self, full_access: bool) -> UpdateMemberData {
        if full_access {
            UpdateMemberData {
                first_name: self.first_name,
                last_name: self.last_name,
                email: self.email,
                phone: self.phone,
                birth_date: self.birth_date,
                photo_url: self.photo_url,
            }
        } else {
            UpdateMemberData {
                email: self.email,
                phone: self.phone,
                photo_url: self.photo_url,
                ..Default::default()
            }
        }
    }
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/members", get(list_members).post(create_member))
        .route(
            "/api/members/:id",
            get(show_member).put(update_member).delete(delete_member),
        )
}

async fn list_members(
    State(state): State<AppState>,
    auth: AuthUser,
    AppQuery(query): AppQuery<ListMembersQuery>,
) -> Result<Json<Vec<Member>>> {
    auth.require(&[Role::Admin, Role::Trainer])?;

    let members = Member::list(
        &state.pool,
        &MemberFilter {
            search: query.search,
            active: query.active,
        },
    )
    .await?;

    Ok(Json(members))
}

async fn create_member(
    State(state): State<AppState>,
    auth: AuthUser,
    AppJson(req): AppJson<CreateMemberRequest>,
) -> Result<(StatusCode, Json<Member>)> {
    auth.require(&[Role::Admin])?;

    let first_name = required("first_name", &req.first_name)?;
    let last_name = required("last_name", &req.last_name)?;
    let email = validate_email(&req.email)?;

    let password_hash = match req.password.as_deref() {
        Some(password) => Some(hash_password(password).await?),
        None => None,
    };

    let mut tx = state.pool.begin().await?;

    let member = Member::create(
        &mut *tx,
        CreateMemberData {
            first_name,
            last_name,
            email: email.clone(),
            phone: req.phone,
            birth_date: req.birth_date,
            photo_url: req.photo_url,
        },
    )
    .await?;

    if let Some(password_hash) = password_hash {
        User::create(
            &mut *tx,
            CreateUserData {
                email,
                password_hash,
                full_name: member.full_name(),
                role: Role::Member,
                member_id: Some(member.id),
            },
        )
        .await?;
    }

    tx.commit().await?;

    tracing::info!(member_id = %member.id, created_by = %auth.user_id, "Member created");

    Ok((StatusCode::CREATED, Json(member)))
}

async fn show_member(
    State(state): State<AppState>,
    auth: AuthUser,
    AppPath(id): AppPath<Uuid>,
) -> Result<Json<Member>> {
    if !auth.can_view_member(id) {
        return Err(AppError::Forbidden);
    }

    let member = Member::find_by_id(&state.pool, id)
        .await?
        .ok_or_else(|| AppError::not_found("Member"))?;

    Ok(Json(member))
}

async fn update_member(
    State(state): State<AppState>,
    auth: AuthUser,
    AppPath(id): AppPath<Uuid>,
    AppJson(req): AppJson<UpdateMemberRequest>,
) -> Result<Json<Member>> {
    let full_access = auth.is_admin();
    if !full_access && auth.own_member_id().ok() != Some(id) {
        return Err(AppError::Forbidden);
    }

    let data = req.normalized()?.into_data(full_access);
    let email_changed = data.email.is_some();

    let mut tx = state.pool.begin().await?;
    let member = Member::update(&mut *tx, id, data)
        .await?
        .ok_or_else(|| AppError::not_found("Member"))?;
    if email_changed {
        User::update_email_for_member(&mut *tx, member.id, &member.email).await?;
    }
    tx.commit().await?;

    tracing::info!(member_id = %member.id, updated_by = %auth.user_id, "Member updated");

    Ok(Json(member))
}

async fn delete_member(
    State(state): State<AppState>,
    auth: AuthUser,
    AppPath(id): AppPath<Uuid>,
) -> Result<StatusCode> {
    auth.require(&[Role::Admin])?;

    let mut tx = state.pool.begin().await?;
    if !Member::deactivate(&mut *tx, id).await? {
        return Err(AppError::not_found("Member"));
    }
    User::deactivate_for_member(&mut *tx, id).await?;
    tx.commit().await?;

    tracing::info!(member_id = %id, deactivated_by = %auth.user_id, "Member deactivated");

    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> UpdateMemberRequest {
        UpdateMemberRequest {
            first_name: Some("Ana".to_string()),
            last_name: None,
            email: Some("ana@example.com".to_string()),
            phone: Some("555-0101".to_string()),
            birth_date: NaiveDate::from_ymd_opt(1990, 1, 1),
            photo_url: None,
        }
    }

    #[test]
    fn test_self_update_keeps_only_contact_fields() {
        let data = request().into_data(false);
        assert!(data.first_name.is_none());
        assert!(data.birth_date.is_none());
        assert_eq!(data.phone.as_deref(), Some("555-0101"));
        assert_eq!(data.email.as_deref(), Some("ana@example.com"));
    }

    #[test]
    fn test_admin_update_keeps_everything() {
        let data = request().into_data(true);
        assert_eq!(data.first_name.as_deref(), Some("Ana"));
        assert!(data.birth_date.is_some());
    }

    #[test]
    fn test_update_email_is_normalized() {
        let mut req = request();
        req.email = Some("  Ana.Lopez@Example.COM ".to_string());
        let data = req.normalized().unwrap().into_data(false);
        assert_eq!(data.email.as_deref(), Some("ana.lopez@example.com"));
    }

    #[test]
    fn test_update_rejects_bad_email_and_blank_names() {
        let mut req = request();
        req.email = Some("sin-arroba".to_string());
        assert!(matches!(req.normalized(), Err(AppError::Validation(_))));

        let mut req = request();
        req.first_name = Some("   ".to_string());
        assert!(matches!(req.normalized(), Err(AppError::Validation(_))));
    }
}
