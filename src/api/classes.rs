use axum::{
    extract::State,
    http::StatusCode,
    routing::{delete, get},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::api::extract::{AppJson, AppPath, AppQuery};
use crate::api::middleware::auth::AuthUser;
use crate::api::required;
use crate::api::state::AppState;
use crate::error::{AppError, Result};
use crate::models::gym_class::{
    AgendaEntry, ClassFilter, ClassListing, ClassReservation, CreateClassData, GymClass,
    RosterEntry, UpdateClassData,
};
use crate::models::membership::{Membership, MembershipStatus};
use crate::models::notification::NewNotification;
use crate::models::user::{Role, User};
use crate::services::notifier::{self, kind};

#[derive(Debug, Deserialize)]
pub struct ListClassesQuery {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub trainer_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct CreateClassRequest {
    pub name: String,
    pub description: Option<String>,
    /// Required for admins; trainers always create their own classes
    pub trainer_id: Option<Uuid>,
    pub starts_at: DateTime<Utc>,
    pub duration_minutes: i32,
    pub capacity: i32,
    pub room: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateClassRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub starts_at: Option<DateTime<Utc>>,
    pub duration_minutes: Option<i32>,
    pub capacity: Option<i32>,
    pub room: Option<String>,
}

/// Why a reservation can't be taken
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReservationError {
    #[error("An active membership is required to reserve classes")]
    NoActiveMembership,

    #[error("Class has already started")]
    ClassStarted,

    #[error("Class already reserved")]
    AlreadyReserved,

    #[error("Class is full")]
    Full,
}

impl From<ReservationError> for AppError {
    fn from(error: ReservationError) -> Self {
        match error {
            ReservationError::NoActiveMembership => {
                tracing::debug!("Reservation without active membership");
                AppError::Forbidden
            }
            ReservationError::ClassStarted => AppError::Validation(error.to_string()),
            ReservationError::AlreadyReserved | ReservationError::Full => {
                AppError::Conflict(error.to_string())
            }
        }
    }
}

/// Checks every reservation precondition, in the order they are reported
pub fn check_reservation(
    class: &GymClass,
    now: DateTime<Utc>,
    membership: Option<MembershipStatus>,
    already_reserved: bool,
    reserved: i64,
) -> std::result::Result<(), ReservationError> {
    if membership != Some(MembershipStatus::Active) {
        return Err(ReservationError::NoActiveMembership);
    }
    if class.starts_at <= now {
        return Err(ReservationError::ClassStarted);
    }
    if already_reserved {
        return Err(ReservationError::AlreadyReserved);
    }
    if reserved >= i64::from(class.capacity) {
        return Err(ReservationError::Full);
    }
    Ok(())
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/classes", get(list_classes).post(create_class))
        .route("/api/classes/:id", get(show_class).put(update_class).delete(delete_class))
        .route(
            "/api/classes/:id/reservations",
            get(class_roster).post(reserve_class),
        )
        .route("/api/reservations/me", get(my_reservations))
        .route("/api/reservations/:id", delete(cancel_reservation))
}

fn validate_shape(duration_minutes: Option<i32>, capacity: Option<i32>) -> Result<()> {
    if matches!(duration_minutes, Some(d) if d <= 0) {
        return Err(AppError::Validation(
            "duration_minutes must be greater than zero".to_string(),
        ));
    }
    if matches!(capacity, Some(c) if c <= 0) {
        return Err(AppError::Validation(
            "capacity must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

/// Checks an edit against the reservations already taken and the clock
fn check_update(req: &UpdateClassRequest, reserved: i64, now: DateTime<Utc>) -> Result<()> {
    if matches!(req.starts_at, Some(starts_at) if starts_at <= now) {
        return Err(AppError::Validation(
            "starts_at must be in the future".to_string(),
        ));
    }
    if matches!(req.capacity, Some(c) if i64::from(c) < reserved) {
        return Err(AppError::Conflict(format!(
            "capacity cannot drop below the {} reservations already taken",
            reserved
        )));
    }
    Ok(())
}

async fn list_classes(
    State(state): State<AppState>,
    _auth: AuthUser,
    AppQuery(query): AppQuery<ListClassesQuery>,
) -> Result<Json<Vec<ClassListing>>> {
    let classes = GymClass::list(
        &state.pool,
        &ClassFilter {
            from: query.from,
            to: query.to,
            trainer_id: query.trainer_id,
        },
    )
    .await?;

    Ok(Json(classes))
}

async fn show_class(
    State(state): State<AppState>,
    _auth: AuthUser,
    AppPath(id): AppPath<Uuid>,
) -> Result<Json<GymClass>> {
    let class = GymClass::find_by_id(&state.pool, id)
        .await?
        .filter(|class| class.is_active)
        .ok_or_else(|| AppError::not_found("Class"))?;
    Ok(Json(class))
}

async fn create_class(
    State(state): State<AppState>,
    auth: AuthUser,
    AppJson(req): AppJson<CreateClassRequest>,
) -> Result<(StatusCode, Json<GymClass>)> {
    auth.require(&[Role::Admin, Role::Trainer])?;

    let name = required("name", &req.name)?;
    validate_shape(Some(req.duration_minutes), Some(req.capacity))?;
    if req.starts_at <= Utc::now() {
        return Err(AppError::Validation(
            "starts_at must be in the future".to_string(),
        ));
    }

    let trainer_id = match auth.role {
        Role::Trainer => auth.user_id,
        _ => {
            let trainer_id = req
                .trainer_id
                .ok_or_else(|| AppError::Validation("trainer_id is required".to_string()))?;
            let trainer = User::find_by_id(&state.pool, trainer_id)
                .await?
                .filter(|user| user.is_active)
                .ok_or_else(|| AppError::not_found("Trainer"))?;
            if trainer.role == Role::Member {
                return Err(AppError::Validation(
                    "trainer_id must reference a trainer".to_string(),
                ));
            }
            trainer.id
        }
    };

    let class = GymClass::create(
        &state.pool,
        CreateClassData {
            name,
            description: req.description,
            trainer_id,
            starts_at: req.starts_at,
            duration_minutes: req.duration_minutes,
            capacity: req.capacity,
            room: req.room,
        },
    )
    .await?;

    tracing::info!(
        class_id = %class.id,
        trainer_id = %class.trainer_id,
        starts_at = %class.starts_at,
        "Class scheduled"
    );

    Ok((StatusCode::CREATED, Json(class)))
}

/// Admins manage every class, trainers only their own
async fn find_managed(state: &AppState, auth: &AuthUser, id: Uuid) -> Result<GymClass> {
    auth.require(&[Role::Admin, Role::Trainer])?;

    let class = GymClass::find_by_id(&state.pool, id)
        .await?
        .filter(|class| class.is_active)
        .ok_or_else(|| AppError::not_found("Class"))?;

    if auth.role == Role::Trainer && class.trainer_id != auth.user_id {
        return Err(AppError::Forbidden);
    }

    Ok(class)
}

async fn update_class(
    State(state): State<AppState>,
    auth: AuthUser,
    AppPath(id): AppPath<Uuid>,
    AppJson(req): AppJson<UpdateClassRequest>,
) -> Result<Json<GymClass>> {
    find_managed(&state, &auth, id).await?;

    let name = req.name.as_deref().map(|n| required("name", n)).transpose()?;
    validate_shape(req.duration_minutes, req.capacity)?;

    // Same row lock as reservations, so the count can't move underneath the check
    let mut tx = state.pool.begin().await?;
    GymClass::lock_active(&mut *tx, id)
        .await?
        .ok_or_else(|| AppError::not_found("Class"))?;
    let reserved = ClassReservation::count_active(&mut *tx, id).await?;
    check_update(&req, reserved, Utc::now())?;

    let class = GymClass::update(
        &mut *tx,
        id,
        UpdateClassData {
            name,
            description: req.description,
            starts_at: req.starts_at,
            duration_minutes: req.duration_minutes,
            capacity: req.capacity,
            room: req.room,
        },
    )
    .await?
    .ok_or_else(|| AppError::not_found("Class"))?;
    tx.commit().await?;

    tracing::info!(class_id = %class.id, capacity = class.capacity, "Class updated");

    Ok(Json(class))
}

async fn delete_class(
    State(state): State<AppState>,
    auth: AuthUser,
    AppPath(id): AppPath<Uuid>,
) -> Result<StatusCode> {
    find_managed(&state, &auth, id).await?;

    GymClass::deactivate(&state.pool, id).await?;

    tracing::info!(class_id = %id, "Class cancelled");

    Ok(StatusCode::NO_CONTENT)
}

async fn class_roster(
    State(state): State<AppState>,
    auth: AuthUser,
    AppPath(id): AppPath<Uuid>,
) -> Result<Json<Vec<RosterEntry>>> {
    find_managed(&state, &auth, id).await?;

    let roster = ClassReservation::roster(&state.pool, id).await?;
    Ok(Json(roster))
}

async fn reserve_class(
    State(state): State<AppState>,
    auth: AuthUser,
    AppPath(id): AppPath<Uuid>,
) -> Result<(StatusCode, Json<ClassReservation>)> {
    let member_id = auth.own_member_id()?;

    let mut tx = state.pool.begin().await?;

    // The class row lock serializes reservations for the same class
    let class = GymClass::lock_active(&mut *tx, id)
        .await?
        .ok_or_else(|| AppError::not_found("Class"))?;

    let membership = Membership::find_open_for_member(&mut *tx, member_id)
        .await?
        .map(|m| m.status);
    let already_reserved = ClassReservation::exists_active(&mut *tx, id, member_id).await?;
    let reserved = ClassReservation::count_active(&mut *tx, id).await?;

    check_reservation(&class, Utc::now(), membership, already_reserved, reserved)?;

    let reservation = ClassReservation::insert(&mut *tx, id, member_id).await?;
    tx.commit().await?;

    tracing::info!(
        reservation_id = %reservation.id,
        class_id = %class.id,
        member_id = %member_id,
        "Class reserved"
    );

    notifier::notify_member_best_effort(
        &state.pool,
        member_id,
        NewNotification::new(
            kind::CLASS,
            "Reserva confirmada",
            format!(
                "Reservaste {} el {}.",
                class.name,
                class.starts_at.format("%d/%m/%Y %H:%M")
            ),
        ),
    )
    .await;

    Ok((StatusCode::CREATED, Json(reservation)))
}

async fn cancel_reservation(
    State(state): State<AppState>,
    auth: AuthUser,
    AppPath(id): AppPath<Uuid>,
) -> Result<Json<ClassReservation>> {
    let reservation = ClassReservation::find_by_id(&state.pool, id)
        .await?
        .ok_or_else(|| AppError::not_found("Reservation"))?;

    let allowed = match auth.role {
        Role::Admin => true,
        Role::Member => auth.member_id == Some(reservation.member_id),
        Role::Trainer => false,
    };
    if !allowed {
        return Err(AppError::Forbidden);
    }

    let reservation = ClassReservation::cancel(&state.pool, id)
        .await?
        .ok_or_else(|| AppError::Conflict("Reservation is already cancelled".to_string()))?;

    tracing::info!(reservation_id = %id, cancelled_by = %auth.user_id, "Reservation cancelled");

    Ok(Json(reservation))
}

async fn my_reservations(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<Vec<AgendaEntry>>> {
    let member_id = auth.own_member_id()?;
    let agenda = ClassReservation::agenda(&state.pool, member_id).await?;
    Ok(Json(agenda))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn class(starts_in_hours: i64, capacity: i32) -> GymClass {
        GymClass {
            id: Uuid::new_v4(),
            name: "Spinning".to_string(),
            description: None,
            trainer_id: Uuid::new_v4(),
            starts_at: Utc::now() + Duration::hours(starts_in_hours),
            duration_minutes: 45,
            capacity,
            room: None,
            is_active: true,
            created_at: Utc::now(),
        }
    }

    const ACTIVE: Option<MembershipStatus> = Some(MembershipStatus::Active);

    #[test]
    fn test_reservation_allowed() {
        assert!(check_reservation(&class(2, 10), Utc::now(), ACTIVE, false, 9).is_ok());
    }

    #[test]
    fn test_reservation_requires_vigente_membership() {
        let c = class(2, 10);
        for status in [None, Some(MembershipStatus::Paused)] {
            assert_eq!(
                check_reservation(&c, Utc::now(), status, false, 0),
                Err(ReservationError::NoActiveMembership)
            );
        }
    }

    #[test]
    fn test_reservation_rejections() {
        assert_eq!(
            check_reservation(&class(-1, 10), Utc::now(), ACTIVE, false, 0),
            Err(ReservationError::ClassStarted)
        );
        assert_eq!(
            check_reservation(&class(2, 10), Utc::now(), ACTIVE, true, 1),
            Err(ReservationError::AlreadyReserved)
        );
        assert_eq!(
            check_reservation(&class(2, 10), Utc::now(), ACTIVE, false, 10),
            Err(ReservationError::Full)
        );
    }

    #[test]
    fn test_reservation_error_statuses() {
        assert_eq!(
            AppError::from(ReservationError::NoActiveMembership).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            AppError::from(ReservationError::ClassStarted).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::from(ReservationError::Full).status(),
            StatusCode::CONFLICT
        );
    }

    fn edit(starts_at: Option<DateTime<Utc>>, capacity: Option<i32>) -> UpdateClassRequest {
        UpdateClassRequest {
            name: None,
            description: None,
            starts_at,
            duration_minutes: None,
            capacity,
            room: None,
        }
    }

    #[test]
    fn test_update_keeps_capacity_above_reservations() {
        let now = Utc::now();
        assert!(check_update(&edit(None, Some(8)), 8, now).is_ok());
        assert!(check_update(&edit(None, None), 8, now).is_ok());

        let err = check_update(&edit(None, Some(7)), 8, now).unwrap_err();
        assert_eq!(err.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_update_cannot_move_class_into_the_past() {
        let now = Utc::now();
        assert!(check_update(&edit(Some(now + Duration::hours(1)), None), 0, now).is_ok());

        let err = check_update(&edit(Some(now - Duration::minutes(5)), None), 0, now).unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }
}
