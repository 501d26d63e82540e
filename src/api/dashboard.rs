use askama::Template;
use axum::{
    extract::State,
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
    Form, Json, Router,
};
use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use cookie::{Cookie, SameSite};
use serde::{Deserialize, Serialize};

use crate::api::auth::authenticate;
use crate::api::middleware::auth::{AuthUser, TOKEN_COOKIE};
use crate::api::state::AppState;
use crate::error::{AppError, Result};
use crate::models::gym_class::{ClassFilter, ClassReservation, GymClass};
use crate::models::inventory::InventoryItem;
use crate::models::maintenance::MaintenanceRecord;
use crate::models::member::Member;
use crate::models::membership::{days_remaining, Membership, StatusCount};
use crate::models::membership_request::MembershipRequest;
use crate::models::notification::Notification;
use crate::models::payment::{format_cents, Payment};
use crate::models::user::Role;

const MAINTENANCE_WINDOW_DAYS: i64 = 7;
const TRAINER_WINDOW_DAYS: i64 = 14;
const RECENT_PAYMENTS: i64 = 5;
const UNREAD_NOTIFICATIONS: i64 = 10;

/// Numbers shown on the admin dashboard
#[derive(Debug, Clone, Serialize)]
pub struct AdminStats {
    pub active_members: i64,
    pub memberships_by_status: Vec<StatusCount>,
    pub revenue_this_month_cents: i64,
    pub pending_requests: i64,
    pub low_stock_items: i64,
    pub maintenance_due: i64,
}

#[derive(Debug, Deserialize)]
pub struct LoginForm {
    pub email: String,
    pub password: String,
}

#[derive(Template)]
#[template(path = "login.html")]
struct LoginTemplate {
    gym_name: String,
    error: Option<String>,
}

#[derive(Template)]
#[template(path = "dashboard/admin.html")]
struct AdminDashboardTemplate {
    gym_name: String,
    user_name: String,
    stats: AdminStats,
    revenue: String,
}

struct ClassRow {
    name: String,
    starts_at: String,
    room: String,
    reserved: i64,
    capacity: i32,
    spots_left: i64,
}

#[derive(Template)]
#[template(path = "dashboard/trainer.html")]
struct TrainerDashboardTemplate {
    gym_name: String,
    user_name: String,
    classes: Vec<ClassRow>,
}

struct MembershipCard {
    plan_name: String,
    status: String,
    end_date: String,
    days_remaining: i64,
}

struct PaymentRow {
    paid_at: String,
    amount: String,
    method: String,
    concept: String,
}

struct AgendaRow {
    class_name: String,
    starts_at: String,
    room: String,
}

struct NotificationRow {
    title: String,
    message: String,
    created_at: String,
}

#[derive(Template)]
#[template(path = "dashboard/member.html")]
struct MemberDashboardTemplate {
    gym_name: String,
    user_name: String,
    membership: Option<MembershipCard>,
    payments: Vec<PaymentRow>,
    agenda: Vec<AgendaRow>,
    notifications: Vec<NotificationRow>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/login", get(login_page).post(login_submit))
        .route("/logout", post(logout))
        .route("/dashboard", get(dashboard))
        .route("/api/dashboard/stats", get(stats))
}

/// `[first day of the month, first day of next month)` around `today`
pub fn month_bounds(today: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = today.with_day(1).unwrap_or(today);
    let next = if start.month() == 12 {
        NaiveDate::from_ymd_opt(start.year() + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(start.year(), start.month() + 1, 1)
    }
    .unwrap_or(start + Duration::days(31));

    (
        Utc.from_utc_datetime(&start.and_time(NaiveTime::MIN)),
        Utc.from_utc_datetime(&next.and_time(NaiveTime::MIN)),
    )
}

fn session_cookie(token: &str, max_age_secs: i64) -> Result<HeaderValue> {
    let cookie = Cookie::build((TOKEN_COOKIE, token))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .max_age(cookie::time::Duration::seconds(max_age_secs))
        .build();
    header_value(&cookie)
}

fn cleared_session_cookie() -> Result<HeaderValue> {
    let mut cookie = Cookie::build((TOKEN_COOKIE, ""))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .build();
    cookie.make_removal();
    header_value(&cookie)
}

fn header_value(cookie: &Cookie<'_>) -> Result<HeaderValue> {
    HeaderValue::from_str(&cookie.to_string()).map_err(|e| AppError::Internal(e.into()))
}

async fn login_page(State(state): State<AppState>) -> impl IntoResponse {
    LoginTemplate {
        gym_name: state.config.gym_name.clone(),
        error: None,
    }
}

async fn login_submit(
    State(state): State<AppState>,
    Form(form): Form<LoginForm>,
) -> Result<Response> {
    match authenticate(&state, &form.email, &form.password).await {
        Ok(login) => {
            let cookie = session_cookie(&login.token, state.config.token_ttl_hours * 3600)?;
            Ok(([(header::SET_COOKIE, cookie)], Redirect::to("/dashboard")).into_response())
        }
        Err(AppError::Unauthorized) => Ok((
            StatusCode::UNAUTHORIZED,
            LoginTemplate {
                gym_name: state.config.gym_name.clone(),
                error: Some("Correo o contraseña incorrectos".to_string()),
            },
        )
            .into_response()),
        Err(e) => Err(e),
    }
}

async fn logout() -> Result<Response> {
    let cookie = cleared_session_cookie()?;
    Ok(([(header::SET_COOKIE, cookie)], Redirect::to("/login")).into_response())
}

/// Role-scoped landing page; anonymous visitors go to the login form
async fn dashboard(
    State(state): State<AppState>,
    auth: std::result::Result<AuthUser, AppError>,
) -> Result<Response> {
    let Ok(auth) = auth else {
        return Ok(Redirect::to("/login").into_response());
    };

    let gym_name = state.config.gym_name.clone();
    let user_name = auth.name.clone();

    let response = match auth.role {
        Role::Admin => {
            let stats = admin_stats(&state).await?;
            AdminDashboardTemplate {
                gym_name,
                user_name,
                revenue: format_cents(stats.revenue_this_month_cents),
                stats,
            }
            .into_response()
        }
        Role::Trainer => TrainerDashboardTemplate {
            gym_name,
            user_name,
            classes: trainer_classes(&state, &auth).await?,
        }
        .into_response(),
        Role::Member => member_dashboard(&state, &auth, gym_name, user_name)
            .await?
            .into_response(),
    };

    Ok(response)
}

async fn stats(State(state): State<AppState>, auth: AuthUser) -> Result<Json<AdminStats>> {
    auth.require(&[Role::Admin])?;
    admin_stats(&state).await.map(Json)
}

pub async fn admin_stats(state: &AppState) -> Result<AdminStats> {
    let today = Utc::now().date_naive();
    let (month_start, month_end) = month_bounds(today);
    let pool = &state.pool;

    let (active_members, memberships_by_status, revenue, pending, low_stock, maintenance_due) = tokio::try_join!(
        Member::count_active(pool),
        Membership::count_by_status(pool),
        Payment::revenue_between(pool, month_start, month_end),
        MembershipRequest::count_pending(pool),
        InventoryItem::count_low_stock(pool),
        MaintenanceRecord::count_due_by(pool, today + Duration::days(MAINTENANCE_WINDOW_DAYS)),
    )?;

    Ok(AdminStats {
        active_members,
        memberships_by_status,
        revenue_this_month_cents: revenue,
        pending_requests: pending,
        low_stock_items: low_stock,
        maintenance_due,
    })
}

async fn trainer_classes(state: &AppState, auth: &AuthUser) -> Result<Vec<ClassRow>> {
    let now = Utc::now();
    let classes = GymClass::list(
        &state.pool,
        &ClassFilter {
            from: Some(now),
            to: Some(now + Duration::days(TRAINER_WINDOW_DAYS)),
            trainer_id: Some(auth.user_id),
        },
    )
    .await?;

    Ok(classes
        .into_iter()
        .map(|listing| ClassRow {
            spots_left: listing.spots_left(),
            name: listing.class.name,
            starts_at: listing.class.starts_at.format("%d/%m/%Y %H:%M").to_string(),
            room: listing.class.room.unwrap_or_else(|| "-".to_string()),
            reserved: listing.reserved,
            capacity: listing.class.capacity,
        })
        .collect())
}

async fn member_dashboard(
    state: &AppState,
    auth: &AuthUser,
    gym_name: String,
    user_name: String,
) -> Result<MemberDashboardTemplate> {
    let member_id = auth.own_member_id()?;
    let pool = &state.pool;
    let today = Utc::now().date_naive();

    let (membership, payments, agenda, notifications) = tokio::try_join!(
        Membership::find_open_summary_for_member(pool, member_id),
        Payment::list_recent_for_member(pool, member_id, RECENT_PAYMENTS),
        ClassReservation::agenda(pool, member_id),
        Notification::list_for_member(pool, member_id, true, UNREAD_NOTIFICATIONS),
    )?;

    Ok(MemberDashboardTemplate {
        gym_name,
        user_name,
        membership: membership.map(|summary| MembershipCard {
            days_remaining: days_remaining(summary.membership.end_date, today),
            plan_name: summary.plan_name,
            status: summary.membership.status.to_string(),
            end_date: summary.membership.end_date.format("%d/%m/%Y").to_string(),
        }),
        payments: payments
            .into_iter()
            .map(|p| PaymentRow {
                paid_at: p.paid_at.format("%d/%m/%Y").to_string(),
                amount: format_cents(p.amount_cents),
                method: p.method.to_string(),
                concept: p.concept.unwrap_or_else(|| "-".to_string()),
            })
            .collect(),
        agenda: agenda
            .into_iter()
            .map(|entry| AgendaRow {
                class_name: entry.class_name,
                starts_at: entry.starts_at.format("%d/%m/%Y %H:%M").to_string(),
                room: entry.room.unwrap_or_else(|| "-".to_string()),
            })
            .collect(),
        notifications: notifications
            .into_iter()
            .map(|n| NotificationRow {
                title: n.title,
                message: n.message,
                created_at: n.created_at.format("%d/%m/%Y").to_string(),
            })
            .collect(),
    })
}
