//! End-to-end scenarios against a real Postgres.
//!
//! Run with `DATABASE_URL=postgres://... cargo test -- --ignored`.

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use chrono::{Days, Duration, NaiveDate, Utc};
use http_body_util::BodyExt;
use jsonwebtoken::{encode, EncodingKey, Header};
use secrecy::Secret;
use serde_json::{json, Value};
use sqlx::PgPool;
use tower::ServiceExt;
use uuid::Uuid;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

use gymdesk::api::{self, AppState};
use gymdesk::config::{Config, S3Config};
use gymdesk::db;
use gymdesk::models::user::{CreateUserData, Role, User};
use gymdesk::services::auth_token::{issue_token, Claims};

const SECRET: &str = "scenario-secret";
const MEMBER_PASSWORD: &str = "contrasena-segura";

struct Harness {
    app: Router,
    pool: PgPool,
    admin_token: String,
}

/// A member record with a login of its own
struct MemberLogin {
    id: String,
    email: String,
    token: String,
}

fn config(database_url: String, s3: Option<S3Config>) -> Config {
    Config {
        database_url,
        host: "127.0.0.1".to_string(),
        port: 0,
        db_max_connections: 5,
        db_acquire_timeout_secs: 5,
        jwt_secret: Secret::new(SECRET.to_string()),
        token_ttl_hours: 1,
        bootstrap_admin_email: None,
        bootstrap_admin_password: None,
        gym_name: "GymDesk Test".to_string(),
        s3,
        cors_origin: None,
    }
}

async fn harness(s3: Option<S3Config>) -> Harness {
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let config = config(database_url, s3);
    let pool: PgPool = db::create_pool(&config).await.unwrap();
    db::run_migrations(&pool).await.unwrap();

    let admin = create_user(&pool, Role::Admin).await;
    let admin_token = issue_token(&admin, SECRET, 1).unwrap();

    Harness {
        app: api::app(AppState::new(pool.clone(), config)),
        pool,
        admin_token,
    }
}

async fn create_user(pool: &PgPool, role: Role) -> User {
    User::create(
        pool,
        CreateUserData {
            email: format!("{}-{}@example.com", role, Uuid::new_v4()),
            password_hash: "unused".to_string(),
            full_name: "Usuario Pruebas".to_string(),
            role,
            member_id: None,
        },
    )
    .await
    .unwrap()
}

fn parse_date(value: &Value) -> NaiveDate {
    value.as_str().unwrap().parse().unwrap()
}

impl Harness {
    async fn call(&self, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        self.call_as(&self.admin_token, method, uri, body).await
    }

    async fn call_as(
        &self,
        token: &str,
        method: &str,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let (status, _, body) = self.send(token, method, uri, body).await;
        let value = serde_json::from_slice(&body).unwrap_or(Value::Null);
        (status, value)
    }

    async fn call_raw(
        &self,
        method: &str,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
        self.send(&self.admin_token, method, uri, body).await
    }

    async fn send(
        &self,
        token: &str,
        method: &str,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {}", token))
            .header(header::CONTENT_TYPE, "application/json")
            .body(match body {
                Some(body) => Body::from(body.to_string()),
                None => Body::empty(),
            })
            .unwrap();

        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, headers, bytes.to_vec())
    }

    async fn create_member(&self) -> String {
        let (status, member) = self
            .call(
                "POST",
                "/api/members",
                Some(json!({
                    "first_name": "Lucía",
                    "last_name": "Gómez",
                    "email": format!("lucia-{}@example.com", Uuid::new_v4()),
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        member["id"].as_str().unwrap().to_string()
    }

    async fn create_member_with_login(&self) -> MemberLogin {
        let email = format!("socio-{}@example.com", Uuid::new_v4());
        let (status, member) = self
            .call(
                "POST",
                "/api/members",
                Some(json!({
                    "first_name": "Mateo",
                    "last_name": "Ruiz",
                    "email": email,
                    "password": MEMBER_PASSWORD,
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, token) = self.login(&email).await;
        assert_eq!(status, StatusCode::OK);

        MemberLogin {
            id: member["id"].as_str().unwrap().to_string(),
            email,
            token: token.unwrap(),
        }
    }

    async fn login(&self, email: &str) -> (StatusCode, Option<String>) {
        let (status, body) = self
            .call(
                "POST",
                "/api/auth/login",
                Some(json!({"email": email, "password": MEMBER_PASSWORD})),
            )
            .await;
        (status, body["token"].as_str().map(str::to_string))
    }

    async fn create_plan(&self) -> String {
        let (status, plan) = self
            .call(
                "POST",
                "/api/plans",
                Some(json!({"name": "Mensual", "price_cents": 35000, "duration_days": 30})),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        plan["id"].as_str().unwrap().to_string()
    }

    async fn assign(&self, member_id: &str, plan_id: &str) -> Value {
        let (status, membership) = self
            .call(
                "POST",
                "/api/memberships",
                Some(json!({"member_id": member_id, "plan_id": plan_id})),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        membership
    }

    async fn create_item(&self, stock: i32) -> String {
        let (status, item) = self
            .call(
                "POST",
                "/api/inventory",
                Some(json!({"name": "Toallas", "category": "Limpieza", "stock": stock, "min_stock": 2})),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        item["id"].as_str().unwrap().to_string()
    }
}

#[tokio::test]
#[ignore] // Requires DATABASE_URL
async fn test_exit_beyond_stock_leaves_stock_unchanged() {
    let h = harness(None).await;

    let item_id = h.create_item(5).await;

    let (status, _) = h
        .call(
            "POST",
            &format!("/api/inventory/{}/movements", item_id),
            Some(json!({"tipo": "Salida", "cantidad": 6})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, item) = h
        .call("GET", &format!("/api/inventory/{}", item_id), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(item["stock"], 5);

    let (status, movements) = h
        .call("GET", &format!("/api/inventory/{}/movements", item_id), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(movements.as_array().map(Vec::len), Some(0));
}

#[tokio::test]
#[ignore] // Requires DATABASE_URL
async fn test_second_membership_is_rejected_while_one_is_open() {
    let h = harness(None).await;
    let member_id = h.create_member().await;
    let plan_id = h.create_plan().await;

    let body = json!({"member_id": member_id, "plan_id": plan_id});
    let (status, membership) = h.call("POST", "/api/memberships", Some(body.clone())).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(membership["status"], "Vigente");

    let (status, _) = h.call("POST", "/api/memberships", Some(body)).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
#[ignore] // Requires DATABASE_URL
async fn test_receipt_is_served_when_storage_fails() {
    let storage = MockServer::start().await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&storage)
        .await;

    let h = harness(Some(S3Config {
        bucket: "receipts".to_string(),
        region: "us-east-1".to_string(),
        access_key_id: "AKIDEXAMPLE".to_string(),
        secret_access_key: Secret::new("secret".to_string()),
        endpoint: Some(storage.uri()),
    }))
    .await;
    let member_id = h.create_member().await;

    let (status, payment) = h
        .call(
            "POST",
            "/api/payments",
            Some(json!({
                "member_id": member_id,
                "amount_cents": 35000,
                "method": "Efectivo",
                "concept": "Mensualidad",
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let payment_id = payment["id"].as_str().unwrap().to_string();

    let (status, headers, pdf) = h
        .call_raw("GET", &format!("/api/payments/{}/receipt", payment_id), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::CONTENT_TYPE], "application/pdf");
    assert_eq!(headers["x-s3-upload"], "failed");
    assert!(pdf.starts_with(b"%PDF"));

    let (_, payment) = h
        .call("GET", &format!("/api/payments/{}", payment_id), None)
        .await;
    assert!(payment["receipt_key"].is_null());
}

#[tokio::test]
#[ignore] // Requires DATABASE_URL
async fn test_pause_then_resume_pushes_end_date_back() {
    let h = harness(None).await;
    let member_id = h.create_member().await;
    let plan_id = h.create_plan().await;
    let membership = h.assign(&member_id, &plan_id).await;
    let id = membership["id"].as_str().unwrap().to_string();
    let end_date = parse_date(&membership["end_date"]);

    let (status, paused) = h
        .call("PATCH", &format!("/api/memberships/{}/pause", id), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(paused["status"], "Suspendida");

    // Pretend the pause started five days ago
    sqlx::query("UPDATE memberships SET paused_at = paused_at - 5 WHERE id = $1")
        .bind(Uuid::parse_str(&id).unwrap())
        .execute(&h.pool)
        .await
        .unwrap();

    let (status, resumed) = h
        .call("PATCH", &format!("/api/memberships/{}/resume", id), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(resumed["status"], "Vigente");
    assert!(resumed["paused_at"].is_null());
    assert_eq!(
        parse_date(&resumed["end_date"]),
        end_date.checked_add_days(Days::new(5)).unwrap()
    );
}

#[tokio::test]
#[ignore] // Requires DATABASE_URL
async fn test_cancelled_membership_cannot_be_cancelled_again() {
    let h = harness(None).await;
    let member_id = h.create_member().await;
    let plan_id = h.create_plan().await;
    let id = h.assign(&member_id, &plan_id).await["id"]
        .as_str()
        .unwrap()
        .to_string();
    let uri = format!("/api/memberships/{}/cancel", id);

    let (status, cancelled) = h
        .call("PATCH", &uri, Some(json!({"reason": "Mudanza"})))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cancelled["status"], "Cancelada");
    assert_eq!(cancelled["cancel_reason"], "Mudanza");

    let (status, _) = h.call("PATCH", &uri, None).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
#[ignore] // Requires DATABASE_URL
async fn test_plan_change_approval_swaps_the_membership() {
    let h = harness(None).await;
    let member = h.create_member_with_login().await;
    let current_plan = h.create_plan().await;
    let new_plan = h.create_plan().await;
    h.assign(&member.id, &current_plan).await;

    let (status, request) = h
        .call_as(
            &member.token,
            "POST",
            "/api/requests",
            Some(json!({"request_type": "Cambio", "requested_plan_id": new_plan})),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(request["status"], "Pendiente");
    let approve = format!("/api/requests/{}/approve", request["id"].as_str().unwrap());

    let (status, approved) = h.call("PATCH", &approve, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(approved["status"], "Aprobada");

    let (status, memberships) = h
        .call("GET", &format!("/api/memberships?member_id={}", member.id), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    let memberships = memberships.as_array().unwrap();
    assert_eq!(memberships.len(), 2);
    assert!(memberships
        .iter()
        .any(|m| m["plan_id"] == current_plan.as_str() && m["status"] == "Cancelada"));
    assert!(memberships
        .iter()
        .any(|m| m["plan_id"] == new_plan.as_str() && m["status"] == "Vigente"));

    let (status, _) = h.call("PATCH", &approve, None).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
#[ignore] // Requires DATABASE_URL
async fn test_reservations_need_a_vigente_membership_and_a_free_spot() {
    let h = harness(None).await;
    let plan_id = h.create_plan().await;
    let trainer = create_user(&h.pool, Role::Trainer).await;

    let (status, class) = h
        .call(
            "POST",
            "/api/classes",
            Some(json!({
                "name": "Yoga",
                "trainer_id": trainer.id,
                "starts_at": Utc::now() + Duration::days(1),
                "duration_minutes": 60,
                "capacity": 1,
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let reserve = format!("/api/classes/{}/reservations", class["id"].as_str().unwrap());

    let first = h.create_member_with_login().await;
    h.assign(&first.id, &plan_id).await;
    let (status, reservation) = h.call_as(&first.token, "POST", &reserve, None).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(reservation["status"], "Reservada");

    let second = h.create_member_with_login().await;
    let (status, _) = h.call_as(&second.token, "POST", &reserve, None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    h.assign(&second.id, &plan_id).await;
    let (status, _) = h.call_as(&second.token, "POST", &reserve, None).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
#[ignore] // Requires DATABASE_URL
async fn test_completing_preventive_maintenance_schedules_the_next_visit() {
    let h = harness(None).await;
    let item_id = h.create_item(1).await;
    let today = Utc::now().date_naive();

    let (status, record) = h
        .call(
            "POST",
            "/api/maintenance",
            Some(json!({
                "item_id": item_id,
                "maintenance_type": "Preventivo",
                "description": "Lubricar banda",
                "scheduled_for": today,
                "frequency_days": 30,
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let complete = format!("/api/maintenance/{}/complete", record["id"].as_str().unwrap());

    let (status, result) = h
        .call("PATCH", &complete, Some(json!({"cost_cents": 12000})))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(result["completed"]["status"], "Completado");
    assert_eq!(result["completed"]["cost_cents"], 12000);
    assert_eq!(result["next"]["status"], "Programado");
    assert_eq!(result["next"]["frequency_days"], 30);
    assert_eq!(
        parse_date(&result["next"]["scheduled_for"]),
        today.checked_add_days(Days::new(30)).unwrap()
    );

    let (status, _) = h.call("PATCH", &complete, None).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
#[ignore] // Requires DATABASE_URL
async fn test_entry_and_adjustment_movements_are_recorded() {
    let h = harness(None).await;
    let item_id = h.create_item(5).await;
    let uri = format!("/api/inventory/{}/movements", item_id);

    let (status, entry) = h
        .call("POST", &uri, Some(json!({"tipo": "Entrada", "cantidad": 3})))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(entry["item"]["stock"], 8);
    assert_eq!(entry["movement"]["previous_stock"], 5);
    assert_eq!(entry["movement"]["new_stock"], 8);

    let (status, adjustment) = h
        .call(
            "POST",
            &uri,
            Some(json!({"tipo": "Ajuste", "cantidad": 2, "nota": "Conteo físico"})),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(adjustment["item"]["stock"], 2);
    assert_eq!(adjustment["movement"]["previous_stock"], 8);
    assert_eq!(adjustment["movement"]["new_stock"], 2);

    let (status, movements) = h.call("GET", &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    let movements = movements.as_array().unwrap();
    assert_eq!(movements.len(), 2);
    let adjustment = movements
        .iter()
        .find(|m| m["movement_type"] == "Ajuste")
        .unwrap();
    assert_eq!(adjustment["quantity"], 2);
    assert_eq!(adjustment["note"], "Conteo físico");
}

#[tokio::test]
#[ignore] // Requires DATABASE_URL
async fn test_concurrent_assignments_open_a_single_membership() {
    let h = harness(None).await;
    let member_id = h.create_member().await;
    let plan_id = h.create_plan().await;
    let body = json!({"member_id": member_id, "plan_id": plan_id});

    let (first, second) = tokio::join!(
        h.call("POST", "/api/memberships", Some(body.clone())),
        h.call("POST", "/api/memberships", Some(body)),
    );
    let mut statuses = [first.0, second.0];
    statuses.sort();
    assert_eq!(statuses, [StatusCode::CREATED, StatusCode::CONFLICT]);

    let (_, open) = h
        .call(
            "GET",
            &format!("/api/memberships?member_id={}&status=Vigente", member_id),
            None,
        )
        .await;
    assert_eq!(open.as_array().map(Vec::len), Some(1));
}

#[tokio::test]
#[ignore] // Requires DATABASE_URL
async fn test_member_email_change_moves_the_login() {
    let h = harness(None).await;
    let member = h.create_member_with_login().await;
    let new_email = format!("nuevo-{}@example.com", Uuid::new_v4());

    let (status, updated) = h
        .call(
            "PUT",
            &format!("/api/members/{}", member.id),
            Some(json!({"email": format!("  {} ", new_email.to_uppercase())})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["email"], new_email.as_str());

    let (status, token) = h.login(&new_email).await;
    assert_eq!(status, StatusCode::OK);
    assert!(token.is_some());

    let (status, _) = h.login(&member.email).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
#[ignore] // Requires DATABASE_URL
async fn test_deactivated_login_cannot_write_with_an_older_token() {
    let h = harness(None).await;
    let member = h.create_member_with_login().await;
    let user = User::find_active_by_email(&h.pool, &member.email)
        .await
        .unwrap()
        .unwrap();

    let now = Utc::now();
    let claims = Claims {
        sub: user.id,
        role: user.role,
        member_id: user.member_id,
        name: user.full_name.clone(),
        iat: (now - Duration::minutes(10)).timestamp(),
        exp: (now + Duration::hours(1)).timestamp(),
    };
    let aged_token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .unwrap();

    let (status, _) = h
        .call_as(&aged_token, "PATCH", "/api/notifications/read-all", None)
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = h
        .call("DELETE", &format!("/api/members/{}", member.id), None)
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = h
        .call_as(&aged_token, "PATCH", "/api/notifications/read-all", None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}
