use axum::{
    extract::State,
    http::{header, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::api::extract::{AppJson, AppPath, AppQuery};
use crate::api::middleware::auth::AuthUser;
use crate::api::state::AppState;
use crate::error::{AppError, Result};
use crate::models::member::Member;
use crate::models::notification::NewNotification;
use crate::models::payment::{format_cents, CreatePaymentData, Payment, PaymentFilter, PaymentMethod};
use crate::models::plan::Plan;
use crate::models::user::Role;
use crate::models::add_days;
use crate::services::notifier::{self, kind};
use crate::services::receipt_pdf::{receipt_file_name, receipt_key, render_receipt};
use crate::services::s3::S3Client;

/// Response header reporting what happened to the receipt copy in S3
pub const S3_UPLOAD_HEADER: &str = "x-s3-upload";

#[derive(Debug, Deserialize)]
pub struct CreatePaymentRequest {
    pub member_id: Uuid,
    pub plan_id: Option<Uuid>,
    pub amount_cents: i64,
    pub method: PaymentMethod,
    pub concept: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListPaymentsQuery {
    pub member_id: Option<Uuid>,
    /// Inclusive
    pub from: Option<NaiveDate>,
    /// Inclusive
    pub to: Option<NaiveDate>,
}

/// Outcome of the best-effort receipt upload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptUpload {
    Ok,
    Failed,
    Skipped,
}

impl ReceiptUpload {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReceiptUpload::Ok => "ok",
            ReceiptUpload::Failed => "failed",
            ReceiptUpload::Skipped => "skipped",
        }
    }
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/payments", get(list_payments).post(create_payment))
        .route("/api/payments/:id", get(show_payment))
        .route("/api/payments/:id/receipt", get(payment_receipt))
}

fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN))
}

async fn create_payment(
    State(state): State<AppState>,
    auth: AuthUser,
    AppJson(req): AppJson<CreatePaymentRequest>,
) -> Result<(StatusCode, Json<Payment>)> {
    auth.require(&[Role::Admin])?;

    if req.amount_cents <= 0 {
        return Err(AppError::Validation(
            "amount_cents must be greater than zero".to_string(),
        ));
    }

    Member::find_by_id(&state.pool, req.member_id)
        .await?
        .filter(|member| member.is_active)
        .ok_or_else(|| AppError::not_found("Member"))?;

    if let Some(plan_id) = req.plan_id {
        Plan::find_by_id(&state.pool, plan_id)
            .await?
            .ok_or_else(|| AppError::not_found("Plan"))?;
    }

    let payment = Payment::create(
        &state.pool,
        CreatePaymentData {
            member_id: req.member_id,
            plan_id: req.plan_id,
            amount_cents: req.amount_cents,
            method: req.method,
            concept: req.concept.filter(|c| !c.trim().is_empty()),
            recorded_by: auth.user_id,
        },
    )
    .await?;

    tracing::info!(
        payment_id = %payment.id,
        member_id = %payment.member_id,
        amount_cents = payment.amount_cents,
        method = %payment.method,
        "Payment recorded"
    );

    notifier::notify_member_best_effort(
        &state.pool,
        payment.member_id,
        NewNotification::new(
            kind::PAYMENT,
            "Pago registrado",
            format!(
                "Recibimos tu pago de $ {} ({}).",
                format_cents(payment.amount_cents),
                payment.method
            ),
        ),
    )
    .await;

    Ok((StatusCode::CREATED, Json(payment)))
}

async fn list_payments(
    State(state): State<AppState>,
    auth: AuthUser,
    AppQuery(query): AppQuery<ListPaymentsQuery>,
) -> Result<Json<Vec<Payment>>> {
    let member_id = match auth.role {
        Role::Admin => query.member_id,
        Role::Member => Some(auth.own_member_id()?),
        Role::Trainer => return Err(AppError::Forbidden),
    };

    let filter = PaymentFilter {
        member_id,
        from: query.from.map(start_of_day),
        // exclusive upper bound; the last representable day has none
        to: query.to.and_then(|to| add_days(to, 1)).map(start_of_day),
    };

    let payments = Payment::list(&state.pool, &filter).await?;
    Ok(Json(payments))
}

async fn find_owned(state: &AppState, auth: &AuthUser, id: Uuid) -> Result<Payment> {
    let payment = Payment::find_by_id(&state.pool, id)
        .await?
        .ok_or_else(|| AppError::not_found("Payment"))?;

    let allowed = match auth.role {
        Role::Admin => true,
        Role::Member => auth.member_id == Some(payment.member_id),
        Role::Trainer => false,
    };
    if !allowed {
        return Err(AppError::Forbidden);
    }

    Ok(payment)
}

async fn show_payment(
    State(state): State<AppState>,
    auth: AuthUser,
    AppPath(id): AppPath<Uuid>,
) -> Result<Json<Payment>> {
    find_owned(&state, &auth, id).await.map(Json)
}

/// Renders the receipt PDF, copying it to S3 when storage is configured
async fn payment_receipt(
    State(state): State<AppState>,
    auth: AuthUser,
    AppPath(id): AppPath<Uuid>,
) -> Result<Response> {
    find_owned(&state, &auth, id).await?;

    let detail = Payment::find_detail(&state.pool, id)
        .await?
        .ok_or_else(|| AppError::not_found("Payment"))?;

    let gym_name = state.config.gym_name.clone();
    let render_detail = detail.clone();
    let pdf = tokio::task::spawn_blocking(move || render_receipt(&gym_name, &render_detail))
        .await
        .map_err(|e| AppError::Internal(e.into()))?
        .map_err(|e| AppError::Internal(e.into()))?;

    let key = receipt_key(&detail);
    let upload = store_receipt(state.storage.as_ref(), &key, pdf.clone()).await;

    if upload == ReceiptUpload::Ok {
        if let Err(e) = Payment::set_receipt_key(&state.pool, id, &key).await {
            tracing::warn!(payment_id = %id, error = %e, "Failed to save receipt key");
        }
    }

    let disposition = format!("inline; filename=\"{}\"", receipt_file_name(&detail));

    Ok((
        [
            (header::CONTENT_TYPE, HeaderValue::from_static("application/pdf")),
            (
                header::CONTENT_DISPOSITION,
                HeaderValue::from_str(&disposition).map_err(|e| AppError::Internal(e.into()))?,
            ),
            (
                HeaderName::from_static(S3_UPLOAD_HEADER),
                HeaderValue::from_static(upload.as_str()),
            ),
        ],
        pdf,
    )
        .into_response())
}

/// Uploads the receipt; never fails the request
pub async fn store_receipt(storage: Option<&S3Client>, key: &str, pdf: Vec<u8>) -> ReceiptUpload {
    let Some(storage) = storage else {
        return ReceiptUpload::Skipped;
    };

    match storage.put_object(key, "application/pdf", pdf).await {
        Ok(_) => ReceiptUpload::Ok,
        Err(e) => {
            tracing::warn!(key = %key, error = %e, "Receipt upload failed");
            ReceiptUpload::Failed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::S3Config;
    use secrecy::Secret;
    use wiremock::{matchers::method, Mock, MockServer, ResponseTemplate};

    fn client(endpoint: String) -> S3Client {
        S3Client::new(
            reqwest::Client::new(),
            S3Config {
                bucket: "gym".to_string(),
                region: "us-east-1".to_string(),
                access_key_id: "AKIDEXAMPLE".to_string(),
                secret_access_key: Secret::new("secret".to_string()),
                endpoint: Some(endpoint),
            },
        )
    }

    #[tokio::test]
    async fn test_store_receipt_skipped_without_storage() {
        let outcome = store_receipt(None, "receipts/x.pdf", b"%PDF".to_vec()).await;
        assert_eq!(outcome, ReceiptUpload::Skipped);
        assert_eq!(outcome.as_str(), "skipped");
    }

    #[tokio::test]
    async fn test_store_receipt_reports_failure() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let storage = client(server.uri());
        let outcome = store_receipt(Some(&storage), "receipts/x.pdf", b"%PDF".to_vec()).await;
        assert_eq!(outcome, ReceiptUpload::Failed);
        assert_eq!(outcome.as_str(), "failed");
    }

    #[tokio::test]
    async fn test_store_receipt_ok() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let storage = client(server.uri());
        let outcome = store_receipt(Some(&storage), "receipts/x.pdf", b"%PDF".to_vec()).await;
        assert_eq!(outcome, ReceiptUpload::Ok);
    }

    #[test]
    fn test_start_of_day() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        assert_eq!(start_of_day(date).to_rfc3339(), "2024-03-01T00:00:00+00:00");
    }
}
