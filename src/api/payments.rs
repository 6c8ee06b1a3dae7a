// src/api/payments.rs

use actix_web::{get, post, web, HttpResponse};
use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::api::{hupijiao, hupijiao_client};
use crate::error::AppError;
use crate::models::{OrderStatus, PlanPeriod};
use crate::{db, AppState};

#[derive(Debug, Serialize, ToSchema)]
pub struct PaymentResponse {
    pub order_id: i32,
    pub order_number: String,
    pub amount: String,
    /// Страница оплаты шлюза
    pub payment_url: Option<String>,
    /// Ссылка на QR-код для оплаты с телефона
    pub qrcode_url: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PaymentStatusResponse {
    pub order_id: i32,
    pub order_number: String,
    pub status: OrderStatus,
    pub paid: bool,
    pub paid_at: Option<DateTime<Utc>>,
    pub subscription_id: Option<i32>,
}

fn payment_title(plan_name: Option<&str>, period: PlanPeriod) -> String {
    match plan_name {
        Some(name) => format!("VPN {name}"),
        None => format!("VPN subscription ({period})"),
    }
}

/// Создаёт платёж в шлюзе для заказа в статусе `pending`
/// и возвращает ссылку на оплату. `gateway_order_id` сохраняется в заказе.
#[utoipa::path(
    post,
    path = "/api/payment/{order_id}",
    tag = "payments",
    params(("order_id" = i32, Path, description = "Order id")),
    responses(
        (status = 200, description = "Payment created", body = PaymentResponse),
        (status = 404, description = "Order not found"),
        (status = 409, description = "Order is not pending"),
        (status = 502, description = "Gateway error (retryable)"),
        (status = 504, description = "Gateway timeout (retryable)")
    ),
    security(("bearer" = []))
)]
#[post("/payment/{order_id}")]
pub async fn create_payment(
    state: web::Data<AppState>,
    user_id: web::ReqData<i32>,
    path: web::Path<i32>,
) -> Result<HttpResponse, AppError> {
    let user_id = *user_id;

    let order = db::get_order_for_user(&state.pool, user_id, path.into_inner())
        .await?
        .ok_or(AppError::NotFound("order"))?;

    if order.status != OrderStatus::Pending {
        return Err(AppError::Conflict(format!(
            "order {} is {}, payment is only possible for pending orders",
            order.order_number, order.status
        )));
    }

    let plan = db::get_plan(&state.pool, order.plan_id).await?;
    let title = payment_title(plan.as_ref().map(|p| p.name.as_str()), order.period);

    let nonce = Uuid::new_v4().simple().to_string();
    let request = hupijiao::build_payment_request(
        state.signer.as_ref(),
        &state.config.gateway,
        &order,
        &title,
        Utc::now().timestamp(),
        &nonce,
    );

    log::info!(
        "payment create user_id={} order_number={} amount={}",
        user_id,
        order.order_number,
        order.amount
    );

    let resp = hupijiao_client::create_payment(&state.http, &state.config.gateway.api_url, &request)
        .await
        .map_err(|e| {
            log::error!("gateway create_payment error: {e} order_number={}", order.order_number);
            AppError::from(e)
        })?;

    if let Some(gateway_order_id) = resp.gateway_order_id() {
        db::set_gateway_order_id(&state.pool, order.id, &gateway_order_id).await?;
    }

    Ok(HttpResponse::Ok().json(PaymentResponse {
        order_id: order.id,
        order_number: order.order_number,
        amount: order.amount,
        payment_url: resp.url,
        qrcode_url: resp.url_qrcode,
    }))
}

#[utoipa::path(
    get,
    path = "/api/payment/{order_id}/status",
    tag = "payments",
    params(("order_id" = i32, Path, description = "Order id")),
    responses(
        (status = 200, description = "Current payment state", body = PaymentStatusResponse),
        (status = 404, description = "Order not found")
    ),
    security(("bearer" = []))
)]
#[get("/payment/{order_id}/status")]
pub async fn payment_status(
    state: web::Data<AppState>,
    user_id: web::ReqData<i32>,
    path: web::Path<i32>,
) -> Result<HttpResponse, AppError> {
    let order = db::get_order_for_user(&state.pool, *user_id, path.into_inner())
        .await?
        .ok_or(AppError::NotFound("order"))?;

    Ok(HttpResponse::Ok().json(PaymentStatusResponse {
        order_id: order.id,
        paid: order.status.is_settled(),
        order_number: order.order_number,
        status: order.status,
        paid_at: order.paid_at,
        subscription_id: order.subscription_id,
    }))
}
