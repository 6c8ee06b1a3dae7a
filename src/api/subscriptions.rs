// src/api/subscriptions.rs

use actix_web::{get, web, HttpResponse};
use chrono::{Duration, Utc};
use serde::Deserialize;
use utoipa::IntoParams;

use crate::error::AppError;
use crate::models::{Subscription, TrafficLog};
use crate::provisioning::{self, AccessLink};
use crate::{db, AppState};

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct TrafficQuery {
    /// 1..=365, по умолчанию 30
    pub days: Option<i64>,
}

const DEFAULT_TRAFFIC_DAYS: i64 = 30;
const MAX_TRAFFIC_DAYS: i64 = 365;

#[utoipa::path(
    get,
    path = "/api/subscriptions",
    tag = "subscriptions",
    responses((status = 200, description = "Subscriptions of the caller", body = [Subscription])),
    security(("bearer" = []))
)]
#[get("/subscriptions")]
pub async fn list_subscriptions(
    state: web::Data<AppState>,
    user_id: web::ReqData<i32>,
) -> Result<HttpResponse, AppError> {
    let subs = db::list_user_subscriptions(&state.pool, *user_id).await?;
    Ok(HttpResponse::Ok().json(subs))
}

#[utoipa::path(
    get,
    path = "/api/subscriptions/link",
    tag = "subscriptions",
    responses(
        (status = 200, description = "Subscription URL and QR code", body = AccessLink),
        (status = 404, description = "No subscription yet")
    ),
    security(("bearer" = []))
)]
#[get("/subscriptions/link")]
pub async fn subscription_link(
    state: web::Data<AppState>,
    user_id: web::ReqData<i32>,
) -> Result<HttpResponse, AppError> {
    let link = provisioning::get_access_link(
        &state.pool,
        &state.config.subscription_base_url,
        &state.config.subscription_path,
        *user_id,
    )
    .await?;
    Ok(HttpResponse::Ok().json(link))
}

#[utoipa::path(
    get,
    path = "/api/subscriptions/{id}",
    tag = "subscriptions",
    params(("id" = i32, Path, description = "Subscription id")),
    responses(
        (status = 200, description = "Subscription", body = Subscription),
        (status = 404, description = "Not found or not owned by the caller")
    ),
    security(("bearer" = []))
)]
#[get("/subscriptions/{id}")]
pub async fn get_subscription(
    state: web::Data<AppState>,
    user_id: web::ReqData<i32>,
    path: web::Path<i32>,
) -> Result<HttpResponse, AppError> {
    let sub = db::get_subscription_for_user(&state.pool, *user_id, path.into_inner())
        .await?
        .ok_or(AppError::NotFound("subscription"))?;
    Ok(HttpResponse::Ok().json(sub))
}

#[utoipa::path(
    get,
    path = "/api/subscriptions/{id}/traffic",
    tag = "subscriptions",
    params(("id" = i32, Path, description = "Subscription id"), TrafficQuery),
    responses(
        (status = 200, description = "Daily traffic, newest first", body = [TrafficLog]),
        (status = 404, description = "Not found or not owned by the caller")
    ),
    security(("bearer" = []))
)]
#[get("/subscriptions/{id}/traffic")]
pub async fn subscription_traffic(
    state: web::Data<AppState>,
    user_id: web::ReqData<i32>,
    path: web::Path<i32>,
    query: web::Query<TrafficQuery>,
) -> Result<HttpResponse, AppError> {
    let sub = db::get_subscription_for_user(&state.pool, *user_id, path.into_inner())
        .await?
        .ok_or(AppError::NotFound("subscription"))?;

    let days = query.days.unwrap_or(DEFAULT_TRAFFIC_DAYS).clamp(1, MAX_TRAFFIC_DAYS);
    let since = (Utc::now() - Duration::days(days)).date_naive();

    let logs = db::list_traffic_logs(&state.pool, sub.id, since, days).await?;
    Ok(HttpResponse::Ok().json(logs))
}
