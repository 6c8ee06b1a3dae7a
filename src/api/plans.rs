// src/api/plans.rs
//
// Каталог тарифов, доступен без авторизации.

use actix_web::{get, web, HttpResponse};

use crate::error::AppError;
use crate::models::Plan;
use crate::{db, AppState};

#[utoipa::path(
    get,
    path = "/plans",
    tag = "plans",
    responses((status = 200, description = "Active plans ordered by sort_order", body = [Plan]))
)]
#[get("/plans")]
pub async fn list_plans(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let plans = db::list_active_plans(&state.pool).await?;
    Ok(HttpResponse::Ok().json(plans))
}

#[utoipa::path(
    get,
    path = "/plans/{id}",
    tag = "plans",
    params(("id" = i32, Path, description = "Plan id")),
    responses(
        (status = 200, description = "Plan", body = Plan),
        (status = 404, description = "Unknown or inactive plan")
    )
)]
#[get("/plans/{id}")]
pub async fn get_plan(state: web::Data<AppState>, path: web::Path<i32>) -> Result<HttpResponse, AppError> {
    let plan = db::get_plan(&state.pool, path.into_inner())
        .await?
        .filter(|p| p.is_active)
        .ok_or(AppError::NotFound("plan"))?;
    Ok(HttpResponse::Ok().json(plan))
}
