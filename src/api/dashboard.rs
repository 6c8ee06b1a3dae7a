// src/api/dashboard.rs

use actix_web::{get, web, HttpResponse};

use crate::dashboard::{self, Dashboard};
use crate::error::AppError;
use crate::AppState;

#[utoipa::path(
    get,
    path = "/api/dashboard",
    tag = "dashboard",
    responses((status = 200, description = "Subscription, traffic and spending summary", body = Dashboard)),
    security(("bearer" = []))
)]
#[get("/dashboard")]
pub async fn get_dashboard(
    state: web::Data<AppState>,
    user_id: web::ReqData<i32>,
) -> Result<HttpResponse, AppError> {
    let data = dashboard::load_dashboard(&state.pool, *user_id).await?;
    Ok(HttpResponse::Ok().json(data))
}
