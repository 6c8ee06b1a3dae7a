// src/api/orders.rs

use actix_web::{get, post, web, HttpResponse};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::error::AppError;
use crate::models::{Order, OrderStatus};
use crate::{db, ledger, AppState};

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateOrderRequest {
    pub plan_id: i32,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct OrderListQuery {
    /// с 1
    pub page: Option<i64>,
    /// 1..=100, по умолчанию 20
    pub page_size: Option<i64>,
    pub status: Option<OrderStatus>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderPage {
    pub items: Vec<Order>,
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
}

pub const DEFAULT_PAGE_SIZE: i64 = 20;
pub const MAX_PAGE_SIZE: i64 = 100;

/// (page, page_size) после нормализации.
pub fn clamp_paging(page: Option<i64>, page_size: Option<i64>) -> (i64, i64) {
    let page = page.unwrap_or(1).max(1);
    let page_size = page_size.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
    (page, page_size)
}

#[utoipa::path(
    post,
    path = "/api/orders",
    tag = "orders",
    request_body = CreateOrderRequest,
    responses(
        (status = 200, description = "Pending order (existing one is reused for the same plan)", body = Order),
        (status = 404, description = "Plan not found or no longer offered")
    ),
    security(("bearer" = []))
)]
#[post("/orders")]
pub async fn create_order(
    state: web::Data<AppState>,
    user_id: web::ReqData<i32>,
    payload: web::Json<CreateOrderRequest>,
) -> Result<HttpResponse, AppError> {
    let order = ledger::create_order(&state.pool, *user_id, payload.plan_id).await?;
    Ok(HttpResponse::Ok().json(order))
}

#[utoipa::path(
    get,
    path = "/api/orders",
    tag = "orders",
    params(OrderListQuery),
    responses((status = 200, description = "Orders, newest first", body = OrderPage)),
    security(("bearer" = []))
)]
#[get("/orders")]
pub async fn list_orders(
    state: web::Data<AppState>,
    user_id: web::ReqData<i32>,
    query: web::Query<OrderListQuery>,
) -> Result<HttpResponse, AppError> {
    let (page, page_size) = clamp_paging(query.page, query.page_size);
    let (items, total) =
        db::list_user_orders(&state.pool, *user_id, query.status, page_size, (page - 1) * page_size).await?;

    Ok(HttpResponse::Ok().json(OrderPage {
        items,
        total,
        page,
        page_size,
    }))
}

#[utoipa::path(
    get,
    path = "/api/orders/{id}",
    tag = "orders",
    params(("id" = i32, Path, description = "Order id")),
    responses(
        (status = 200, description = "Order", body = Order),
        (status = 404, description = "Not found or not owned by the caller")
    ),
    security(("bearer" = []))
)]
#[get("/orders/{id}")]
pub async fn get_order(
    state: web::Data<AppState>,
    user_id: web::ReqData<i32>,
    path: web::Path<i32>,
) -> Result<HttpResponse, AppError> {
    let order = db::get_order_for_user(&state.pool, *user_id, path.into_inner())
        .await?
        .ok_or(AppError::NotFound("order"))?;
    Ok(HttpResponse::Ok().json(order))
}

#[utoipa::path(
    post,
    path = "/api/orders/{id}/cancel",
    tag = "orders",
    params(("id" = i32, Path, description = "Order id")),
    responses(
        (status = 200, description = "Cancelled order", body = Order),
        (status = 404, description = "Not found or not owned by the caller"),
        (status = 409, description = "Order is not pending")
    ),
    security(("bearer" = []))
)]
#[post("/orders/{id}/cancel")]
pub async fn cancel_order(
    state: web::Data<AppState>,
    user_id: web::ReqData<i32>,
    path: web::Path<i32>,
) -> Result<HttpResponse, AppError> {
    let order = ledger::cancel(&state.pool, *user_id, path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(order))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paging_is_clamped() {
        assert_eq!(clamp_paging(None, None), (1, DEFAULT_PAGE_SIZE));
        assert_eq!(clamp_paging(Some(0), Some(0)), (1, 1));
        assert_eq!(clamp_paging(Some(-3), Some(1000)), (1, MAX_PAGE_SIZE));
        assert_eq!(clamp_paging(Some(4), Some(50)), (4, 50));
    }
}
