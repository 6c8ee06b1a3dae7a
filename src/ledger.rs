// src/ledger.rs
//
// Журнал заказов. Все смены статуса идут через условный UPDATE
// `... WHERE status = <ожидаемый>`, поэтому параллельные вызовы безопасны:
// выигрывает первый, остальные получают Conflict.

use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::db::{self, ORDER_COLUMNS};
use crate::error::AppError;
use crate::models::{Order, OrderStatus};
use crate::provisioning::{self, PlanTerms, Provisioned};

/// Номер заказа для шлюза: время + 8 случайных hex-символов.
pub fn new_order_number(now: DateTime<Utc>) -> String {
    let random = Uuid::new_v4().simple().to_string();
    format!("{}{}", now.format("%Y%m%d%H%M%S"), random[..8].to_uppercase())
}

/// Единственный статус, из которого заказ может перейти в `to`.
fn required_source(to: OrderStatus) -> Option<OrderStatus> {
    match to {
        OrderStatus::Paid | OrderStatus::Cancelled => Some(OrderStatus::Pending),
        OrderStatus::Completed => Some(OrderStatus::Paid),
        OrderStatus::Pending => None,
    }
}

fn timestamp_column(to: OrderStatus) -> &'static str {
    match to {
        OrderStatus::Paid => "paid_at",
        OrderStatus::Cancelled => "cancelled_at",
        OrderStatus::Completed => "completed_at",
        OrderStatus::Pending => "updated_at",
    }
}

async fn apply_transition(
    conn: &mut PgConnection,
    order_id: i32,
    owner: Option<i32>,
    to: OrderStatus,
    transaction_id: Option<&str>,
    now: DateTime<Utc>,
) -> Result<Option<Order>, AppError> {
    let Some(from) = required_source(to) else {
        return Err(AppError::Conflict(format!("order cannot move back to {to}")));
    };

    let row = sqlx::query(&format!(
        r#"UPDATE orders
           SET status = $1,
               {ts} = $2,
               updated_at = $2,
               transaction_id = COALESCE($3, transaction_id)
           WHERE id = $4 AND status = $5 AND ($6::int IS NULL OR user_id = $6)
           RETURNING {ORDER_COLUMNS}"#,
        ts = timestamp_column(to),
    ))
    .bind(to.as_str())
    .bind(now)
    .bind(transaction_id)
    .bind(order_id)
    .bind(from.as_str())
    .bind(owner)
    .fetch_optional(&mut *conn)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let order = db::order_from_row(&row)?;
    db::record_status_change(&mut *conn, order.id, Some(from), to, now).await?;
    log::info!("order {} {} -> {}", order.order_number, from, to);

    Ok(Some(order))
}

/// Объясняет, почему условный UPDATE ничего не обновил.
async fn rejected_transition(
    pool: &PgPool,
    order_id: i32,
    owner: Option<i32>,
    to: OrderStatus,
) -> AppError {
    let current = match owner {
        Some(user_id) => db::get_order_for_user(pool, user_id, order_id).await,
        None => db::get_order(pool, order_id).await,
    };

    match current {
        Ok(Some(order)) => AppError::Conflict(format!(
            "order {} is {}, cannot move to {}",
            order.order_number, order.status, to
        )),
        Ok(None) => AppError::NotFound("order"),
        Err(e) => AppError::Database(e),
    }
}

pub async fn create_order(pool: &PgPool, user_id: i32, plan_id: i32) -> Result<Order, AppError> {
    let plan = db::get_plan(pool, plan_id)
        .await?
        .ok_or(AppError::NotFound("plan"))?;

    if !plan.is_active {
        return Err(AppError::NotFound("plan"));
    }

    // незакрытый заказ на тот же тариф переиспользуем
    if let Some(order) = db::find_pending_order(pool, user_id, plan.id).await? {
        return Ok(order);
    }

    let now = Utc::now();
    let mut tx = pool.begin().await?;

    // uq_orders_pending_plan: параллельный create_order не создаст второй pending
    let inserted = sqlx::query(&format!(
        r#"INSERT INTO orders
               (order_number, user_id, plan_id, amount, period, traffic_gb, status, created_at, updated_at)
           VALUES ($1, $2, $3, $4::numeric, $5, $6, 'pending', $7, $7)
           ON CONFLICT (user_id, plan_id) WHERE status = 'pending' DO NOTHING
           RETURNING {ORDER_COLUMNS}"#
    ))
    .bind(new_order_number(now))
    .bind(user_id)
    .bind(plan.id)
    .bind(&plan.price)
    .bind(plan.period.as_str())
    .bind(plan.traffic_gb)
    .bind(now)
    .fetch_optional(&mut *tx)
    .await?;

    let Some(row) = inserted else {
        tx.rollback().await?;
        return db::find_pending_order(pool, user_id, plan.id)
            .await?
            .ok_or_else(|| AppError::Conflict("pending order changed concurrently, retry".into()));
    };

    let order = db::order_from_row(&row)?;
    db::record_status_change(&mut *tx, order.id, None, OrderStatus::Pending, now).await?;
    tx.commit().await?;

    log::info!(
        "order created order_number={} user_id={} plan_id={} amount={}",
        order.order_number,
        user_id,
        plan.id,
        order.amount
    );
    Ok(order)
}

#[derive(Debug, Clone)]
pub struct PaidOrder {
    pub order: Order,
    pub provisioned: Provisioned,
}

/// pending -> paid и выдача подписки в одной транзакции.
/// Повторный вызов для того же заказа возвращает Conflict и ничего не меняет.
pub async fn mark_paid(pool: &PgPool, order_id: i32, gateway_txn_id: &str) -> Result<PaidOrder, AppError> {
    let now = Utc::now();
    let mut tx = pool.begin().await?;

    let Some(mut order) =
        apply_transition(&mut tx, order_id, None, OrderStatus::Paid, Some(gateway_txn_id), now).await?
    else {
        tx.rollback().await?;
        return Err(rejected_transition(pool, order_id, None, OrderStatus::Paid).await);
    };

    let terms = PlanTerms::from(&order);
    let provisioned = provisioning::activate_or_extend(&mut tx, order.user_id, order.id, &terms, now).await?;

    sqlx::query("UPDATE orders SET subscription_id = $1 WHERE id = $2")
        .bind(provisioned.subscription.id)
        .bind(order.id)
        .execute(&mut *tx)
        .await?;
    order.subscription_id = Some(provisioned.subscription.id);

    tx.commit().await?;

    Ok(PaidOrder { order, provisioned })
}

pub async fn cancel(pool: &PgPool, user_id: i32, order_id: i32) -> Result<Order, AppError> {
    transition(pool, order_id, Some(user_id), OrderStatus::Cancelled).await
}

/// paid -> completed после того, как панель VPN приняла клиента.
pub async fn complete(pool: &PgPool, order_id: i32) -> Result<Order, AppError> {
    transition(pool, order_id, None, OrderStatus::Completed).await
}

async fn transition(
    pool: &PgPool,
    order_id: i32,
    owner: Option<i32>,
    to: OrderStatus,
) -> Result<Order, AppError> {
    let mut tx = pool.begin().await?;

    match apply_transition(&mut tx, order_id, owner, to, None, Utc::now()).await? {
        Some(order) => {
            tx.commit().await?;
            Ok(order)
        }
        None => {
            tx.rollback().await?;
            Err(rejected_transition(pool, order_id, owner, to).await)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn order_number_has_timestamp_prefix() {
        let now = Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap();
        let number = new_order_number(now);
        assert!(number.starts_with("20250102030405"));
        assert_eq!(number.len(), 22);
        assert!(number[14..].chars().all(|c| c.is_ascii_digit() || c.is_ascii_uppercase()));
    }

    #[test]
    fn transitions_have_single_source() {
        assert_eq!(required_source(OrderStatus::Paid), Some(OrderStatus::Pending));
        assert_eq!(required_source(OrderStatus::Cancelled), Some(OrderStatus::Pending));
        assert_eq!(required_source(OrderStatus::Completed), Some(OrderStatus::Paid));
        assert_eq!(required_source(OrderStatus::Pending), None);

        for to in [OrderStatus::Paid, OrderStatus::Cancelled, OrderStatus::Completed] {
            let from = required_source(to).unwrap();
            assert!(from.can_transition_to(to));
        }
    }
}
