// src/db.rs

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgExecutor, PgPool, Row};

use crate::models::{Order, OrderStatus, Plan, PlanPeriod, Subscription, TrafficLog, User};

pub(crate) const ORDER_COLUMNS: &str = r#"id, order_number, user_id, plan_id, amount::text AS amount,
       period, traffic_gb, status, gateway_order_id, transaction_id, subscription_id,
       created_at, updated_at, paid_at, cancelled_at, completed_at"#;

pub(crate) const SUBSCRIPTION_COLUMNS: &str = r#"id, user_id, plan_id, order_id, token, panel_email, panel_uuid,
       traffic_total_gb, traffic_used_bytes, activated_at, expires_at, is_active,
       created_at, updated_at"#;

const PLAN_COLUMNS: &str = r#"id, name, traffic_gb, price::text AS price, period, node_tier,
       is_unlimited_speed, is_active, sort_order, created_at"#;

fn decode_err(e: String) -> sqlx::Error {
    sqlx::Error::Decode(e.into())
}

pub(crate) fn plan_from_row(r: &PgRow) -> Result<Plan, sqlx::Error> {
    let period: String = r.try_get("period")?;
    Ok(Plan {
        id: r.try_get("id")?,
        name: r.try_get("name")?,
        traffic_gb: r.try_get("traffic_gb")?,
        price: r.try_get("price")?,
        period: period.parse::<PlanPeriod>().map_err(decode_err)?,
        node_tier: r.try_get("node_tier")?,
        is_unlimited_speed: r.try_get("is_unlimited_speed")?,
        is_active: r.try_get("is_active")?,
        sort_order: r.try_get("sort_order")?,
        created_at: r.try_get("created_at")?,
    })
}

pub(crate) fn order_from_row(r: &PgRow) -> Result<Order, sqlx::Error> {
    let period: String = r.try_get("period")?;
    let status: String = r.try_get("status")?;
    Ok(Order {
        id: r.try_get("id")?,
        order_number: r.try_get("order_number")?,
        user_id: r.try_get("user_id")?,
        plan_id: r.try_get("plan_id")?,
        amount: r.try_get("amount")?,
        period: period.parse::<PlanPeriod>().map_err(decode_err)?,
        traffic_gb: r.try_get("traffic_gb")?,
        status: status.parse::<OrderStatus>().map_err(decode_err)?,
        gateway_order_id: r.try_get("gateway_order_id")?,
        transaction_id: r.try_get("transaction_id")?,
        subscription_id: r.try_get("subscription_id")?,
        created_at: r.try_get("created_at")?,
        updated_at: r.try_get("updated_at")?,
        paid_at: r.try_get("paid_at")?,
        cancelled_at: r.try_get("cancelled_at")?,
        completed_at: r.try_get("completed_at")?,
    })
}

pub(crate) fn subscription_from_row(r: &PgRow) -> Result<Subscription, sqlx::Error> {
    Ok(Subscription {
        id: r.try_get("id")?,
        user_id: r.try_get("user_id")?,
        plan_id: r.try_get("plan_id")?,
        order_id: r.try_get("order_id")?,
        token: r.try_get("token")?,
        panel_email: r.try_get("panel_email")?,
        panel_uuid: r.try_get("panel_uuid")?,
        traffic_total_gb: r.try_get("traffic_total_gb")?,
        traffic_used_bytes: r.try_get("traffic_used_bytes")?,
        activated_at: r.try_get("activated_at")?,
        expires_at: r.try_get("expires_at")?,
        is_active: r.try_get("is_active")?,
        created_at: r.try_get("created_at")?,
        updated_at: r.try_get("updated_at")?,
    })
}

// ---- users ----

pub async fn create_user(pool: &PgPool, email: &str, password_hash: &str) -> Result<i32, sqlx::Error> {
    let row = sqlx::query(
        r#"INSERT INTO users (email, password_hash)
           VALUES ($1, $2)
           RETURNING id"#,
    )
    .bind(email)
    .bind(password_hash)
    .fetch_one(pool)
    .await?;

    row.try_get("id")
}

/// (id, password_hash, is_active)
pub async fn find_user_credentials(
    pool: &PgPool,
    email: &str,
) -> Result<Option<(i32, String, bool)>, sqlx::Error> {
    let row = sqlx::query("SELECT id, password_hash, is_active FROM users WHERE email = $1")
        .bind(email)
        .fetch_optional(pool)
        .await?;

    row.map(|r| Ok((r.try_get("id")?, r.try_get("password_hash")?, r.try_get("is_active")?)))
        .transpose()
}

pub async fn get_user(pool: &PgPool, user_id: i32) -> Result<Option<User>, sqlx::Error> {
    let row = sqlx::query("SELECT id, email, is_active, created_at FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_optional(pool)
        .await?;

    row.map(|r| {
        Ok(User {
            id: r.try_get("id")?,
            email: r.try_get("email")?,
            is_active: r.try_get("is_active")?,
            created_at: r.try_get("created_at")?,
        })
    })
    .transpose()
}

// ---- plans ----

pub async fn list_active_plans(pool: &PgPool) -> Result<Vec<Plan>, sqlx::Error> {
    let rows = sqlx::query(&format!(
        "SELECT {PLAN_COLUMNS} FROM plans WHERE is_active = true ORDER BY sort_order, id"
    ))
    .fetch_all(pool)
    .await?;

    rows.iter().map(plan_from_row).collect()
}

pub async fn get_plan<'e>(db: impl PgExecutor<'e>, plan_id: i32) -> Result<Option<Plan>, sqlx::Error> {
    let row = sqlx::query(&format!("SELECT {PLAN_COLUMNS} FROM plans WHERE id = $1"))
        .bind(plan_id)
        .fetch_optional(db)
        .await?;

    row.as_ref().map(plan_from_row).transpose()
}

// ---- orders ----

pub async fn get_order<'e>(db: impl PgExecutor<'e>, order_id: i32) -> Result<Option<Order>, sqlx::Error> {
    let row = sqlx::query(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"))
        .bind(order_id)
        .fetch_optional(db)
        .await?;

    row.as_ref().map(order_from_row).transpose()
}

pub async fn get_order_for_user<'e>(
    db: impl PgExecutor<'e>,
    user_id: i32,
    order_id: i32,
) -> Result<Option<Order>, sqlx::Error> {
    let row = sqlx::query(&format!(
        "SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1 AND user_id = $2"
    ))
    .bind(order_id)
    .bind(user_id)
    .fetch_optional(db)
    .await?;

    row.as_ref().map(order_from_row).transpose()
}

pub async fn get_order_by_number<'e>(
    db: impl PgExecutor<'e>,
    order_number: &str,
) -> Result<Option<Order>, sqlx::Error> {
    let row = sqlx::query(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE order_number = $1"))
        .bind(order_number)
        .fetch_optional(db)
        .await?;

    row.as_ref().map(order_from_row).transpose()
}

pub async fn find_pending_order<'e>(
    db: impl PgExecutor<'e>,
    user_id: i32,
    plan_id: i32,
) -> Result<Option<Order>, sqlx::Error> {
    let row = sqlx::query(&format!(
        r#"SELECT {ORDER_COLUMNS} FROM orders
           WHERE user_id = $1 AND plan_id = $2 AND status = 'pending'
           ORDER BY created_at DESC
           LIMIT 1"#
    ))
    .bind(user_id)
    .bind(plan_id)
    .fetch_optional(db)
    .await?;

    row.as_ref().map(order_from_row).transpose()
}

pub async fn list_user_orders(
    pool: &PgPool,
    user_id: i32,
    status: Option<OrderStatus>,
    limit: i64,
    offset: i64,
) -> Result<(Vec<Order>, i64), sqlx::Error> {
    let status = status.map(|s| s.as_str());

    let total: i64 = sqlx::query(
        "SELECT COUNT(*) AS total FROM orders WHERE user_id = $1 AND ($2::text IS NULL OR status = $2)",
    )
    .bind(user_id)
    .bind(status)
    .fetch_one(pool)
    .await?
    .try_get("total")?;

    let rows = sqlx::query(&format!(
        r#"SELECT {ORDER_COLUMNS} FROM orders
           WHERE user_id = $1 AND ($2::text IS NULL OR status = $2)
           ORDER BY created_at DESC, id DESC
           LIMIT $3 OFFSET $4"#
    ))
    .bind(user_id)
    .bind(status)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;

    let orders = rows.iter().map(order_from_row).collect::<Result<Vec<_>, _>>()?;
    Ok((orders, total))
}

pub async fn set_gateway_order_id(
    pool: &PgPool,
    order_id: i32,
    gateway_order_id: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE orders SET gateway_order_id = $1, updated_at = NOW() WHERE id = $2")
        .bind(gateway_order_id)
        .bind(order_id)
        .execute(pool)
        .await?;

    Ok(())
}

pub async fn record_status_change<'e>(
    db: impl PgExecutor<'e>,
    order_id: i32,
    from: Option<OrderStatus>,
    to: OrderStatus,
    changed_at: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"INSERT INTO order_status_changes (order_id, from_status, to_status, changed_at)
           VALUES ($1, $2, $3, $4)"#,
    )
    .bind(order_id)
    .bind(from.map(|s| s.as_str()))
    .bind(to.as_str())
    .bind(changed_at)
    .execute(db)
    .await?;

    Ok(())
}

/// (число всех заказов, сумма оплаченных и выполненных строкой)
pub async fn order_totals(pool: &PgPool, user_id: i32) -> Result<(i64, String), sqlx::Error> {
    let row = sqlx::query(
        r#"SELECT COUNT(*) AS total_orders,
                  COALESCE(SUM(amount) FILTER (WHERE status IN ('paid', 'completed')), 0)::numeric(12, 2)::text AS total_spent
           FROM orders
           WHERE user_id = $1"#,
    )
    .bind(user_id)
    .fetch_one(pool)
    .await?;

    Ok((row.try_get("total_orders")?, row.try_get("total_spent")?))
}

// ---- subscriptions ----

pub async fn get_user_subscription<'e>(
    db: impl PgExecutor<'e>,
    user_id: i32,
) -> Result<Option<Subscription>, sqlx::Error> {
    let row = sqlx::query(&format!(
        "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE user_id = $1"
    ))
    .bind(user_id)
    .fetch_optional(db)
    .await?;

    row.as_ref().map(subscription_from_row).transpose()
}

pub async fn get_subscription_by_token(pool: &PgPool, token: &str) -> Result<Option<Subscription>, sqlx::Error> {
    let row = sqlx::query(&format!(
        "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE token = $1"
    ))
    .bind(token)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(subscription_from_row).transpose()
}

pub async fn get_subscription_for_user(
    pool: &PgPool,
    user_id: i32,
    subscription_id: i32,
) -> Result<Option<Subscription>, sqlx::Error> {
    let row = sqlx::query(&format!(
        "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE id = $1 AND user_id = $2"
    ))
    .bind(subscription_id)
    .bind(user_id)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(subscription_from_row).transpose()
}

pub async fn list_user_subscriptions(pool: &PgPool, user_id: i32) -> Result<Vec<Subscription>, sqlx::Error> {
    let rows = sqlx::query(&format!(
        r#"SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions
           WHERE user_id = $1
           ORDER BY created_at DESC"#
    ))
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    rows.iter().map(subscription_from_row).collect()
}

pub async fn set_subscription_panel_uuid(
    pool: &PgPool,
    subscription_id: i32,
    panel_uuid: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE subscriptions SET panel_uuid = $1, updated_at = NOW() WHERE id = $2")
        .bind(panel_uuid)
        .bind(subscription_id)
        .execute(pool)
        .await?;

    Ok(())
}

pub async fn list_traffic_logs(
    pool: &PgPool,
    subscription_id: i32,
    since: NaiveDate,
    limit: i64,
) -> Result<Vec<TrafficLog>, sqlx::Error> {
    let rows = sqlx::query(
        r#"SELECT id, subscription_id, upload_bytes, download_bytes, total_bytes, recorded_at
           FROM traffic_logs
           WHERE subscription_id = $1 AND recorded_at >= $2
           ORDER BY recorded_at DESC
           LIMIT $3"#,
    )
    .bind(subscription_id)
    .bind(since)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|r| {
            Ok(TrafficLog {
                id: r.try_get("id")?,
                subscription_id: r.try_get("subscription_id")?,
                upload_bytes: r.try_get("upload_bytes")?,
                download_bytes: r.try_get("download_bytes")?,
                total_bytes: r.try_get("total_bytes")?,
                recorded_at: r.try_get("recorded_at")?,
            })
        })
        .collect()
}
