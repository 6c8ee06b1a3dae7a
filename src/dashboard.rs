// src/dashboard.rs
//
// Сводка для главной страницы личного кабинета. Только чтение.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;
use sqlx::PgPool;
use utoipa::ToSchema;

use crate::db;
use crate::error::AppError;
use crate::models::{bytes_to_gb, Subscription, TrafficLog};

const RECENT_TRAFFIC_DAYS: i64 = 7;
const RECENT_TRAFFIC_LIMIT: i64 = 10;

#[derive(Debug, Serialize, ToSchema)]
pub struct SubscriptionSummary {
    pub id: i32,
    pub plan_id: i32,
    pub plan_name: String,
    pub is_live: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub description: String,
    pub token: String,
}

#[derive(Debug, Default, PartialEq, Serialize, ToSchema)]
pub struct TrafficSummary {
    pub total_gb: f64,
    pub used_gb: f64,
    pub remaining_gb: f64,
    /// 0..=100
    pub percent: u8,
}

#[derive(Debug, PartialEq, Serialize, ToSchema)]
pub struct TrafficRecord {
    pub upload_gb: f64,
    pub download_gb: f64,
    pub total_gb: f64,
    pub recorded_at: NaiveDate,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct Dashboard {
    pub subscription: Option<SubscriptionSummary>,
    pub traffic: TrafficSummary,
    pub total_orders: i64,
    /// Сумма оплаченных и выполненных заказов, "0.00" если их нет
    pub total_spent: String,
    pub recent_traffic: Vec<TrafficRecord>,
}

pub fn traffic_summary(sub: &Subscription) -> TrafficSummary {
    let total = sub.traffic_total_bytes();
    let used = sub.traffic_used_bytes.clamp(0, total.max(0));

    let percent = if total > 0 {
        ((used as f64 / total as f64) * 100.0).floor().min(100.0) as u8
    } else {
        0
    };

    TrafficSummary {
        total_gb: f64::from(sub.traffic_total_gb),
        used_gb: bytes_to_gb(sub.traffic_used_bytes),
        remaining_gb: bytes_to_gb((total - used).max(0)),
        percent,
    }
}

pub fn describe(sub: &Subscription) -> String {
    match sub.expires_at {
        Some(expires_at) => format!(
            "Expires on {} or when the traffic runs out",
            expires_at.format("%Y-%m-%d")
        ),
        None => "No time limit, valid until the traffic runs out".to_string(),
    }
}

pub fn summarize(sub: &Subscription, plan_name: Option<String>, now: DateTime<Utc>) -> SubscriptionSummary {
    SubscriptionSummary {
        id: sub.id,
        plan_id: sub.plan_id,
        plan_name: plan_name.unwrap_or_else(|| "Unknown plan".to_string()),
        is_live: sub.is_live(now),
        expires_at: sub.expires_at,
        description: describe(sub),
        token: sub.token.clone(),
    }
}

impl From<&TrafficLog> for TrafficRecord {
    fn from(log: &TrafficLog) -> Self {
        Self {
            upload_gb: bytes_to_gb(log.upload_bytes),
            download_gb: bytes_to_gb(log.download_bytes),
            total_gb: bytes_to_gb(log.total_bytes),
            recorded_at: log.recorded_at,
        }
    }
}

pub async fn load_dashboard(pool: &PgPool, user_id: i32) -> Result<Dashboard, AppError> {
    let now = Utc::now();
    let (total_orders, total_spent) = db::order_totals(pool, user_id).await?;

    let Some(sub) = db::get_user_subscription(pool, user_id).await? else {
        return Ok(Dashboard {
            subscription: None,
            traffic: TrafficSummary::default(),
            total_orders,
            total_spent,
            recent_traffic: Vec::new(),
        });
    };

    let plan_name = db::get_plan(pool, sub.plan_id).await?.map(|p| p.name);
    let since = (now - Duration::days(RECENT_TRAFFIC_DAYS)).date_naive();
    let logs = db::list_traffic_logs(pool, sub.id, since, RECENT_TRAFFIC_LIMIT).await?;

    Ok(Dashboard {
        traffic: traffic_summary(&sub),
        subscription: Some(summarize(&sub, plan_name, now)),
        total_orders,
        total_spent,
        recent_traffic: logs.iter().map(TrafficRecord::from).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BYTES_PER_GB;
    use chrono::TimeZone;

    fn sub(total_gb: i32, used_bytes: i64) -> Subscription {
        let now = Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap();
        Subscription {
            id: 1,
            user_id: 1,
            plan_id: 6,
            order_id: 1,
            token: "f".repeat(64),
            panel_email: "user_1".into(),
            panel_uuid: None,
            traffic_total_gb: total_gb,
            traffic_used_bytes: used_bytes,
            activated_at: now,
            expires_at: Some(Utc.with_ymd_and_hms(2025, 3, 31, 0, 0, 0).unwrap()),
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn usage_percent_is_floored_and_capped() {
        let t = traffic_summary(&sub(200, 50 * BYTES_PER_GB));
        assert_eq!(t.percent, 25);
        assert_eq!(t.used_gb, 50.0);
        assert_eq!(t.remaining_gb, 150.0);

        let over = traffic_summary(&sub(10, 12 * BYTES_PER_GB));
        assert_eq!(over.percent, 100);
        assert_eq!(over.remaining_gb, 0.0);

        assert_eq!(traffic_summary(&sub(0, 0)).percent, 0);
    }

    #[test]
    fn summary_mentions_expiry_date() {
        let s = sub(200, 0);
        let now = Utc.with_ymd_and_hms(2025, 3, 10, 0, 0, 0).unwrap();
        let summary = summarize(&s, Some("Monthly 200G".into()), now);
        assert!(summary.is_live);
        assert!(summary.description.contains("2025-03-31"));
        assert_eq!(summary.plan_name, "Monthly 200G");

        let mut forever = sub(200, 0);
        forever.expires_at = None;
        assert!(describe(&forever).starts_with("No time limit"));
    }
}
