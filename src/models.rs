// src/models.rs

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;

pub const BYTES_PER_GB: i64 = 1024 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum PlanPeriod {
    #[serde(rename = "onetime")]
    OneTime,
    #[serde(rename = "1month")]
    OneMonth,
    #[serde(rename = "3month")]
    ThreeMonths,
    #[serde(rename = "6month")]
    SixMonths,
    #[serde(rename = "1year")]
    OneYear,
}

impl PlanPeriod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanPeriod::OneTime => "onetime",
            PlanPeriod::OneMonth => "1month",
            PlanPeriod::ThreeMonths => "3month",
            PlanPeriod::SixMonths => "6month",
            PlanPeriod::OneYear => "1year",
        }
    }

    /// Длительность периода. `None` у разовых пакетов: они ограничены только трафиком.
    pub fn duration(&self) -> Option<Duration> {
        let days = match self {
            PlanPeriod::OneTime => return None,
            PlanPeriod::OneMonth => 30,
            PlanPeriod::ThreeMonths => 90,
            PlanPeriod::SixMonths => 180,
            PlanPeriod::OneYear => 365,
        };
        Some(Duration::days(days))
    }
}

impl fmt::Display for PlanPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlanPeriod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "onetime" => Ok(PlanPeriod::OneTime),
            "1month" => Ok(PlanPeriod::OneMonth),
            "3month" => Ok(PlanPeriod::ThreeMonths),
            "6month" => Ok(PlanPeriod::SixMonths),
            "1year" => Ok(PlanPeriod::OneYear),
            other => Err(format!("unknown plan period: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Paid,
    Cancelled,
    Completed,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Paid => "paid",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Completed => "completed",
        }
    }

    /// Допустимые переходы: pending -> paid -> completed, pending -> cancelled.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        matches!(
            (self, next),
            (OrderStatus::Pending, OrderStatus::Paid)
                | (OrderStatus::Pending, OrderStatus::Cancelled)
                | (OrderStatus::Paid, OrderStatus::Completed)
        )
    }

    /// Заказ уже оплачен (в том числе выполнен).
    pub fn is_settled(&self) -> bool {
        matches!(self, OrderStatus::Paid | OrderStatus::Completed)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OrderStatus::Pending),
            "paid" => Ok(OrderStatus::Paid),
            "cancelled" => Ok(OrderStatus::Cancelled),
            "completed" => Ok(OrderStatus::Completed),
            other => Err(format!("unknown order status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct User {
    pub id: i32,
    pub email: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Plan {
    pub id: i32,
    pub name: String,
    pub traffic_gb: i32,
    /// NUMERIC(10,2) в текстовом виде, например "10.00"
    pub price: String,
    pub period: PlanPeriod,
    pub node_tier: i32,
    pub is_unlimited_speed: bool,
    pub is_active: bool,
    pub sort_order: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Order {
    pub id: i32,
    pub order_number: String,
    pub user_id: i32,
    pub plan_id: i32,
    /// Снимок цены тарифа на момент создания заказа
    pub amount: String,
    pub period: PlanPeriod,
    pub traffic_gb: i32,
    pub status: OrderStatus,
    pub gateway_order_id: Option<String>,
    pub transaction_id: Option<String>,
    pub subscription_id: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Subscription {
    pub id: i32,
    pub user_id: i32,
    pub plan_id: i32,
    pub order_id: i32,
    pub token: String,
    pub panel_email: String,
    pub panel_uuid: Option<String>,
    pub traffic_total_gb: i32,
    pub traffic_used_bytes: i64,
    pub activated_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    pub fn traffic_total_bytes(&self) -> i64 {
        i64::from(self.traffic_total_gb) * BYTES_PER_GB
    }

    /// Включена и срок не вышел. Трафик не учитывается.
    pub fn is_within_term(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.expires_at.map_or(true, |expires_at| expires_at > now)
    }

    /// Подписка даёт доступ: включена, не истекла и трафик не исчерпан.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.is_within_term(now) && self.traffic_used_bytes < self.traffic_total_bytes()
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TrafficLog {
    pub id: i64,
    pub subscription_id: i32,
    pub upload_bytes: i64,
    pub download_bytes: i64,
    pub total_bytes: i64,
    pub recorded_at: NaiveDate,
}

/// Переводит денежную строку ("10", "10.5", "10.00") в копейки/фэни.
/// Строка должна быть неотрицательной и иметь не больше двух знаков после точки.
pub fn parse_cents(amount: &str) -> Option<i64> {
    let amount = amount.trim();
    let (whole, frac) = match amount.split_once('.') {
        Some((w, f)) => (w, f),
        None => (amount, ""),
    };
    if whole.is_empty() || frac.len() > 2 {
        return None;
    }
    if !whole.bytes().all(|b| b.is_ascii_digit()) || !frac.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let whole: i64 = whole.parse().ok()?;
    let frac: i64 = match frac.len() {
        0 => 0,
        1 => frac.parse::<i64>().ok()? * 10,
        _ => frac.parse().ok()?,
    };
    whole.checked_mul(100)?.checked_add(frac)
}

pub fn bytes_to_gb(bytes: i64) -> f64 {
    (bytes as f64 / BYTES_PER_GB as f64 * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subscription(expires_at: Option<DateTime<Utc>>, used: i64) -> Subscription {
        let now = Utc::now();
        Subscription {
            id: 1,
            user_id: 1,
            plan_id: 1,
            order_id: 1,
            token: "t".repeat(64),
            panel_email: "user_1".into(),
            panel_uuid: None,
            traffic_total_gb: 1,
            traffic_used_bytes: used,
            activated_at: now,
            expires_at,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn order_status_moves_forward_only() {
        use OrderStatus::*;
        assert!(Pending.can_transition_to(Paid));
        assert!(Pending.can_transition_to(Cancelled));
        assert!(Paid.can_transition_to(Completed));

        assert!(!Paid.can_transition_to(Pending));
        assert!(!Paid.can_transition_to(Cancelled));
        assert!(!Paid.can_transition_to(Paid));
        assert!(!Completed.can_transition_to(Pending));
        assert!(!Completed.can_transition_to(Paid));
        assert!(!Cancelled.can_transition_to(Pending));
        assert!(!Cancelled.can_transition_to(Paid));
        assert!(!Pending.can_transition_to(Completed));
    }

    #[test]
    fn period_durations() {
        assert_eq!(PlanPeriod::OneTime.duration(), None);
        assert_eq!(PlanPeriod::OneMonth.duration(), Some(Duration::days(30)));
        assert_eq!(PlanPeriod::ThreeMonths.duration(), Some(Duration::days(90)));
        assert_eq!(PlanPeriod::SixMonths.duration(), Some(Duration::days(180)));
        assert_eq!(PlanPeriod::OneYear.duration(), Some(Duration::days(365)));
        assert_eq!("1year".parse::<PlanPeriod>(), Ok(PlanPeriod::OneYear));
        assert!("weekly".parse::<PlanPeriod>().is_err());
    }

    #[test]
    fn parse_cents_handles_gateway_amounts() {
        assert_eq!(parse_cents("10.00"), Some(1000));
        assert_eq!(parse_cents("10"), Some(1000));
        assert_eq!(parse_cents("14.9"), Some(1490));
        assert_eq!(parse_cents("0.01"), Some(1));
        assert_eq!(parse_cents("10.001"), None);
        assert_eq!(parse_cents("-1.00"), None);
        assert_eq!(parse_cents("abc"), None);
        assert_eq!(parse_cents(".50"), None);
    }

    #[test]
    fn live_subscription_rules() {
        let now = Utc::now();
        assert!(subscription(Some(now + Duration::days(1)), 0).is_live(now));
        assert!(subscription(None, 0).is_live(now));
        assert!(!subscription(Some(now - Duration::seconds(1)), 0).is_live(now));
        assert!(!subscription(None, BYTES_PER_GB).is_live(now));

        let mut disabled = subscription(None, 0);
        disabled.is_active = false;
        assert!(!disabled.is_live(now));
        assert!(!disabled.is_within_term(now));
    }

    #[test]
    fn exhausted_traffic_is_still_within_term() {
        let now = Utc::now();
        let sub = subscription(Some(now + Duration::days(20)), BYTES_PER_GB);
        assert!(!sub.is_live(now));
        assert!(sub.is_within_term(now));
        assert!(!subscription(Some(now - Duration::days(1)), 0).is_within_term(now));
    }
}
